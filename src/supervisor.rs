use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::metrics::WORKER_RESTARTS_TOTAL;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Starting,
    Running,
    Exited,
}

// One record per worker slot, replaced on respawn.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub id: u64,
    pub slot: usize,
    pub status: WorkerStatus,
    pub started_at: Instant,
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerContext {
    pub slot: usize,
    pub id: u64,
}

// Respawn is unconditional, but consecutive rapid exits of the same slot back
// off exponentially (capped) and raise an error-level alert past
// `alert_after`. A worker that outlives `rapid_exit_threshold` resets its
// slot's strike count.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub rapid_exit_threshold: Duration,
    pub alert_after: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            rapid_exit_threshold: Duration::from_secs(1),
            alert_after: 5,
        }
    }
}

impl RestartPolicy {
    pub fn delay_for(&self, strikes: u32) -> Duration {
        if strikes == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32 << (strikes - 1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

struct WorkerExit {
    slot: usize,
    id: u64,
    panic: Option<String>,
}

struct Inner {
    factory: Box<dyn Fn(WorkerContext) + Send + Sync>,
    records: Arc<DashMap<usize, WorkerRecord>>,
    next_id: AtomicU64,
    exit_tx: Sender<WorkerExit>,
}

// Keeps `worker_count` workers alive for the lifetime of the process. Workers
// run on named OS threads; any exit (return or panic) is observed through an
// mpsc channel and answered with exactly one replacement for that slot.
pub struct Supervisor {
    inner: Arc<Inner>,
    worker_count: usize,
    policy: RestartPolicy,
    exit_rx: Receiver<WorkerExit>,
}

// Read-only view of the worker table, for diagnostics and tests.
#[derive(Clone)]
pub struct SupervisorHandle {
    records: Arc<DashMap<usize, WorkerRecord>>,
}

impl SupervisorHandle {
    pub fn running_count(&self) -> usize {
        self.records
            .iter()
            .filter(|record| record.status == WorkerStatus::Running)
            .count()
    }

    pub fn record(&self, slot: usize) -> Option<WorkerRecord> {
        self.records.get(&slot).map(|record| record.clone())
    }
}

impl Supervisor {
    pub fn new<F>(worker_count: usize, policy: RestartPolicy, factory: F) -> Self
    where
        F: Fn(WorkerContext) + Send + Sync + 'static,
    {
        let (exit_tx, exit_rx) = channel();
        Self {
            inner: Arc::new(Inner {
                factory: Box::new(factory),
                records: Arc::new(DashMap::new()),
                next_id: AtomicU64::new(0),
                exit_tx,
            }),
            worker_count,
            policy,
            exit_rx,
        }
    }

    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            records: Arc::clone(&self.inner.records),
        }
    }

    fn spawn_worker(inner: &Arc<Inner>, slot: usize) {
        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        inner.records.insert(
            slot,
            WorkerRecord {
                id,
                slot,
                status: WorkerStatus::Starting,
                started_at: Instant::now(),
            },
        );

        let worker_inner = Arc::clone(inner);
        let spawned = thread::Builder::new()
            .name(format!("worker-{slot}"))
            .spawn(move || {
                if let Some(mut record) = worker_inner.records.get_mut(&slot) {
                    record.status = WorkerStatus::Running;
                    record.started_at = Instant::now();
                }
                tracing::info!(slot, id, "worker started");

                let ctx = WorkerContext { slot, id };
                let outcome = catch_unwind(AssertUnwindSafe(|| (worker_inner.factory)(ctx)));
                let panic = outcome.err().map(panic_message);

                // the receiver only goes away when the supervisor does
                let _ = worker_inner.exit_tx.send(WorkerExit { slot, id, panic });
            });

        if let Err(e) = spawned {
            tracing::error!(slot, error = %e, "failed to spawn worker thread");
            if let Some(mut record) = inner.records.get_mut(&slot) {
                record.status = WorkerStatus::Exited;
            }
        }
    }

    // Spawn the initial pool and block forever observing exits. Worker death
    // never disturbs the other workers; supervisor death is fatal to the
    // service, by design.
    pub fn run(self) {
        tracing::info!(workers = self.worker_count, "supervisor starting");
        for slot in 0..self.worker_count {
            Self::spawn_worker(&self.inner, slot);
        }

        let mut strikes: HashMap<usize, u32> = HashMap::new();
        while let Ok(exit) = self.exit_rx.recv() {
            let lived = {
                let Some(mut record) = self.inner.records.get_mut(&exit.slot) else {
                    continue;
                };
                // an exit from an already-replaced generation must not
                // trigger a second respawn for the slot
                if record.id != exit.id {
                    continue;
                }
                record.status = WorkerStatus::Exited;
                record.started_at.elapsed()
            };

            WORKER_RESTARTS_TOTAL.inc();
            let slot_strikes = strikes.entry(exit.slot).or_insert(0);
            if lived < self.policy.rapid_exit_threshold {
                *slot_strikes += 1;
            } else {
                *slot_strikes = 0;
            }
            let delay = self.policy.delay_for(*slot_strikes);

            if *slot_strikes >= self.policy.alert_after {
                tracing::error!(
                    slot = exit.slot,
                    consecutive_failures = *slot_strikes,
                    "worker slot is crash-looping"
                );
            }
            match &exit.panic {
                Some(message) => tracing::warn!(
                    slot = exit.slot,
                    panic = %message,
                    delay_ms = delay.as_millis() as u64,
                    "worker died, respawning"
                ),
                None => tracing::warn!(
                    slot = exit.slot,
                    delay_ms = delay.as_millis() as u64,
                    "worker exited, respawning"
                ),
            }

            if delay.is_zero() {
                Self::spawn_worker(&self.inner, exit.slot);
            } else {
                // delayed respawns run off-thread so a crash-looping slot
                // never stalls respawns for the others
                let inner = Arc::clone(&self.inner);
                thread::spawn(move || {
                    thread::sleep(delay);
                    Self::spawn_worker(&inner, exit.slot);
                });
            }
        }
    }
}

fn panic_message(err: Box<dyn Any + Send>) -> String {
    if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn fast_policy() -> RestartPolicy {
        RestartPolicy {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            rapid_exit_threshold: Duration::from_millis(50),
            alert_after: 100,
        }
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    // Workers park until the kill switch flips; exactly one worker consumes
    // each kill and panics.
    fn parking_factory(kill: Arc<AtomicBool>) -> impl Fn(WorkerContext) + Send + Sync {
        move |_ctx| {
            loop {
                if kill.swap(false, Ordering::SeqCst) {
                    panic!("boom");
                }
                thread::sleep(Duration::from_millis(1));
            }
        }
    }

    #[test]
    fn respawns_a_crashed_worker() {
        let kill = Arc::new(AtomicBool::new(false));
        let supervisor = Supervisor::new(3, fast_policy(), parking_factory(Arc::clone(&kill)));
        let handle = supervisor.handle();
        thread::spawn(move || supervisor.run());

        assert!(wait_until(Duration::from_secs(2), || {
            handle.running_count() == 3
        }));

        kill.store(true, Ordering::SeqCst);
        assert!(wait_until(Duration::from_secs(2), || {
            handle.running_count() == 3 && !kill.load(Ordering::SeqCst)
        }));
    }

    #[test]
    fn sequential_kills_never_drop_below_n_minus_one() {
        let n = 4;
        let kill = Arc::new(AtomicBool::new(false));
        let supervisor = Supervisor::new(n, fast_policy(), parking_factory(Arc::clone(&kill)));
        let handle = supervisor.handle();
        thread::spawn(move || supervisor.run());

        assert!(wait_until(Duration::from_secs(2), || {
            handle.running_count() == n
        }));

        for _ in 0..3 {
            kill.store(true, Ordering::SeqCst);
            let recovered = wait_until(Duration::from_secs(2), || {
                assert!(handle.running_count() >= n - 1);
                handle.running_count() == n && !kill.load(Ordering::SeqCst)
            });
            assert!(recovered);
        }
    }

    #[test]
    fn normal_exit_also_respawns() {
        // first generation returns immediately; replacements park
        let launches = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&launches);
        let supervisor = Supervisor::new(1, fast_policy(), move |_ctx| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return;
            }
            loop {
                thread::sleep(Duration::from_millis(1));
            }
        });
        let handle = supervisor.handle();
        thread::spawn(move || supervisor.run());

        assert!(wait_until(Duration::from_secs(2), || {
            handle.running_count() == 1 && launches.load(Ordering::SeqCst) >= 2
        }));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RestartPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            rapid_exit_threshold: Duration::from_secs(1),
            alert_after: 5,
        };

        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(30), Duration::from_secs(5));
    }

    #[test]
    fn records_track_status_transitions() {
        let supervisor = Supervisor::new(2, fast_policy(), |_ctx| {
            loop {
                thread::sleep(Duration::from_millis(1));
            }
        });
        let handle = supervisor.handle();
        thread::spawn(move || supervisor.run());

        assert!(wait_until(Duration::from_secs(2), || {
            handle.running_count() == 2
        }));
        let record = handle.record(0).unwrap();
        assert_eq!(record.slot, 0);
        assert_eq!(record.status, WorkerStatus::Running);
    }
}
