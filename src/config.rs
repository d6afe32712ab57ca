use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;

use crate::supervisor::RestartPolicy;

// CLI argument structure
#[derive(Parser, Debug, Clone)]
#[command(name = "storefront-server")]
#[command(about = "Multi-worker HTTP server core for the storefront backend")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, env = "PORT", default_value_t = 7021)]
    pub port: u16,

    // Worker count (0 = one per CPU core)
    #[arg(short, long, default_value_t = 0)]
    pub workers: usize,

    // Rate limit max requests per window
    #[arg(long, default_value_t = 1000)]
    pub rate_limit: u32,

    // Rate limit window in seconds
    #[arg(long, default_value_t = 300)]
    pub rate_window: u64,

    // Allowed CORS origins (comma-separated)
    #[arg(long, default_value = "http://localhost:5173")]
    pub allowed_origins: String,

    // Static asset roots as PREFIX=DIR (repeatable)
    #[arg(long = "static-root", default_value = "/uploads=public/uploads")]
    pub static_roots: Vec<String>,

    // Worker restart backoff base in milliseconds
    #[arg(long, default_value_t = 100)]
    pub restart_base_ms: u64,

    // Worker restart backoff cap in milliseconds
    #[arg(long, default_value_t = 5000)]
    pub restart_max_ms: u64,

    // Alert after this many consecutive rapid exits of one worker slot
    #[arg(long, default_value_t = 5)]
    pub restart_alert_after: u32,
}

impl Args {
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        thread::available_parallelism().map(usize::from).unwrap_or(1)
    }

    pub fn origins(&self) -> Vec<String> {
        self.allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.rate_window)
    }

    pub fn static_root_mappings(&self) -> anyhow::Result<Vec<(String, PathBuf)>> {
        self.static_roots
            .iter()
            .map(|mapping| {
                let (prefix, dir) = mapping
                    .split_once('=')
                    .with_context(|| format!("static root `{mapping}` is not PREFIX=DIR"))?;
                if !prefix.starts_with('/') || prefix == "/" {
                    bail!("static root prefix `{prefix}` must start with / and not be the root");
                }
                Ok((prefix.to_string(), PathBuf::from(dir)))
            })
            .collect()
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy {
            base_delay: Duration::from_millis(self.restart_base_ms),
            max_delay: Duration::from_millis(self.restart_max_ms),
            alert_after: self.restart_alert_after,
            ..RestartPolicy::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["storefront-server"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn defaults_match_the_documented_config() {
        let args = args(&[]);
        assert_eq!(args.port, 7021);
        assert_eq!(args.rate_limit, 1000);
        assert_eq!(args.rate_window, 300);
        assert_eq!(args.origins(), vec!["http://localhost:5173".to_string()]);
    }

    #[test]
    fn origins_split_and_trim() {
        let args = args(&["--allowed-origins", "http://a.test, http://b.test ,"]);
        assert_eq!(
            args.origins(),
            vec!["http://a.test".to_string(), "http://b.test".to_string()]
        );
    }

    #[test]
    fn static_roots_parse() {
        let args = args(&["--static-root", "/uploads=public/uploads"]);
        let roots = args.static_root_mappings().unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].0, "/uploads");
        assert_eq!(roots[0].1, PathBuf::from("public/uploads"));
    }

    #[test]
    fn static_root_without_separator_is_rejected() {
        let args = args(&["--static-root", "uploads"]);
        assert!(args.static_root_mappings().is_err());
    }

    #[test]
    fn static_root_at_slash_is_rejected() {
        let args = args(&["--static-root", "/=public"]);
        assert!(args.static_root_mappings().is_err());
    }

    #[test]
    fn worker_count_is_never_zero() {
        assert!(args(&[]).worker_count() >= 1);
        assert_eq!(args(&["--workers", "3"]).worker_count(), 3);
    }
}
