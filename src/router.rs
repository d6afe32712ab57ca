use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;

use crate::error::ApiError;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Response, ApiError>> + Send>>;
type HandlerFn = Arc<dyn Fn(Request<Body>) -> HandlerFuture + Send + Sync>;

struct RouteEntry {
    prefix: String,
    methods: Option<Vec<Method>>,
    handler: HandlerFn,
}

// Longest-prefix router. Business handler modules are opaque collaborators:
// each entry maps a path prefix to an async fn taking the normalized request
// and returning a response or an ApiError.
pub struct PrefixRouter {
    entries: Vec<RouteEntry>,
}

impl PrefixRouter {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    // Register a handler for a prefix, any method.
    pub fn route<H, F>(self, prefix: &str, handler: H) -> Self
    where
        H: Fn(Request<Body>) -> F + Send + Sync + 'static,
        F: Future<Output = Result<Response, ApiError>> + Send + 'static,
    {
        self.add(prefix, None, handler)
    }

    // Register a handler restricted to the given methods.
    pub fn route_methods<H, F>(self, prefix: &str, methods: Vec<Method>, handler: H) -> Self
    where
        H: Fn(Request<Body>) -> F + Send + Sync + 'static,
        F: Future<Output = Result<Response, ApiError>> + Send + 'static,
    {
        self.add(prefix, Some(methods), handler)
    }

    fn add<H, F>(mut self, prefix: &str, methods: Option<Vec<Method>>, handler: H) -> Self
    where
        H: Fn(Request<Body>) -> F + Send + Sync + 'static,
        F: Future<Output = Result<Response, ApiError>> + Send + 'static,
    {
        self.entries.push(RouteEntry {
            prefix: prefix.to_string(),
            methods,
            handler: Arc::new(move |req| Box::pin(handler(req))),
        });
        // longest prefix first, so resolution is a simple scan
        self.entries
            .sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        self
    }

    // A prefix matches when the path equals it or continues it at a `/`
    // boundary: `/api/cart` matches `/api/cart` and `/api/cart/7`, not
    // `/api/cartel`.
    fn prefix_matches(prefix: &str, path: &str) -> bool {
        match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    fn resolve(&self, method: &Method, path: &str) -> Option<HandlerFn> {
        self.entries
            .iter()
            .find(|entry| {
                Self::prefix_matches(&entry.prefix, path)
                    && entry
                        .methods
                        .as_ref()
                        .is_none_or(|methods| methods.contains(method))
            })
            .map(|entry| Arc::clone(&entry.handler))
    }

    // Dispatch to the matching handler, or fall through to the not-found
    // terminal. The terminal is pure: repeated misses yield identical
    // responses and touch no state.
    pub async fn dispatch(&self, req: Request<Body>) -> Result<Response, ApiError> {
        let path = req.uri().path().to_owned();
        match self.resolve(req.method(), &path) {
            Some(handler) => handler(req).await,
            None => Err(ApiError::NotFound(path)),
        }
    }
}

impl Default for PrefixRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    fn tagged(tag: &'static str) -> impl Fn(Request<Body>) -> HandlerFuture {
        move |_req| Box::pin(async move { Ok(tag.into_response()) })
    }

    async fn resolve_tag(router: &PrefixRouter, method: Method, path: &str) -> Option<String> {
        let handler = router.resolve(&method, path)?;
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        let res = handler(req).await.unwrap();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        Some(String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn longest_prefix_wins() {
        let router = PrefixRouter::new()
            .route("/api/cart", tagged("cart"))
            .route("/api/cart/items", tagged("items"));

        assert_eq!(
            resolve_tag(&router, Method::GET, "/api/cart/items/5").await,
            Some("items".to_string())
        );
        assert_eq!(
            resolve_tag(&router, Method::GET, "/api/cart/7").await,
            Some("cart".to_string())
        );
    }

    #[tokio::test]
    async fn registration_order_does_not_matter() {
        let router = PrefixRouter::new()
            .route("/api/cart/items", tagged("items"))
            .route("/api/cart", tagged("cart"));

        assert_eq!(
            resolve_tag(&router, Method::GET, "/api/cart/items/5").await,
            Some("items".to_string())
        );
    }

    #[test]
    fn matches_on_segment_boundaries_only() {
        assert!(PrefixRouter::prefix_matches("/api/cart", "/api/cart"));
        assert!(PrefixRouter::prefix_matches("/api/cart", "/api/cart/7"));
        assert!(!PrefixRouter::prefix_matches("/api/cart", "/api/cartel"));
        assert!(!PrefixRouter::prefix_matches("/api/cart", "/api"));
    }

    #[tokio::test]
    async fn unmatched_path_is_not_found() {
        let router = PrefixRouter::new().route("/api/cart", tagged("cart"));
        let req = Request::builder()
            .uri("/api/nope")
            .body(Body::empty())
            .unwrap();

        match router.dispatch(req).await {
            Err(ApiError::NotFound(path)) => assert_eq!(path, "/api/nope"),
            Err(other) => panic!("expected NotFound, got {other:?}"),
            Ok(_) => panic!("expected NotFound, got a response"),
        }
    }

    #[tokio::test]
    async fn method_restriction_is_honored() {
        let router = PrefixRouter::new().route_methods(
            "/metrics",
            vec![Method::GET],
            tagged("metrics"),
        );

        assert!(router.resolve(&Method::GET, "/metrics").is_some());
        assert!(router.resolve(&Method::POST, "/metrics").is_none());
    }
}
