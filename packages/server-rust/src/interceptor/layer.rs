//! Tower install for async hosts.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use http::{Request, Response};
use tower::{Layer, Service};

use super::audit::{AuditInterceptor, ExecutionMode, Registration};
use super::body::TrackedBody;
use crate::scope;

// ---------------------------------------------------------------------------
// AuditLayer
// ---------------------------------------------------------------------------

/// Tower layer that registers write handlers for each tracked request and
/// keeps them connected until the response body has been sent.
///
/// Saves issued while the inner service runs are stamped, including those
/// made through [`save_offloaded`](super::save_offloaded). Work the service
/// hands to `tokio::spawn` or `spawn_blocking` is not, unless it is wrapped
/// with [`scope::propagate`] or [`scope::wrap_blocking`].
#[derive(Debug, Clone)]
pub struct AuditLayer {
    interceptor: AuditInterceptor,
}

impl AuditLayer {
    #[must_use]
    pub fn new(interceptor: AuditInterceptor) -> Self {
        Self {
            interceptor: interceptor.with_mode(ExecutionMode::Cooperative),
        }
    }
}

impl Default for AuditLayer {
    fn default() -> Self {
        Self::new(AuditInterceptor::from_globals())
    }
}

impl<S> Layer<S> for AuditLayer {
    type Service = AuditService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuditService {
            inner,
            interceptor: self.interceptor.clone(),
        }
    }
}

/// Wraps `app` so every tracked request it serves is stamped.
pub fn wrap_application<S>(app: S, interceptor: AuditInterceptor) -> AuditService<S> {
    AuditLayer::new(interceptor).layer(app)
}

// ---------------------------------------------------------------------------
// AuditService
// ---------------------------------------------------------------------------

/// Service produced by [`AuditLayer`].
#[derive(Debug, Clone)]
pub struct AuditService<S> {
    inner: S,
    interceptor: AuditInterceptor,
}

impl<S> AuditService<S> {
    #[must_use]
    pub fn interceptor(&self) -> &AuditInterceptor {
        &self.interceptor
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for AuditService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Send,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<TrackedBody<ResBody>>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let registration = self.interceptor.begin(&request);
        let key = registration.as_ref().map(Registration::key);
        let fut = scope::run_in(key, || self.inner.call(request));

        Box::pin(async move {
            let result = match key {
                Some(key) => scope::in_scope(key, fut).await,
                None => fut.await,
            };
            match result {
                Ok(response) => Ok(response.map(|body| TrackedBody::new(body, registration))),
                Err(err) => {
                    drop(registration);
                    Err(err)
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::Arc;

    use auditlog_core::{FieldRegistry, Principal, Record, RecordType, Value};
    use bytes::Bytes;
    use http::{Method, StatusCode};
    use http_body_util::{BodyExt, Full};
    use tower::util::BoxCloneService;
    use tower::ServiceExt;

    use super::*;
    use crate::capture::Capturer;
    use crate::config::AuditSettings;
    use crate::interceptor::offload::save_offloaded;
    use crate::signals::WriteSignals;
    use crate::storage::ModelStore;

    const NOTE: RecordType = RecordType::new("note");

    fn interceptor(signals: &Arc<WriteSignals>) -> AuditInterceptor {
        let registry = Arc::new(FieldRegistry::new());
        registry
            .declare(NOTE)
            .last_modified_by("modified_by")
            .created_by("created_by");
        AuditInterceptor::new(
            registry,
            Arc::clone(signals),
            Capturer::from_settings(Arc::new(AuditSettings::default())),
        )
    }

    fn request(method: Method, user: &str) -> Request<Full<Bytes>> {
        let mut req = Request::builder()
            .method(method)
            .uri("/notes/")
            .body(Full::new(Bytes::new()))
            .unwrap();
        req.extensions_mut().insert(Principal::new(user));
        req
    }

    type TestApp = BoxCloneService<Request<Full<Bytes>>, Response<Full<Bytes>>, Infallible>;

    /// Saves one note through the blocking pool and replies with its pk.
    fn saving_app(store: Arc<ModelStore>) -> TestApp {
        BoxCloneService::new(tower::service_fn(move |_req: Request<Full<Bytes>>| {
            let store = Arc::clone(&store);
            async move {
                let (_note, outcome) = save_offloaded(store, Record::new(NOTE)).await.unwrap();
                let body = Full::new(Bytes::from(outcome.pk.to_string()));
                Ok::<_, Infallible>(Response::new(body))
            }
        }))
    }

    #[tokio::test]
    async fn post_is_stamped_and_released_after_body() {
        let signals = Arc::new(WriteSignals::new());
        let store = Arc::new(ModelStore::in_memory(Arc::clone(&signals)));
        let svc = AuditLayer::new(interceptor(&signals)).layer(saving_app(Arc::clone(&store)));

        let response = svc.oneshot(request(Method::POST, "alice")).await.unwrap();
        assert!(response.body().is_tracking());
        assert_eq!(signals.pre_write.receiver_count(), 1);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let pk: u64 = std::str::from_utf8(&body).unwrap().parse().unwrap();
        assert_eq!(signals.pre_write.receiver_count(), 0);

        let stored = store.load(NOTE, pk).unwrap();
        assert_eq!(stored.get("created_by"), &Value::from("alice"));
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn get_passes_through_untracked() {
        let signals = Arc::new(WriteSignals::new());
        let store = Arc::new(ModelStore::in_memory(Arc::clone(&signals)));
        let svc = wrap_application(saving_app(Arc::clone(&store)), interceptor(&signals));

        let response = svc.oneshot(request(Method::GET, "alice")).await.unwrap();
        assert!(!response.body().is_tracking());
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn inner_error_releases_before_returning() {
        let signals = Arc::new(WriteSignals::new());
        let failing = tower::service_fn(|_req: Request<Full<Bytes>>| async {
            Err::<Response<Full<Bytes>>, _>(std::io::Error::other("upstream failed"))
        });
        let svc = AuditLayer::new(interceptor(&signals)).layer(failing);

        let err = svc.oneshot(request(Method::POST, "alice")).await.unwrap_err();
        assert_eq!(err.to_string(), "upstream failed");
        assert_eq!(signals.pre_write.receiver_count(), 0);
    }

    #[tokio::test]
    async fn cancelled_request_releases_registration() {
        let signals = Arc::new(WriteSignals::new());
        let pending = tower::service_fn(|_req: Request<Full<Bytes>>| async {
            std::future::pending::<Result<Response<Full<Bytes>>, Infallible>>().await
        });
        let mut svc = AuditLayer::new(interceptor(&signals)).layer(pending);

        let fut = svc.call(request(Method::POST, "alice"));
        assert_eq!(signals.pre_write.receiver_count(), 1);
        drop(fut);
        assert_eq!(signals.pre_write.receiver_count(), 0);
    }

    #[tokio::test]
    async fn websocket_handshake_is_not_registered() {
        let signals = Arc::new(WriteSignals::new());
        let echo = tower::service_fn(|_req: Request<Full<Bytes>>| async {
            let mut response = Response::new(Full::new(Bytes::new()));
            *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
            Ok::<_, Infallible>(response)
        });
        let svc = AuditLayer::new(interceptor(&signals)).layer(echo);

        let mut req = request(Method::GET, "alice");
        req.headers_mut()
            .insert(http::header::UPGRADE, http::HeaderValue::from_static("websocket"));
        let response = svc.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert!(!response.body().is_tracking());
    }

    #[tokio::test]
    async fn post_with_unhonoured_upgrade_is_stamped() {
        let signals = Arc::new(WriteSignals::new());
        let store = Arc::new(ModelStore::in_memory(Arc::clone(&signals)));
        let svc = AuditLayer::new(interceptor(&signals)).layer(saving_app(Arc::clone(&store)));

        let mut req = request(Method::POST, "alice");
        req.headers_mut()
            .insert(http::header::UPGRADE, http::HeaderValue::from_static("h2c"));
        let response = svc.oneshot(req).await.unwrap();
        assert!(response.body().is_tracking());

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let pk: u64 = std::str::from_utf8(&body).unwrap().parse().unwrap();
        let stored = store.load(NOTE, pk).unwrap();
        assert_eq!(stored.get("created_by"), &Value::from("alice"));
        assert_eq!(stored.get("modified_by"), &Value::from("alice"));
        assert_eq!(signals.pre_write.receiver_count(), 0);
    }

    #[tokio::test]
    async fn interleaved_requests_keep_their_own_identity() {
        let signals = Arc::new(WriteSignals::new());
        let store = Arc::new(ModelStore::in_memory(Arc::clone(&signals)));
        let svc = AuditLayer::new(interceptor(&signals)).layer(saving_app(Arc::clone(&store)));

        let run = |user: &'static str| {
            let svc = svc.clone();
            let store = Arc::clone(&store);
            async move {
                let mut pks = Vec::new();
                for _ in 0..10 {
                    let response = svc.clone().oneshot(request(Method::PUT, user)).await.unwrap();
                    let body = response.into_body().collect().await.unwrap().to_bytes();
                    pks.push(std::str::from_utf8(&body).unwrap().parse::<u64>().unwrap());
                    tokio::task::yield_now().await;
                }
                for pk in pks {
                    let stored = store.load(NOTE, pk).unwrap();
                    assert_eq!(stored.get("created_by"), &Value::from(user));
                    assert_eq!(stored.get("modified_by"), &Value::from(user));
                }
            }
        };
        tokio::join!(run("alice"), run("bob"));
        assert_eq!(signals.post_write.receiver_count(), 0);
    }
}
