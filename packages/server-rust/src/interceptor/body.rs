//! Response body that ends its request's registration.

use std::pin::Pin;
use std::task::{Context, Poll};

use http_body::{Body, Frame, SizeHint};

use super::audit::Registration;

/// Wraps a response body and holds the request's [`Registration`] until the
/// body has been sent.
///
/// The registration is released on the first of: end of stream, a body
/// error, or the body being dropped (e.g. the client went away).
pub struct TrackedBody<B> {
    inner: Pin<Box<B>>,
    registration: Option<Registration>,
}

impl<B> TrackedBody<B> {
    #[must_use]
    pub fn new(inner: B, registration: Option<Registration>) -> Self {
        Self {
            inner: Box::pin(inner),
            registration,
        }
    }

    /// Body that tracks nothing.
    #[must_use]
    pub fn untracked(inner: B) -> Self {
        Self::new(inner, None)
    }

    /// Returns `true` while the request's handlers are still connected.
    #[must_use]
    pub fn is_tracking(&self) -> bool {
        self.registration.is_some()
    }

    fn finish(&mut self, how: &'static str) {
        if let Some(registration) = self.registration.take() {
            tracing::trace!(registration = %registration.key(), how, "response finished");
            registration.close();
        }
    }
}

impl<B: Default> Default for TrackedBody<B> {
    fn default() -> Self {
        Self::untracked(B::default())
    }
}

impl<B: Body> Body for TrackedBody<B> {
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = this.inner.as_mut().poll_frame(cx);
        match &polled {
            Poll::Ready(None) => this.finish("end of stream"),
            Poll::Ready(Some(Err(_))) => this.finish("body error"),
            Poll::Ready(Some(Ok(_))) if this.inner.is_end_stream() => this.finish("last frame"),
            _ => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B> std::fmt::Debug for TrackedBody<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedBody")
            .field("registration", &self.registration)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use auditlog_core::{FieldRegistry, Principal, RegistrationKey, RequestContext};
    use bytes::Bytes;
    use http_body_util::{BodyExt, Full, StreamBody};

    use super::*;
    use crate::capture::Capturer;
    use crate::config::AuditSettings;
    use crate::interceptor::AuditInterceptor;
    use crate::signals::WriteSignals;

    fn registration(signals: &Arc<WriteSignals>) -> Registration {
        let interceptor = AuditInterceptor::new(
            Arc::new(FieldRegistry::new()),
            Arc::clone(signals),
            Capturer::from_settings(Arc::new(AuditSettings::default())),
        );
        interceptor.enter(RequestContext::new(
            Some(Principal::new("alice")),
            None,
            RegistrationKey::new("test"),
        ))
    }

    #[tokio::test]
    async fn collecting_the_body_releases_registration() {
        let signals = Arc::new(WriteSignals::new());
        let body = TrackedBody::new(Full::new(Bytes::from_static(b"ok")), Some(registration(&signals)));
        assert_eq!(signals.pre_write.receiver_count(), 1);

        let bytes = body.collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"ok");
        assert_eq!(signals.pre_write.receiver_count(), 0);
    }

    #[tokio::test]
    async fn registration_held_until_stream_ends() {
        let signals = Arc::new(WriteSignals::new());
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Frame<Bytes>, std::io::Error>>(4);
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        let mut body = TrackedBody::new(StreamBody::new(stream), Some(registration(&signals)));

        tx.send(Ok(Frame::data(Bytes::from_static(b"first")))).await.unwrap();
        let frame = body.frame().await.unwrap().unwrap();
        assert_eq!(frame.into_data().unwrap(), Bytes::from_static(b"first"));
        assert!(body.is_tracking());
        assert_eq!(signals.post_write.receiver_count(), 1);

        drop(tx);
        assert!(body.frame().await.is_none());
        assert!(!body.is_tracking());
        assert_eq!(signals.post_write.receiver_count(), 0);
    }

    #[tokio::test]
    async fn body_error_releases_registration() {
        let signals = Arc::new(WriteSignals::new());
        let stream = futures_util::stream::iter(vec![Err::<Frame<Bytes>, _>(std::io::Error::other(
            "reset",
        ))]);
        let body = TrackedBody::new(StreamBody::new(stream), Some(registration(&signals)));

        let err = body.collect().await.unwrap_err();
        assert_eq!(err.to_string(), "reset");
        assert_eq!(signals.pre_write.receiver_count(), 0);
    }

    #[test]
    fn dropping_unsent_body_releases_registration() {
        let signals = Arc::new(WriteSignals::new());
        let body = TrackedBody::new(Full::new(Bytes::new()), Some(registration(&signals)));
        drop(body);
        assert_eq!(signals.pre_write.receiver_count(), 0);
    }

    #[test]
    fn untracked_body_forwards_hints() {
        let body = TrackedBody::untracked(Full::new(Bytes::from_static(b"abc")));
        assert!(!body.is_tracking());
        assert_eq!(body.size_hint().exact(), Some(3));
    }
}
