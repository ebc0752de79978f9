//! Session key resolvers.

use http::header::COOKIE;

use super::{CaptureError, RequestHead};

/// Session key attached to a request by an upstream session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKey(pub String);

/// Resolves the session key of a request.
pub trait SessionResolver: Send + Sync {
    /// Returns the session key, or `None` if no session is attached.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError`] if the session cannot be determined.
    fn resolve(&self, request: &dyn RequestHead) -> Result<Option<String>, CaptureError>;
}

/// Reads the session key from a [`SessionKey`] extension, falling back to
/// the named session cookie.
#[derive(Debug, Clone)]
pub struct CookieSession {
    cookie_name: String,
}

impl CookieSession {
    #[must_use]
    pub fn new(cookie_name: impl Into<String>) -> Self {
        Self {
            cookie_name: cookie_name.into(),
        }
    }

    fn find_cookie<'a>(&self, header: &'a str) -> Option<&'a str> {
        header
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie_name)
            .map(|(_, value)| value.trim().trim_matches('"'))
            .filter(|value| !value.is_empty())
    }
}

impl Default for CookieSession {
    fn default() -> Self {
        Self::new("sessionid")
    }
}

impl SessionResolver for CookieSession {
    fn resolve(&self, request: &dyn RequestHead) -> Result<Option<String>, CaptureError> {
        if let Some(SessionKey(key)) = request.extensions().get::<SessionKey>() {
            return Ok(Some(key.clone()));
        }
        for header in request.headers().get_all(COOKIE) {
            let header = header
                .to_str()
                .map_err(|_| CaptureError::MalformedHeader { header: "cookie" })?;
            if let Some(value) = self.find_cookie(header) {
                return Ok(Some(value.to_string()));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use http::{HeaderValue, Request};

    use super::*;

    fn with_cookies(cookies: &[&str]) -> Request<()> {
        let mut req = Request::new(());
        for cookie in cookies {
            req.headers_mut()
                .append(COOKIE, HeaderValue::from_str(cookie).unwrap());
        }
        req
    }

    #[test]
    fn no_cookie_means_no_session() {
        let session = CookieSession::default();
        assert!(session.resolve(&Request::new(())).unwrap().is_none());
    }

    #[test]
    fn finds_named_cookie_among_others() {
        let session = CookieSession::default();
        let req = with_cookies(&["csrftoken=xyz; sessionid=abc123; theme=dark"]);
        assert_eq!(session.resolve(&req).unwrap().as_deref(), Some("abc123"));
    }

    #[test]
    fn searches_every_cookie_header() {
        let session = CookieSession::new("sid");
        let req = with_cookies(&["theme=dark", "sid=\"quoted\""]);
        assert_eq!(session.resolve(&req).unwrap().as_deref(), Some("quoted"));
    }

    #[test]
    fn empty_cookie_value_is_no_session() {
        let session = CookieSession::default();
        let req = with_cookies(&["sessionid="]);
        assert!(session.resolve(&req).unwrap().is_none());
    }

    #[test]
    fn cookie_name_must_match_exactly() {
        let session = CookieSession::default();
        let req = with_cookies(&["xsessionid=nope"]);
        assert!(session.resolve(&req).unwrap().is_none());
    }

    #[test]
    fn extension_takes_precedence() {
        let session = CookieSession::default();
        let mut req = with_cookies(&["sessionid=from-cookie"]);
        req.extensions_mut()
            .insert(SessionKey("from-extension".to_string()));
        assert_eq!(
            session.resolve(&req).unwrap().as_deref(),
            Some("from-extension")
        );
    }

    #[test]
    fn non_utf8_cookie_is_an_error() {
        let mut req = Request::new(());
        req.headers_mut()
            .insert(COOKIE, HeaderValue::from_bytes(b"sessionid=\xfe").unwrap());
        let err = CookieSession::default().resolve(&req).unwrap_err();
        assert!(matches!(err, CaptureError::MalformedHeader { header: "cookie" }));
    }
}
