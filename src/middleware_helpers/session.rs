use crate::{
    session::{SessionData, SessionManager},
    AppState,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{
        header::{COOKIE, SET_COOKIE},
        request::Parts,
        HeaderMap, HeaderValue,
    },
    middleware::Next,
    response::Response,
};
use std::{convert::Infallible, sync::Arc, time::Duration};
use tracing::warn;

pub const SESSION_COOKIE_NAME: &str = "sessionid";

/// Session key resolved for the current request.
///
/// `is_new` is true when the client sent no usable cookie; the key is then only
/// persisted if a handler saves session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub key: String,
    pub is_new: bool,
}

impl SessionContext {
    pub fn fresh() -> Self {
        Self {
            key: SessionManager::generate_key(),
            is_new: true,
        }
    }
}

/// Instruction attached to a response telling the middleware how to update the cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCookie {
    Issue {
        key: String,
        expire_at_browser_close: bool,
    },
    Clear,
}

impl SessionCookie {
    pub fn issue(key: impl Into<String>, data: &SessionData) -> Self {
        SessionCookie::Issue {
            key: key.into(),
            expire_at_browser_close: data.expire_at_browser_close,
        }
    }
}

/// Attaches `cookie` to `response` for [`session_middleware`] to render.
pub fn with_session_cookie(mut response: Response, cookie: SessionCookie) -> Response {
    response.extensions_mut().insert(cookie);
    response
}

/// Finds the `sessionid` value across every `Cookie` header.
pub fn session_key_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE_NAME)
        .map(|(_, value)| value.trim().to_string())
        .filter(|key| SessionManager::is_well_formed_key(key))
}

pub fn build_set_cookie(cookie: &SessionCookie, max_age: Duration, secure: bool) -> String {
    let mut value = match cookie {
        SessionCookie::Issue {
            key,
            expire_at_browser_close,
        } => {
            let mut v = format!(
                "{}={}; Path=/; HttpOnly; SameSite=Lax",
                SESSION_COOKIE_NAME, key
            );
            if !expire_at_browser_close {
                v.push_str(&format!("; Max-Age={}", max_age.as_secs()));
            }
            v
        }
        SessionCookie::Clear => format!(
            "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
            SESSION_COOKIE_NAME
        ),
    };
    if secure {
        value.push_str("; Secure");
    }
    value
}

/// Resolves the session key for each request and writes `Set-Cookie` on the way out.
pub async fn session_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let context = match session_key_from_headers(request.headers()) {
        Some(key) => SessionContext { key, is_new: false },
        None => SessionContext::fresh(),
    };
    request.extensions_mut().insert(context);

    let mut response = next.run(request).await;

    if let Some(cookie) = response.extensions_mut().remove::<SessionCookie>() {
        let rendered = build_set_cookie(
            &cookie,
            state.sessions.ttl(),
            state.config.session_cookie_secure,
        );
        match HeaderValue::from_str(&rendered) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => warn!("Could not render session cookie: {}", e),
        }
    }

    response
}

#[async_trait]
impl<S> FromRequestParts<S> for SessionContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<SessionContext>()
            .cloned()
            .unwrap_or_else(SessionContext::fresh))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_session_cookie_among_others() {
        let key = SessionManager::generate_key();
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark"));
        headers.append(
            COOKIE,
            HeaderValue::from_str(&format!("lang=vi; sessionid={}", key)).unwrap(),
        );
        assert_eq!(session_key_from_headers(&headers), Some(key));
    }

    #[test]
    fn malformed_session_cookie_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("sessionid=../../etc"));
        assert_eq!(session_key_from_headers(&headers), None);
    }

    #[test]
    fn browser_close_sessions_have_no_max_age() {
        let cookie = SessionCookie::Issue {
            key: "k".into(),
            expire_at_browser_close: true,
        };
        let rendered = build_set_cookie(&cookie, Duration::from_secs(60), false);
        assert_eq!(rendered, "sessionid=k; Path=/; HttpOnly; SameSite=Lax");
    }

    #[test]
    fn persistent_sessions_carry_max_age_and_secure() {
        let cookie = SessionCookie::Issue {
            key: "k".into(),
            expire_at_browser_close: false,
        };
        let rendered = build_set_cookie(&cookie, Duration::from_secs(60), true);
        assert!(rendered.contains("Max-Age=60"));
        assert!(rendered.ends_with("; Secure"));
    }

    #[test]
    fn clear_expires_immediately() {
        let rendered = build_set_cookie(&SessionCookie::Clear, Duration::from_secs(60), false);
        assert!(rendered.starts_with("sessionid=;"));
        assert!(rendered.contains("Max-Age=0"));
    }
}
