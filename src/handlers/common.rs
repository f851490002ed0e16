use crate::{
    errors::{ApiError, ServiceError},
    middleware_helpers::session::{with_session_cookie, SessionCookie},
    services::cart::SessionWrite,
    ApiResponse,
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use validator::Validate;

/// Standard success response
pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

/// Standard created response
pub fn created_response<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(ApiResponse::success(data))).into_response()
}

/// Standard no content response
pub fn no_content_response() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

/// Validate request input, reporting every failing field
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ApiError> {
    input
        .validate()
        .map_err(|e| ApiError::ServiceError(ServiceError::from(e)))
}

/// Map service errors to API errors
pub fn map_service_error(err: ServiceError) -> ApiError {
    ApiError::ServiceError(err)
}

/// Renders `data` and refreshes the session cookie for `key`.
pub fn session_response<T: Serialize>(
    status: StatusCode,
    key: impl Into<String>,
    write: SessionWrite<T>,
    render: impl FnOnce(T) -> Response,
) -> Response {
    let mut response = render(write.value);
    *response.status_mut() = status;
    with_session_cookie(
        response,
        SessionCookie::Issue {
            key: key.into(),
            expire_at_browser_close: write.expire_at_browser_close,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::SET_COOKIE;

    #[derive(Debug, Validate)]
    struct Named {
        #[validate(length(min = 1, message = "Name is required"))]
        name: String,
    }

    #[test]
    fn validation_failures_become_field_errors() {
        let err = validate_input(&Named { name: String::new() }).unwrap_err();
        match err {
            ApiError::ServiceError(ServiceError::InvalidFields(fields)) => {
                assert_eq!(fields[0].field, "name");
                assert_eq!(fields[0].message, "Name is required");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn session_response_attaches_cookie_instruction() {
        let response = session_response(
            StatusCode::CREATED,
            "k".repeat(32),
            SessionWrite {
                value: 7,
                expire_at_browser_close: true,
            },
            success_response,
        );
        assert_eq!(response.status(), StatusCode::CREATED);
        // Rendering happens in the middleware.
        assert!(response.headers().get(SET_COOKIE).is_none());
        assert_eq!(
            response.extensions().get::<SessionCookie>(),
            Some(&SessionCookie::Issue {
                key: "k".repeat(32),
                expire_at_browser_close: true,
            })
        );
    }
}
