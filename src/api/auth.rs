use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::ApiState;
use super::error::ApiError;

/// Shared secret every control request must carry in `Authorization`.
#[derive(Clone)]
pub struct AuthCode(String);

impl AuthCode {
    /// Returns `None` for an empty code.
    pub fn new(code: impl Into<String>) -> Option<Self> {
        let code = code.into();
        (!code.is_empty()).then_some(Self(code))
    }

    pub fn verify(&self, presented: &[u8]) -> bool {
        let expected = self.0.as_bytes();

        expected.len() == presented.len()
            && expected
                .iter()
                .zip(presented)
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }
}

impl std::fmt::Debug for AuthCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthCode(..)")
    }
}

/// Reject requests without the right authorization code before they reach
/// any handler.
pub async fn require_auth(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    let authorized = request
        .headers()
        .get(AUTHORIZATION)
        .is_some_and(|x| state.auth.verify(x.as_bytes()));

    if !authorized {
        warn!(
            method = %request.method(),
            uri = %request.uri(),
            "rejected unauthorized request"
        );
        return ApiError::Unauthorized.into_response();
    }

    next.run(request).await
}
