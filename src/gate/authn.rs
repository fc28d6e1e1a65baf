use std::sync::Arc;

use axum::extract::Request;
use axum::http::{header, HeaderMap};

use super::{request_path, Gate};
use crate::errors::AppError;
use crate::jwt::{AuthUser, TokenCodec};

/// `Unauthenticated -> TokenExtracted -> {Authenticated | Rejected}`.
///
/// On success the resolved [`AuthUser`] is attached to the request extensions.
pub struct AuthenticationGate {
    tokens: Arc<TokenCodec>,
}

impl AuthenticationGate {
    pub fn new(tokens: Arc<TokenCodec>) -> Self {
        Self { tokens }
    }
}

impl Gate for AuthenticationGate {
    fn name(&self) -> &'static str {
        "authentication"
    }

    fn check(&self, request: &mut Request) -> Result<(), AppError> {
        let Some(token) = bearer_token(request.headers()) else {
            tracing::info!(
                target: "audit",
                method = %request.method(),
                path = %request_path(request),
                "authentication rejected: missing credential"
            );
            return Err(AppError::MissingCredential);
        };

        let subject = self.tokens.validate(token).map_err(|err| {
            tracing::info!(
                target: "audit",
                method = %request.method(),
                path = %request_path(request),
                reason = %err,
                "authentication rejected"
            );
            err
        })?;

        request.extensions_mut().insert(AuthUser { username: subject });
        Ok(())
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn extracts_bearer_token() {
        assert_eq!(bearer_token(&headers("Bearer abc.def.ghi")), Some("abc.def.ghi"));
        assert_eq!(bearer_token(&headers("bearer   abc")), Some("abc"));
    }

    #[test]
    fn rejects_other_schemes_and_empty_tokens() {
        assert_eq!(bearer_token(&headers("Basic dXNlcjpwYXNz")), None);
        assert_eq!(bearer_token(&headers("Bearer")), None);
        assert_eq!(bearer_token(&headers("Bearer    ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
