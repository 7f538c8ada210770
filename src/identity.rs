//! Identity Gate: verifies bearer tokens against the configured trust root and
//! attaches a `Principal` to each request.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
struct IdentityClaims {
    sub: String,
    exp: i64,
}

/// The authenticated subject extracted from a verified bearer token.
#[derive(Debug, Clone)]
pub struct Principal {
    pub subject: String,
}

impl FromRequestParts<Arc<AppState>> for Principal {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::Unauthenticated)?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or(AppError::Unauthenticated)?;

        let decoding_key = DecodingKey::from_rsa_pem(state.identity_trust_root.as_bytes())
            .map_err(|_| AppError::Unauthenticated)?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_required_spec_claims(&["sub", "exp"]);

        let data = decode::<IdentityClaims>(token, &decoding_key, &validation)
            .map_err(|_| AppError::Unauthenticated)?;

        Ok(Principal {
            subject: data.claims.sub,
        })
    }
}

/// Enforces "subject owns this resource" for every `:userId`-scoped route.
/// A mismatch is surfaced as `NotFound` so a caller cannot distinguish
/// "not yours" from "does not exist".
pub fn require_owner(principal: &Principal, user_id: &str) -> Result<(), AppError> {
    if principal.subject == user_id {
        Ok(())
    } else {
        Err(AppError::ownership_mismatch(&principal.subject, user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_subject_is_allowed() {
        let principal = Principal {
            subject: "user-1".to_string(),
        };
        assert!(require_owner(&principal, "user-1").is_ok());
    }

    #[test]
    fn different_subject_is_not_found() {
        let principal = Principal {
            subject: "user-1".to_string(),
        };
        assert!(matches!(
            require_owner(&principal, "user-2"),
            Err(AppError::NotFound)
        ));
    }
}
