//! Caller identity.
//!
//! Authentication happens in the fronting layer, which forwards the
//! authenticated user id in a header. Requests without it are anonymous.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use tessera_core::AppError;
use tessera_services::Principal;

use crate::error::HttpAppError;

pub const PRINCIPAL_HEADER: &str = "x-principal-id";

/// Extractor wrapping the services-layer [`Principal`].
#[derive(Debug, Clone)]
pub struct Caller(pub Principal);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = HttpAppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(PRINCIPAL_HEADER) else {
            return Ok(Caller(Principal::anonymous()));
        };
        let user_id = value
            .to_str()
            .map_err(|_| AppError::BadRequest(format!("{} is not valid ASCII", PRINCIPAL_HEADER)))?
            .trim();
        if user_id.is_empty() {
            return Ok(Caller(Principal::anonymous()));
        }
        Ok(Caller(Principal::new(user_id)))
    }
}
