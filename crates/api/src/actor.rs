//! Caller identity established by the gateway.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use common::{Actor, Role, UserId};
use uuid::Uuid;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ROLE_HEADER: &str = "x-user-role";
pub const KYC_LEVEL_HEADER: &str = "x-kyc-level";

/// Extracts the [`Actor`] from the gateway headers, rejecting with 401.
#[derive(Debug, Clone, Copy)]
pub struct CurrentActor(pub Actor);

impl<S: Send + Sync> FromRequestParts<S> for CurrentActor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        actor_from_headers(&parts.headers).map(CurrentActor)
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, ApiError> {
    headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map(str::trim)
                .map_err(|_| ApiError::Unauthorized(format!("Invalid {name} header")))
        })
        .transpose()
}

pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, ApiError> {
    let id = header(headers, USER_ID_HEADER)?
        .ok_or_else(|| ApiError::Unauthorized("Authentication required".to_string()))?;
    let id = Uuid::parse_str(id)
        .map_err(|_| ApiError::Unauthorized(format!("Invalid {USER_ID_HEADER} header")))?;

    let role: Role = header(headers, ROLE_HEADER)?
        .ok_or_else(|| ApiError::Unauthorized("Authentication required".to_string()))?
        .parse()
        .map_err(|_| ApiError::Unauthorized(format!("Invalid {ROLE_HEADER} header")))?;

    let kyc_level = match header(headers, KYC_LEVEL_HEADER)? {
        Some(level) => level
            .parse::<u8>()
            .map_err(|_| ApiError::Unauthorized(format!("Invalid {KYC_LEVEL_HEADER} header")))?,
        None => 0,
    };

    Ok(Actor::new(UserId::from_uuid(id), role).with_kyc_level(kyc_level))
}
