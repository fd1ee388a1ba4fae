//! Rotate a token pair.

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::Result;
use crate::guard::bearer;
use crate::router::Valid;
use crate::router::token::Response;
use crate::store::Device;
use crate::{AppState, ServerError};

#[derive(Debug, Validate, Serialize, Deserialize)]
pub struct Body {
    #[validate(length(
        min = 1,
        max = 512,
        message = "Refresh token must contain between 1 and 512 characters."
    ))]
    refresh_token: String,
}

/// Handler to refresh tokens.
///
/// The access token may be expired; it only has to carry a valid
/// signature.
pub async fn handler(
    State(state): State<AppState>,
    device: Device,
    headers: HeaderMap,
    Valid(body): Valid<Body>,
) -> Result<Json<Response>> {
    let access_token = bearer(&headers).ok_or(ServerError::Unauthorized)?;

    let pair = state
        .rotator
        .rotate(access_token, &body.refresh_token, &device)
        .await?;

    Ok(Json(pair.into()))
}
