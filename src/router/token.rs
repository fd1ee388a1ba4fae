//! Issue a brand new token pair.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::Result;
use crate::router::Valid;
use crate::store::Device;
use crate::token::TokenPair;
use crate::AppState;

#[derive(Debug, Validate, Serialize, Deserialize)]
pub struct Body {
    #[validate(length(
        min = 1,
        max = 255,
        message = "User ID must contain between 1 and 255 characters."
    ))]
    pub user_id: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub access_token: String,
    pub refresh_token: String,
}

impl From<TokenPair> for Response {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
        }
    }
}

/// Handler to issue tokens.
pub async fn handler(
    State(state): State<AppState>,
    device: Device,
    Valid(body): Valid<Body>,
) -> Result<Json<Response>> {
    let issued = state.issuer.issue(&body.user_id)?;
    state
        .store
        .save(&issued.pending.into_record(device))
        .await?;

    metrics::counter!("tokens_issued_total").increment(1);
    tracing::info!(
        user_id = body.user_id,
        pair_id = issued.pair.pair_id,
        "token pair issued"
    );

    Ok(Json(issued.pair.into()))
}
