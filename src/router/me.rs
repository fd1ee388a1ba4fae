//! Identify the bearer of an access token.

use axum::Json;
use serde::{Deserialize, Serialize};

use crate::guard::Authenticated;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub user_id: String,
}

pub async fn handler(Authenticated(claims): Authenticated) -> Json<Response> {
    Json(Response {
        user_id: claims.user_id,
    })
}
