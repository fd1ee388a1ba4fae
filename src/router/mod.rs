//! HTTP surface of the token service.
pub mod logout;
pub mod me;
pub mod refresh;
pub mod status;
pub mod token;

use axum::extract::{FromRequest, Request};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::{AppState, ServerError};

/// JSON body that passed its `validator` rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct Valid<T>(pub T);

impl<T, S> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;

        Ok(Valid(value))
    }
}

/// Routes mounted under `/auth`.
pub fn router() -> Router<AppState> {
    Router::new()
        // `POST /auth/token` goes to `token`.
        .route("/token", post(token::handler))
        // `POST /auth/refresh` goes to `refresh`. Authorization required,
        // expired access tokens accepted.
        .route("/refresh", post(refresh::handler))
        // `GET /auth/me` goes to `me`. Authorization required.
        .route("/me", get(me::handler))
        // `POST /auth/logout` goes to `logout`. Authorization required.
        .route("/logout", post(logout::handler))
}
