//! Revoke the pairing behind an access token.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::Result;
use crate::guard::Authenticated;
use crate::rotation;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
}

pub async fn handler(
    State(state): State<AppState>,
    Authenticated(claims): Authenticated,
) -> Result<Json<Response>> {
    rotation::logout(state.registry.as_ref(), state.store.as_ref(), &claims).await?;

    tracing::info!(
        user_id = claims.user_id,
        pair_id = claims.pair_id,
        "user logged out"
    );

    Ok(Json(Response { success: true }))
}

#[cfg(test)]
mod tests {
    use axum::http::{StatusCode, header};
    use http_body_util::BodyExt;
    use serde_json::json;

    use super::Response;
    use crate::router::token::tests::issue;
    use crate::*;

    #[tokio::test]
    async fn test_logout_then_use() {
        let (state, store) = test_state();
        let pair = issue(app(state.clone()), "u2").await;
        let authorization = format!("Bearer {}", pair.access_token);

        let response = make_request(
            app(state.clone()),
            Method::POST,
            "/auth/logout",
            &[(header::AUTHORIZATION, authorization.as_str())],
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: Response = serde_json::from_slice(&body).unwrap();
        assert!(body.success);

        for (method, path, body) in [
            (Method::GET, "/auth/me", String::default()),
            (Method::POST, "/auth/logout", String::default()),
            (
                Method::POST,
                "/auth/refresh",
                json!({ "refresh_token": pair.refresh_token }).to_string(),
            ),
        ] {
            let response = make_request(
                app(state.clone()),
                method,
                path,
                &[(header::AUTHORIZATION, authorization.as_str())],
                body,
            )
            .await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }

        let claims = crate::token::tests::signer()
            .verify(&pair.access_token)
            .unwrap();
        assert!(store.get(&claims.pair_id).unwrap().revoked);
    }

    #[tokio::test]
    async fn test_logout_storage_failure() {
        let (state, store) = test_state();
        let pair = issue(app(state.clone()), "u2").await;

        // lookups must pass for the guard, only the write side fails.
        store.fail_revocations(true);
        let response = make_request(
            app(state),
            Method::POST,
            "/auth/logout",
            &[(
                header::AUTHORIZATION,
                format!("Bearer {}", pair.access_token).as_str(),
            )],
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
