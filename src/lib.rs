//! tokenpair issues paired access and refresh tokens, rotates them on
//! every refresh and revokes them on logout or device change.

#![forbid(unsafe_code)]
pub mod config;
pub mod crypto;
pub mod error;
pub mod guard;
pub mod notifier;
pub mod rotation;
mod router;
pub mod store;
pub mod sweeper;
pub mod telemetry;
pub mod token;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Method, StatusCode, header};
use axum::routing::get;
use axum::{Router, middleware as AxumMiddleware};
pub use error::ServerError;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use crate::config::Configuration;
use crate::crypto::SecretHasher;
use crate::guard::AuthGuard;
use crate::notifier::{AnomalyNotifier, WebhookNotifier};
use crate::rotation::RefreshRotator;
use crate::store::{PgStore, RefreshTokenStore, RevocationRegistry};
use crate::token::{Signer, TokenIssuer};

/// Peer address given to every test request.
#[cfg(test)]
pub const TEST_IP: &str = "127.0.0.1";
/// `User-Agent` given to every test request.
#[cfg(test)]
pub const TEST_AGENT: &str = "tokenpair-tests/1.0";

/// State backed by an in-memory store, cheap Argon2 parameters and no
/// webhook.
#[cfg(test)]
pub fn test_state() -> (AppState, Arc<store::memory::MemoryStore>) {
    let store = Arc::new(store::memory::MemoryStore::default());
    let state = build_state(
        Arc::new(Configuration::default()),
        token::tests::signer(),
        Arc::new(crypto::tests::hasher()),
        Duration::from_secs(60 * 60 * 24),
        store.clone(),
        Arc::new(notifier::Disabled),
    )
    .expect("cannot build test state");

    (state, store)
}

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    headers: &[(header::HeaderName, &str)],
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use std::net::SocketAddr;

    use axum::extract::{ConnectInfo, Request};
    use axum::http::HeaderValue;
    use tower::util::ServiceExt;

    let peer: SocketAddr = format!("{TEST_IP}:40000").parse().unwrap();
    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::USER_AGENT, TEST_AGENT)
        .extension(ConnectInfo(peer))
        .body(axum::body::Body::from(body))
        .unwrap();

    for (name, value) in headers {
        request
            .headers_mut()
            .insert(name.clone(), HeaderValue::from_str(value).unwrap());
    }

    app.oneshot(request).await.unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Configuration>,
    pub store: Arc<dyn RefreshTokenStore>,
    pub registry: Arc<dyn RevocationRegistry>,
    pub issuer: Arc<TokenIssuer>,
    pub rotator: Arc<RefreshRotator>,
    pub guard: Arc<AuthGuard>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(10)))
        // Remove sensitive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        .nest("/auth", router::router())
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Wire every component around an already opened store.
fn build_state<S>(
    config: Arc<Configuration>,
    signer: Arc<Signer>,
    hasher: Arc<SecretHasher>,
    refresh_lifetime: Duration,
    store: Arc<S>,
    notifier: Arc<dyn AnomalyNotifier>,
) -> Result<AppState, token::TokenError>
where
    S: RefreshTokenStore + RevocationRegistry + 'static,
{
    let registry: Arc<dyn RevocationRegistry> = store.clone();
    let store: Arc<dyn RefreshTokenStore> = store;

    let issuer = Arc::new(TokenIssuer::new(
        Arc::clone(&signer),
        Arc::clone(&hasher),
        refresh_lifetime,
    )?);
    let rotator = Arc::new(RefreshRotator::new(
        Arc::clone(&signer),
        Arc::clone(&issuer),
        hasher,
        Arc::clone(&store),
        Arc::clone(&registry),
        notifier,
    ));
    let guard = Arc::new(AuthGuard::new(signer, Arc::clone(&registry)));

    Ok(AppState {
        config,
        store,
        registry,
        issuer,
        rotator,
        guard,
    })
}

/// Initialize the application state.
pub async fn initialize_state(
    config: Arc<Configuration>,
) -> Result<AppState, Box<dyn std::error::Error>> {
    // without a secret every token would be forgeable.
    let Some(secret) = config.token.resolve_secret() else {
        tracing::error!(
            env = config::SECRET_ENV,
            "missing `token.secret` entry on `config.yaml` file"
        );
        return Err(token::TokenError::MissingSecret.into());
    };
    let signer = Arc::new(Signer::new(
        &secret,
        &config.url,
        config.token.access_lifetime(),
    )?);
    let hasher = Arc::new(SecretHasher::new(config.argon2.clone())?);

    let Some(postgres) = &config.postgres else {
        tracing::error!("missing `postgres` entry on `config.yaml` file");
        return Err("missing `postgres` configuration".into());
    };
    // execute migrations scripts on start.
    let store = Arc::new(PgStore::connect(postgres).await?);

    let notifier: Arc<dyn AnomalyNotifier> = match &config.notifier {
        Some(cfg) => Arc::new(WebhookNotifier::new(&cfg.endpoint, cfg.timeout())?),
        None => {
            tracing::warn!("no `notifier` entry on `config.yaml` file, IP changes are not reported");
            Arc::new(notifier::Disabled)
        },
    };

    Ok(build_state(
        Arc::clone(&config),
        signer,
        hasher,
        config.token.refresh_lifetime(),
        store,
        notifier,
    )?)
}
