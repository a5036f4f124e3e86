//! Webhook + health HTTP surface for the billing backend.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::state::AppState;
use crate::sync::parse_discord_id;

/// Webhook payload from the backend: `{type, data}`.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Run the HTTP server
pub async fn run(state: Arc<AppState>, bind_addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("Webhook server listening on {}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Create the router with all routes
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/webhooks/rolebot", post(webhook_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Outcome of checking the `Authorization` header against the shared secret.
#[derive(Debug, PartialEq, Eq)]
enum AuthCheck {
    Ok,
    MissingHeader,
    BadScheme,
    MissingToken,
    BadToken,
}

fn check_bearer(headers: &HeaderMap, expected: &str) -> AuthCheck {
    let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return AuthCheck::MissingHeader;
    };
    let mut parts = value.splitn(2, ' ');
    let scheme = parts.next().unwrap_or("");
    let token = parts.next().unwrap_or("").trim();
    if scheme != "Bearer" {
        return AuthCheck::BadScheme;
    }
    if token.is_empty() {
        return AuthCheck::MissingToken;
    }
    if token != expected {
        return AuthCheck::BadToken;
    }
    AuthCheck::Ok
}

fn reject(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

/// Webhook handler - POST /webhooks/rolebot
///
/// Fire-and-forget contract: once the request is authenticated and shaped
/// correctly, dispatch failures are swallowed and logged; the backend
/// retrying would not help, the daily pass converges everything anyway.
async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(event): Json<WebhookEvent>,
) -> Response {
    match check_bearer(&headers, &state.config.backend_api_token) {
        AuthCheck::Ok => {}
        AuthCheck::MissingHeader => {
            warn!("Webhook request missing authorization header");
            return reject(StatusCode::UNAUTHORIZED, "Missing authorization header");
        }
        AuthCheck::BadScheme => {
            warn!("Webhook request using invalid authorization scheme");
            return reject(StatusCode::UNAUTHORIZED, "Invalid authorization scheme");
        }
        AuthCheck::MissingToken => {
            warn!("Webhook request missing bearer token");
            return reject(StatusCode::UNAUTHORIZED, "Missing bearer token");
        }
        AuthCheck::BadToken => {
            warn!("Webhook request with invalid token");
            return reject(StatusCode::FORBIDDEN, "Invalid authentication token");
        }
    }

    let Some(event_type) = event.event_type.as_deref().filter(|t| !t.is_empty()) else {
        warn!("Webhook received without event type");
        return reject(StatusCode::BAD_REQUEST, "Event type required");
    };

    info!(event_type, "Received webhook from backend");
    dispatch_event(&state, event_type, &event.data).await;

    (StatusCode::OK, Json(serde_json::json!({ "ok": true }))).into_response()
}

async fn dispatch_event(state: &AppState, event_type: &str, data: &Value) {
    let discord_id = data
        .get("discordId")
        .and_then(|v| v.as_str())
        .and_then(parse_discord_id);

    match event_type {
        "subscription.activated" | "subscription.renewed" => {
            let Some(user) = discord_id else {
                warn!(event_type, "Payment event without a usable discordId");
                return;
            };
            state.sync.sync_user_on_payment(user).await;
        }
        "subscription.cancelled" => {
            // Role removal waits for the next reconciliation pass; the
            // backend moves the user into grace on its side.
            info!(?discord_id, "Subscription cancelled event received");
        }
        "grace_period.started" => {
            if !state.config.grace_dm_enabled {
                return;
            }
            let Some(user) = discord_id else {
                warn!(event_type, "Grace event without a usable discordId");
                return;
            };
            state
                .notifier
                .grace_reminder(user, state.config.grace_period_days)
                .await;
        }
        other => warn!(event_type = other, "Unknown webhook event type"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendClient;
    use crate::starboard::Starboard;
    use crate::sync::SyncService;
    use crate::testing::{MockBoardHost, MockNotifier, MockRoles, MockSource};
    use axum::http::HeaderValue;
    use guildhall_core::Config;
    use serde_json::json;
    use serenity::model::id::UserId;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn test_config() -> Config {
        Config {
            discord_token: "token".to_string(),
            guild_id: 1,
            subscribed_role_id: 2,
            staff_role_id: None,
            welcome_channel_id: None,
            welcome_image_url: None,
            backend_api_url: "http://localhost:3000".to_string(),
            backend_api_token: SECRET.to_string(),
            webhook_host: "127.0.0.1".to_string(),
            webhook_port: 3001,
            starboard_channel_id: None,
            starboard_threshold: 3,
            grace_period_days: 7,
            grace_dm_enabled: true,
            daily_sync_schedule: "59 23 * * *".to_string(),
            website_url: "https://example.test".to_string(),
            checkout_url: "https://example.test/checkout/".to_string(),
            persona_name: "Herald".to_string(),
            persona_avatar_url: None,
            role_sets: Vec::new(),
        }
    }

    struct Harness {
        state: Arc<AppState>,
        roles: Arc<MockRoles>,
        notifier: Arc<MockNotifier>,
    }

    fn harness() -> Harness {
        let config = test_config();
        let source = Arc::new(MockSource::default());
        let roles = Arc::new(MockRoles::default());
        let notifier = Arc::new(MockNotifier::default());
        let sync = Arc::new(SyncService::new(
            Arc::clone(&source),
            Arc::clone(&roles),
            Arc::clone(&notifier),
            config.grace_dm_enabled,
        ));
        let starboard = Arc::new(Starboard::new(
            Arc::new(MockBoardHost::default()),
            None,
            config.starboard_threshold,
        ));
        let backend = Arc::new(BackendClient::new(
            &config.backend_api_url,
            &config.backend_api_token,
        ));
        let state = Arc::new(AppState::new(
            config,
            backend,
            Arc::clone(&roles),
            Arc::clone(&notifier),
            sync,
            starboard,
        ));
        Harness {
            state,
            roles,
            notifier,
        }
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    fn event(event_type: Option<&str>, data: Value) -> Json<WebhookEvent> {
        Json(WebhookEvent {
            event_type: event_type.map(str::to_string),
            data,
        })
    }

    #[test]
    fn test_check_bearer_variants() {
        let headers = HeaderMap::new();
        assert_eq!(check_bearer(&headers, SECRET), AuthCheck::MissingHeader);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(check_bearer(&headers, SECRET), AuthCheck::BadScheme);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer"));
        assert_eq!(check_bearer(&headers, SECRET), AuthCheck::BadScheme);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(check_bearer(&headers, SECRET), AuthCheck::MissingToken);

        assert_eq!(check_bearer(&bearer("wrong"), SECRET), AuthCheck::BadToken);
        assert_eq!(check_bearer(&bearer(SECRET), SECRET), AuthCheck::Ok);
    }

    #[tokio::test]
    async fn test_webhook_auth_failures() {
        let h = harness();

        let resp = webhook_handler(
            State(Arc::clone(&h.state)),
            HeaderMap::new(),
            event(Some("subscription.activated"), json!({})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = webhook_handler(
            State(Arc::clone(&h.state)),
            bearer("nope"),
            event(Some("subscription.activated"), json!({})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_webhook_missing_type_is_rejected() {
        let h = harness();
        let resp = webhook_handler(State(h.state), bearer(SECRET), event(None, json!({}))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_payment_webhook_grants_role_and_confirms() {
        let h = harness();
        let resp = webhook_handler(
            State(Arc::clone(&h.state)),
            bearer(SECRET),
            event(
                Some("subscription.activated"),
                json!({ "discordId": "4242" }),
            ),
        )
        .await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert!(h.roles.is_holder(4242));
        assert_eq!(h.notifier.confirmed(), vec![UserId::new(4242)]);
    }

    #[tokio::test]
    async fn test_grace_started_webhook_sends_full_window_reminder() {
        let h = harness();
        let resp = webhook_handler(
            State(Arc::clone(&h.state)),
            bearer(SECRET),
            event(Some("grace_period.started"), json!({ "discordId": "77" })),
        )
        .await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(h.notifier.reminders(), vec![(UserId::new(77), 7)]);
    }

    #[tokio::test]
    async fn test_unknown_event_type_still_returns_ok() {
        let h = harness();
        let resp = webhook_handler(
            State(Arc::clone(&h.state)),
            bearer(SECRET),
            event(Some("totally.unknown"), json!({})),
        )
        .await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert!(h.roles.holder_count() == 0);
    }

    #[tokio::test]
    async fn test_cancelled_event_does_not_touch_roles() {
        let h = harness();
        h.roles.set_holders(&[55]);

        let resp = webhook_handler(
            State(Arc::clone(&h.state)),
            bearer(SECRET),
            event(
                Some("subscription.cancelled"),
                json!({ "discordId": "55" }),
            ),
        )
        .await;

        assert_eq!(resp.status(), StatusCode::OK);
        // Role removal is the reconciliation pass's job, not the webhook's.
        assert!(h.roles.is_holder(55));
    }

    #[tokio::test]
    async fn test_health_handler_reports_ok() {
        let resp = health_handler().await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
