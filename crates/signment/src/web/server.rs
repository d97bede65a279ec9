//! Public-facing web server: tracking page, track API, WebSocket
//! endpoint, broadcast trigger and health check.

use axum::{
    extract::ws::WebSocketUpgrade,
    extract::{ConnectInfo, FromRequest, Path, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::app::AppDeps;
use crate::core::config;
use crate::core::metrics;
use crate::core::rate_limiter::RateLimiter;
use crate::core::validation::{sanitize_tracking_number, validate_email};
use crate::shipments;
use crate::sim;
use crate::storage::db;
use crate::web::recaptcha::verify_recaptcha;
use crate::web::ws;

/// Shared state for the web server.
#[derive(Clone)]
pub struct WebState {
    pub deps: AppDeps,
    pub limiter: Arc<RateLimiter>,
}

impl WebState {
    pub fn new(deps: AppDeps) -> Self {
        let limiter = Arc::new(RateLimiter::new(
            config::rate_limit::web_window(),
            config::rate_limit::WEB_MAX_PER_WINDOW,
        ));
        Arc::clone(&limiter).spawn_cleanup_task(std::time::Duration::from_secs(300));
        Self { deps, limiter }
    }
}

/// Builds the router. Separated from the listener so tests can drive it
/// directly.
pub fn build_router(state: WebState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/track", post(track_handler))
        .route("/broadcast/{tracking_number}", get(broadcast_handler))
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Start the public web server.
pub async fn start_web_server(port: u16, state: WebState) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = build_router(state);

    log::info!("Starting web server on http://{}", addr);
    log::info!("  /          - Tracking page (HTML)");
    log::info!("  /track     - Track API (POST)");
    log::info!("  /ws        - WebSocket live updates");
    log::info!("  /health    - Health check");

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}

/// Body of a track request; accepted as a form post or JSON.
#[derive(Debug, Default, Deserialize)]
pub struct TrackRequest {
    pub tracking_number: Option<String>,
    pub email: Option<String>,
    #[serde(rename = "g-recaptcha-response")]
    pub recaptcha_token: Option<String>,
}

/// Extracts a `TrackRequest` from either content type.
pub struct TrackInput(pub TrackRequest);

impl<S> FromRequest<S> for TrackInput
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("application/json"))
            .unwrap_or(false);

        if is_json {
            let Json(body) = Json::<TrackRequest>::from_request(req, state)
                .await
                .map_err(|_| error_response(StatusCode::BAD_REQUEST, &["missing-input"]))?;
            Ok(TrackInput(body))
        } else {
            let Form(body) = Form::<TrackRequest>::from_request(req, state)
                .await
                .map_err(|_| error_response(StatusCode::BAD_REQUEST, &["missing-input"]))?;
            Ok(TrackInput(body))
        }
    }
}

fn error_response(status: StatusCode, codes: &[&str]) -> Response {
    (status, Json(json!({"success": false, "error-codes": codes}))).into_response()
}

/// GET / — the tracking page.
async fn index_handler() -> Html<String> {
    Html(render_index_page(
        config::recaptcha::SITE_KEY.as_str(),
        config::TAWK_PROPERTY_ID.as_str(),
        config::TAWK_WIDGET_ID.as_str(),
    ))
}

/// POST /track — looks up a shipment, optionally records a recipient
/// email and kicks off the simulation.
async fn track_handler(
    State(state): State<WebState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    TrackInput(request): TrackInput,
) -> Response {
    let client_key = addr.ip().to_string();

    if !state.limiter.check(&client_key).await {
        metrics::record_rate_limit_hit("web");
        metrics::record_track_request("rate-limited");
        return error_response(StatusCode::TOO_MANY_REQUESTS, &["rate-limited"]);
    }

    let Some(raw_tracking_number) = request.tracking_number.as_deref() else {
        log::warn!("Missing tracking number in track request");
        metrics::record_track_request("missing-input");
        return error_response(StatusCode::BAD_REQUEST, &["missing-input"]);
    };

    let Some(tracking_number) = sanitize_tracking_number(raw_tracking_number) else {
        log::warn!("Invalid tracking number: {}", raw_tracking_number);
        metrics::record_track_request("invalid-input-response");
        return error_response(StatusCode::BAD_REQUEST, &["invalid-input-response"]);
    };

    if let Some(token) = request.recaptcha_token.as_deref() {
        if !verify_recaptcha(&state.deps.http, token).await {
            metrics::record_track_request("recaptcha-failed");
            return error_response(StatusCode::BAD_REQUEST, &["recaptcha-failed"]);
        }
    } else if config::recaptcha::is_enabled() {
        metrics::record_track_request("recaptcha-failed");
        return error_response(StatusCode::BAD_REQUEST, &["recaptcha-failed"]);
    }

    // Record the recipient email before fetching so the response
    // reflects it.
    if let Some(email) = request.email.as_deref().filter(|e| !e.is_empty()) {
        if validate_email(email) {
            match db::get_connection(&state.deps.db) {
                Ok(conn) => {
                    if let Err(e) = db::set_recipient_email(&conn, &tracking_number, email) {
                        log::error!("Failed to update recipient email for {}: {}", tracking_number, e);
                    } else {
                        state.deps.cache.invalidate_shipment(&tracking_number).await;
                        log::info!("Updated recipient email for {}", tracking_number);
                    }
                }
                Err(e) => log::error!("Failed to get DB connection: {}", e),
            }
        }
    }

    match shipments::get_shipment_details(&state.deps.db, &state.deps.cache, &tracking_number).await {
        Ok(Some(details)) => {
            if !details.is_terminal() {
                sim::spawn_simulation(state.deps.clone(), tracking_number.clone());
            }
            metrics::record_track_request("ok");
            log::info!("Tracking request processed for {}", tracking_number);
            (StatusCode::OK, Json(json!({"success": true, "data": details}))).into_response()
        }
        Ok(None) => {
            log::warn!("Shipment not found: {}", tracking_number);
            metrics::record_track_request("not-found");
            error_response(StatusCode::NOT_FOUND, &["not-found"])
        }
        Err(e) => {
            log::error!("Database error for {}: {}", tracking_number, e);
            metrics::record_error("database", "track");
            metrics::record_track_request("database-error");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &["database-error"])
        }
    }
}

/// GET /broadcast/{tracking_number} — pushes the current state to
/// WebSocket subscribers.
async fn broadcast_handler(State(state): State<WebState>, Path(tracking_number): Path<String>) -> Response {
    let Some(tracking_number) = sanitize_tracking_number(&tracking_number) else {
        return error_response(StatusCode::BAD_REQUEST, &["invalid-input-response"]);
    };

    let deps = state.deps.clone();
    tokio::spawn(async move {
        ws::broadcast_update(&deps.db, &deps.cache, &deps.clients, &deps.http, &tracking_number).await;
    });

    log::info!("Triggered broadcast");
    StatusCode::NO_CONTENT.into_response()
}

/// GET /health — component status for the whole deployment.
async fn health_handler(State(state): State<WebState>) -> Response {
    let mut healthy = true;

    let database = match db::get_connection(&state.deps.db)
        .map_err(crate::AppError::from)
        .and_then(|conn| conn.query_row("SELECT 1", [], |_| Ok(())).map_err(crate::AppError::from))
    {
        Ok(()) => "ok".to_string(),
        Err(e) => {
            healthy = false;
            e.to_string()
        }
    };

    let redis = if state.deps.cache.is_redis() {
        match state.deps.cache.ping().await {
            Ok(()) => "ok".to_string(),
            Err(e) => e.to_string(),
        }
    } else {
        "unavailable".to_string()
    };

    let smtp = if config::smtp::is_configured() {
        "ok".to_string()
    } else {
        "unconfigured".to_string()
    };

    let telegram = if config::BOT_TOKEN.is_empty() {
        "unavailable".to_string()
    } else {
        "ok".to_string()
    };

    let status = json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "database": database,
        "redis": redis,
        "smtp": smtp,
        "telegram": telegram,
    });

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (code, Json(status)).into_response()
}

/// GET /ws — upgrades to the live-update WebSocket.
async fn ws_handler(State(state): State<WebState>, upgrade: WebSocketUpgrade) -> Response {
    let deps = state.deps;
    upgrade.on_upgrade(move |socket| {
        ws::handle_socket(socket, deps.db.clone(), deps.cache.clone(), deps.clients.clone(), deps.http.clone())
    })
}

/// Render the tracking page. Keys for the optional third-party widgets
/// are inlined when configured.
fn render_index_page(recaptcha_site_key: &str, tawk_property_id: &str, tawk_widget_id: &str) -> String {
    let recaptcha_script = if recaptcha_site_key.is_empty() {
        String::new()
    } else {
        format!(
            r#"<script src="https://www.google.com/recaptcha/api.js?render={key}"></script>"#,
            key = html_escape(recaptcha_site_key)
        )
    };

    let tawk_script = if tawk_property_id.is_empty() || tawk_widget_id.is_empty() {
        String::new()
    } else {
        format!(
            r#"<script async src="https://embed.tawk.to/{property}/{widget}" charset="UTF-8" crossorigin="*"></script>"#,
            property = html_escape(tawk_property_id),
            widget = html_escape(tawk_widget_id)
        )
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Signment — Track your shipment</title>
{recaptcha_script}
<style>
*{{box-sizing:border-box;margin:0;padding:0}}
body{{background:#0d1117;min-height:100vh;display:flex;justify-content:center;align-items:flex-start;font-family:-apple-system,BlinkMacSystemFont,'Segoe UI',sans-serif;padding:40px 20px;color:#e6edf3}}
.card{{background:#161b22;border:1px solid #30363d;border-radius:16px;padding:32px;max-width:560px;width:100%}}
h1{{font-size:1.5rem;margin-bottom:8px}}
p.sub{{color:#8b949e;font-size:.9rem;margin-bottom:24px}}
form{{display:flex;gap:8px;margin-bottom:24px;flex-wrap:wrap}}
input{{flex:1;min-width:200px;padding:10px 14px;border-radius:8px;border:1px solid #30363d;background:#0d1117;color:#e6edf3;font-size:.95rem}}
button{{padding:10px 22px;border-radius:8px;border:none;background:#238636;color:#fff;font-weight:600;cursor:pointer}}
button:hover{{background:#2ea043}}
#result{{font-size:.9rem;line-height:1.6}}
.status{{font-weight:700;color:#58a6ff}}
ul{{padding-left:20px;color:#8b949e}}
.error{{color:#f85149}}
</style>
</head>
<body>
<div class="card">
<h1>Track your shipment</h1>
<p class="sub">Enter a tracking number to follow your parcel in real time.</p>
<form id="track-form">
<input name="tracking_number" id="tracking_number" placeholder="TRK..." maxlength="50" required>
<input name="email" id="email" type="email" placeholder="Email for updates (optional)">
<button type="submit">Track</button>
</form>
<div id="result"></div>
</div>
<script>
const form = document.getElementById('track-form');
const result = document.getElementById('result');
let socket = null;

function render(data) {{
  if (!data.found && data.found !== undefined) {{
    result.innerHTML = '<p class="error">Tracking number not found.</p>';
    return;
  }}
  const cps = (data.checkpoints || []).map(c => '<li>' + c + '</li>').join('');
  result.innerHTML =
    '<p>Status: <span class="status">' + data.status + '</span>' +
    (data.paused ? ' (paused)' : '') + '</p>' +
    '<p>Destination: ' + data.delivery_location + '</p>' +
    '<ul>' + cps + '</ul>';
}}

function subscribe(tn) {{
  if (socket) socket.close();
  const proto = location.protocol === 'https:' ? 'wss://' : 'ws://';
  socket = new WebSocket(proto + location.host + '/ws');
  socket.onopen = () => socket.send(JSON.stringify({{action: 'track', tracking_number: tn}}));
  socket.onmessage = (ev) => {{
    const data = JSON.parse(ev.data);
    if (data.event === 'tracking_update') render(data);
  }};
}}

form.addEventListener('submit', async (ev) => {{
  ev.preventDefault();
  const tn = document.getElementById('tracking_number').value.trim();
  const email = document.getElementById('email').value.trim();
  const body = {{tracking_number: tn}};
  if (email) body.email = email;
  const res = await fetch('/track', {{
    method: 'POST',
    headers: {{'Content-Type': 'application/json'}},
    body: JSON.stringify(body)
  }});
  const payload = await res.json();
  if (payload.success) {{
    render(payload.data);
    subscribe(tn);
  }} else {{
    result.innerHTML = '<p class="error">' + (payload['error-codes'] || ['error']).join(', ') + '</p>';
  }}
}});
</script>
{tawk_script}
</body>
</html>"#,
        recaptcha_script = recaptcha_script,
        tawk_script = tawk_script,
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_page_contains_form() {
        let page = render_index_page("", "", "");
        assert!(page.contains("track-form"));
        assert!(page.contains("tracking_number"));
        assert!(!page.contains("recaptcha/api.js"));
        assert!(!page.contains("tawk.to"));
    }

    #[test]
    fn test_index_page_embeds_widget_keys() {
        let page = render_index_page("site-key", "prop", "widget");
        assert!(page.contains("recaptcha/api.js?render=site-key"));
        assert!(page.contains("embed.tawk.to/prop/widget"));
    }
}
