use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info, warn};
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::error::AppError;
use crate::phone;
use crate::types::{
    AdminNotification, DebugResponse, HealthResponse, NotifyResponse, SendDetails, SendRequest,
    SendResponse,
};
use crate::webhook;
use crate::whatsapp::Messenger;

pub const SERVICE_NAME: &str = "whatsapp-relay";

pub struct AppState {
    pub config: Config,
    /// `None` when the messaging client could not be initialized.
    pub messenger: Option<Arc<dyn Messenger>>,
}

pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/api/enviar-mensagem", post(send_message))
        .route("/api/notificar-admin", post(notify_admin))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/webhook", get(webhook::verify).post(webhook::receive))
        .route("/health", get(health))
        .route("/debug", get(debug))
        .merge(api)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn require_api_key(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(api_key) = state.config.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };

    let auth_header = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth_header.strip_prefix("Bearer ").unwrap_or(auth_header);

    if token == api_key {
        Ok(next.run(req).await)
    } else {
        warn!("Rejected {} without a valid API key", req.uri().path());
        Err(StatusCode::UNAUTHORIZED)
    }
}

/// Parses a relay body, falling back to defaults when it is not a JSON object.
fn parse_body<T>(route: &str, body: &[u8]) -> T
where
    T: serde::de::DeserializeOwned + Default,
{
    serde_json::from_slice(body).unwrap_or_else(|e| {
        warn!("Unreadable body on {}, using defaults: {}", route, e);
        T::default()
    })
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let req: SendRequest = parse_body("/api/enviar-mensagem", &body);
    let to = phone::normalize(&req.telefone, &state.config.country_code);

    if to.is_empty() || req.mensagem.trim().is_empty() {
        return Err(AppError::bad_request("Telefone e mensagem são obrigatórios"));
    }

    let Some(messenger) = state.messenger.as_ref() else {
        error!("Send requested but the WhatsApp client is not configured");
        return Err(AppError::internal("WhatsApp não configurado"));
    };

    info!(
        "Sending message to {} (formatted: {}) for {}",
        req.telefone,
        to,
        req.nome.as_deref().unwrap_or("Cliente")
    );

    let receipt = messenger.send_text(&to, &req.mensagem).await.map_err(|e| {
        error!("Failed to send message to {}: {:#}", to, e);
        e
    })?;

    Ok((
        StatusCode::OK,
        Json(SendResponse {
            sucesso: true,
            mensagem: "Mensagem enviada com sucesso".to_string(),
            detalhes: SendDetails {
                status: "enviado".to_string(),
                para: to,
                id: receipt.message_id,
            },
        }),
    ))
}

pub async fn notify_admin(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let notification: AdminNotification = parse_body("/api/notificar-admin", &body);

    let Some(messenger) = state.messenger.as_ref() else {
        warn!("Admin notification skipped: WhatsApp client not configured");
        return Ok(Json(NotifyResponse {
            sucesso: false,
            aviso: Some("WhatsApp não configurado - modo de teste".to_string()),
        }));
    };
    let Some(admin_phone) = state.config.admin_phone.as_deref() else {
        warn!("Admin notification skipped: ADMIN_PHONE not configured");
        return Ok(Json(NotifyResponse {
            sucesso: false,
            aviso: Some("Telefone do administrador não configurado".to_string()),
        }));
    };

    messenger
        .send_text(admin_phone, &notification.render())
        .await
        .map_err(|e| {
            error!("Failed to notify admin: {:#}", e);
            e
        })?;

    info!(
        "Admin notified about {}",
        notification.origem.as_deref().unwrap_or("formulário do site")
    );
    Ok(Json(NotifyResponse {
        sucesso: true,
        aviso: None,
    }))
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "online".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        servico: SERVICE_NAME.to_string(),
        whatsapp_configured: state.messenger.is_some(),
    })
}

pub async fn debug(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = &state.config;
    Json(DebugResponse {
        phone_id_configured: config.phone_number_id.is_some(),
        token_configured: config.access_token.is_some(),
        verify_token_configured: config.verify_token.is_some(),
        wa_initialized: state.messenger.is_some(),
    })
}
