//! Inbound side of the relay: the Cloud API webhook.
//!
//! - `GET /webhook`: subscription handshake, echoes `hub.challenge`
//! - `POST /webhook`: message notifications, always answered with `200 OK`
//!
//! Deliveries are acknowledged before they are processed. The platform
//! redelivers anything that is not a 2xx, so processing errors stay here.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use log::{debug, error, info, warn};
use serde::Deserialize;

use crate::handlers::AppState;
use crate::responder;
use crate::whatsapp::Messenger;

const DEFAULT_SENDER_NAME: &str = "Cliente";

pub const INTERNAL_ERROR_REPLY: &str =
    "Desculpe, ocorreu um erro ao processar sua mensagem. Tente novamente em instantes.";

#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

pub async fn verify(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VerifyParams>,
) -> impl IntoResponse {
    let expected = state.config.verify_token.as_deref();
    let accepted = params.mode.as_deref() == Some("subscribe")
        && expected.is_some()
        && params.verify_token.as_deref() == expected;

    if accepted {
        info!("Webhook verified");
        (StatusCode::OK, params.challenge.unwrap_or_default())
    } else {
        warn!("Webhook verification failed (mode: {:?})", params.mode);
        (StatusCode::FORBIDDEN, "Verification failed".to_string())
    }
}

pub async fn receive(State(state): State<Arc<AppState>>, body: Bytes) -> impl IntoResponse {
    tokio::spawn(async move {
        process_delivery(&state, &body).await;
    });
    (StatusCode::OK, "OK")
}

// --- Cloud API notification payload ---

#[derive(Debug, Deserialize)]
struct Notification {
    #[serde(default)]
    object: String,
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
struct Change {
    #[serde(default)]
    value: Option<ChangeValue>,
}

#[derive(Debug, Deserialize)]
struct ChangeValue {
    #[serde(default)]
    contacts: Vec<Contact>,
    #[serde(default)]
    messages: Vec<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct Contact {
    #[serde(default)]
    wa_id: String,
    #[serde(default)]
    profile: Option<Profile>,
}

#[derive(Debug, Deserialize)]
struct Profile {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    from: String,
    #[serde(default)]
    id: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<TextBody>,
    #[serde(default)]
    interactive: Option<Interactive>,
    #[serde(default)]
    button: Option<Button>,
}

#[derive(Debug, Deserialize)]
struct TextBody {
    #[serde(default)]
    body: String,
}

#[derive(Debug, Deserialize)]
struct Interactive {
    #[serde(default)]
    button_reply: Option<Reply>,
    #[serde(default)]
    list_reply: Option<Reply>,
}

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Deserialize)]
struct Button {
    #[serde(default)]
    payload: String,
}

/// One inbound chat message, as far as the responder is concerned.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessageEvent {
    pub message_id: String,
    pub sender_id: String,
    pub sender_display_name: String,
    /// Empty for non-text messages.
    pub text: String,
    /// Set for interactive button/list replies.
    pub callback_data: Option<String>,
}

fn sender_name(contacts: &[Contact], from: &str) -> String {
    contacts
        .iter()
        .find(|c| c.wa_id == from)
        .or_else(|| contacts.first())
        .and_then(|c| c.profile.as_ref())
        .map(|p| p.name.trim())
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_SENDER_NAME)
        .to_string()
}

fn callback_data(msg: &RawMessage) -> Option<String> {
    let from_interactive = msg.interactive.as_ref().and_then(|i| {
        i.button_reply
            .as_ref()
            .or(i.list_reply.as_ref())
            .map(|r| r.id.clone())
    });
    from_interactive
        .or_else(|| msg.button.as_ref().map(|b| b.payload.clone()))
        .filter(|data| !data.is_empty())
}

fn parse_events(body: &[u8]) -> anyhow::Result<Vec<InboundMessageEvent>> {
    let notification: Notification = serde_json::from_slice(body)?;
    if notification.object != "whatsapp_business_account" {
        debug!("Ignoring notification for object '{}'", notification.object);
        return Ok(Vec::new());
    }

    let mut events = Vec::new();
    for value in notification
        .entry
        .iter()
        .flat_map(|e| &e.changes)
        .filter_map(|c| c.value.as_ref())
    {
        for msg in &value.messages {
            let from = msg.from.trim();
            if from.is_empty() {
                continue;
            }
            let text = match (msg.kind.as_str(), &msg.text) {
                ("text", Some(text)) => text.body.clone(),
                _ => String::new(),
            };
            events.push(InboundMessageEvent {
                message_id: msg.id.clone(),
                sender_id: from.to_string(),
                sender_display_name: sender_name(&value.contacts, from),
                text,
                callback_data: callback_data(msg),
            });
        }
    }
    Ok(events)
}

pub async fn process_delivery(state: &AppState, body: &[u8]) {
    let events = match parse_events(body) {
        Ok(events) => events,
        Err(e) => {
            warn!("Discarding malformed webhook payload: {}", e);
            return;
        }
    };
    if events.is_empty() {
        debug!("Webhook delivery carried no messages");
        return;
    }

    let Some(messenger) = state.messenger.as_deref() else {
        warn!(
            "Dropping {} inbound message(s): WhatsApp client not configured",
            events.len()
        );
        return;
    };

    for event in &events {
        handle_event(messenger, event).await;
    }
}

/// Replies to one message. Failures end in at most one fallback reply.
pub async fn handle_event(messenger: &dyn Messenger, event: &InboundMessageEvent) {
    info!(
        "Message from {} ({}): {:?}",
        event.sender_display_name, event.sender_id, event.text
    );

    if let Err(e) = reply(messenger, event).await {
        error!("Failed to answer {}: {:#}", event.sender_id, e);
        if let Err(e) = messenger
            .send_text(&event.sender_id, INTERNAL_ERROR_REPLY)
            .await
        {
            error!("Fallback reply to {} failed: {:#}", event.sender_id, e);
        }
    }
}

async fn reply(messenger: &dyn Messenger, event: &InboundMessageEvent) -> anyhow::Result<()> {
    if !event.message_id.is_empty() {
        if let Err(e) = messenger.mark_read(&event.message_id).await {
            warn!("Could not mark {} as read: {:#}", event.message_id, e);
        }
        if let Err(e) = messenger.send_typing_indicator(&event.message_id).await {
            warn!("Could not send typing indicator for {}: {:#}", event.message_id, e);
        }
    }

    let text = match &event.callback_data {
        Some(data) => responder::respond_to_callback(&event.sender_id, data),
        None => responder::respond(&event.sender_id, &event.text, &event.sender_display_name),
    };

    messenger.send_text(&event.sender_id, &text).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::router;
    use crate::handlers::tests::{configured, make_state, test_config};
    use crate::whatsapp::testing::{Call, RecordingMessenger};
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    fn delivery(messages: serde_json::Value, contacts: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "WABA_ID",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "metadata": { "phone_number_id": "123" },
                        "contacts": contacts,
                        "messages": messages,
                    }
                }]
            }]
        }))
        .unwrap()
    }

    fn text_message(from: &str, id: &str, body: &str) -> serde_json::Value {
        json!({ "from": from, "id": id, "timestamp": "1700000000", "type": "text", "text": { "body": body } })
    }

    async fn body_text(response: axum::response::Response) -> String {
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    fn handshake(query: &str) -> Request<Body> {
        Request::builder()
            .uri(format!("/webhook?{}", query))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn handshake_echoes_challenge() {
        let app = router(make_state(configured(), None));
        let resp = app
            .oneshot(handshake(
                "hub.mode=subscribe&hub.verify_token=verify-secret&hub.challenge=1158201444",
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, "1158201444");
    }

    #[tokio::test]
    async fn handshake_rejects_mismatches() {
        let state = make_state(configured(), None);
        for query in [
            "hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=abc",
            "hub.mode=unsubscribe&hub.verify_token=verify-secret&hub.challenge=abc",
            "hub.verify_token=verify-secret&hub.challenge=abc",
            "",
        ] {
            let resp = router(state.clone()).oneshot(handshake(query)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::FORBIDDEN, "{query}");
        }
    }

    #[tokio::test]
    async fn handshake_fails_without_configured_token() {
        let app = router(make_state(test_config(&[]), None));
        let resp = app
            .oneshot(handshake("hub.mode=subscribe&hub.challenge=abc"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn delivery_is_acknowledged_even_when_malformed() {
        let app = router(make_state(configured(), None));
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, "OK");
    }

    #[test]
    fn parses_text_message_with_contact_name() {
        let body = delivery(
            json!([text_message("5511988887777", "wamid.1", "Oi")]),
            json!([{ "wa_id": "5511988887777", "profile": { "name": "Maria" } }]),
        );
        let events = parse_events(&body).unwrap();
        assert_eq!(
            events,
            vec![InboundMessageEvent {
                message_id: "wamid.1".to_string(),
                sender_id: "5511988887777".to_string(),
                sender_display_name: "Maria".to_string(),
                text: "Oi".to_string(),
                callback_data: None,
            }]
        );
    }

    #[test]
    fn non_text_message_has_empty_text_and_default_name() {
        let body = delivery(
            json!([{ "from": "551100", "id": "wamid.2", "type": "image", "image": { "id": "m1" } }]),
            json!([]),
        );
        let events = parse_events(&body).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].text, "");
        assert_eq!(events[0].sender_display_name, "Cliente");
    }

    #[test]
    fn interactive_reply_becomes_callback() {
        let body = delivery(
            json!([{
                "from": "551100", "id": "wamid.3", "type": "interactive",
                "interactive": { "type": "button_reply", "button_reply": { "id": "opt_1", "title": "Sim" } }
            }]),
            json!([]),
        );
        let events = parse_events(&body).unwrap();
        assert_eq!(events[0].callback_data.as_deref(), Some("opt_1"));
    }

    #[test]
    fn status_updates_and_other_objects_yield_nothing() {
        let statuses = serde_json::to_vec(&json!({
            "object": "whatsapp_business_account",
            "entry": [{ "changes": [{ "value": { "statuses": [{ "id": "wamid.1", "status": "delivered" }] } }] }]
        }))
        .unwrap();
        assert!(parse_events(&statuses).unwrap().is_empty());

        let page = serde_json::to_vec(&json!({ "object": "page", "entry": [] })).unwrap();
        assert!(parse_events(&page).unwrap().is_empty());

        assert!(parse_events(b"{not json").is_err());
        assert!(parse_events(br#""x""#).is_err());
    }

    #[tokio::test]
    async fn delivery_marks_read_and_replies() {
        let messenger = Arc::new(RecordingMessenger::default());
        let state = make_state(configured(), Some(messenger.clone()));
        let body = delivery(
            json!([text_message("5511988887777", "wamid.1", "Olá, bom dia")]),
            json!([{ "wa_id": "5511988887777", "profile": { "name": "Maria" } }]),
        );

        process_delivery(&state, &body).await;

        assert_eq!(
            messenger.calls(),
            vec![
                Call::MarkRead("wamid.1".to_string()),
                Call::Typing("wamid.1".to_string()),
                Call::Send {
                    to: "5511988887777".to_string(),
                    body: "Olá Maria! Tudo bem? Como posso ajudar?".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn batched_messages_each_get_a_reply() {
        let messenger = Arc::new(RecordingMessenger::default());
        let state = make_state(configured(), Some(messenger.clone()));
        let body = delivery(
            json!([
                text_message("551100", "wamid.1", "qual o valor?"),
                text_message("551100", "wamid.2", "obrigado"),
            ]),
            json!([]),
        );

        process_delivery(&state, &body).await;

        let sent: Vec<String> = messenger.sent().into_iter().map(|(_, body)| body).collect();
        assert_eq!(
            sent,
            vec![
                responder::PRICING_REPLY.to_string(),
                responder::THANKS_REPLY.to_string()
            ]
        );
    }

    #[tokio::test]
    async fn receipt_failures_do_not_block_reply() {
        let messenger = Arc::new(RecordingMessenger {
            fail_receipts: true,
            ..Default::default()
        });
        let event = InboundMessageEvent {
            message_id: "wamid.1".to_string(),
            sender_id: "551100".to_string(),
            sender_display_name: "Cliente".to_string(),
            text: "quero comprar".to_string(),
            callback_data: None,
        };

        handle_event(&*messenger, &event).await;

        assert_eq!(
            messenger.sent(),
            vec![(
                "551100".to_string(),
                "Entendi: 'quero comprar'. Em breve um atendente vai responder.".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn failed_reply_sends_one_fallback() {
        let messenger = Arc::new(RecordingMessenger::failing_sends(1));
        let event = InboundMessageEvent {
            message_id: String::new(),
            sender_id: "551100".to_string(),
            sender_display_name: "Cliente".to_string(),
            text: "oi".to_string(),
            callback_data: None,
        };

        handle_event(&*messenger, &event).await;

        let sent = messenger.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].1, INTERNAL_ERROR_REPLY);
    }

    #[tokio::test]
    async fn failed_fallback_is_dropped() {
        let messenger = Arc::new(RecordingMessenger::failing_sends(2));
        let event = InboundMessageEvent {
            message_id: String::new(),
            sender_id: "551100".to_string(),
            sender_display_name: "Cliente".to_string(),
            text: "oi".to_string(),
            callback_data: None,
        };

        handle_event(&*messenger, &event).await;

        assert_eq!(messenger.sent().len(), 2);
    }

    #[tokio::test]
    async fn malformed_delivery_sends_nothing() {
        let messenger = Arc::new(RecordingMessenger::default());
        let state = make_state(configured(), Some(messenger.clone()));

        process_delivery(&state, b"{not json").await;

        assert!(messenger.calls().is_empty());
    }

    #[tokio::test]
    async fn posted_delivery_is_answered_in_background() {
        let messenger = Arc::new(RecordingMessenger::default());
        let app = router(make_state(configured(), Some(messenger.clone())));
        let body = delivery(
            json!([text_message("5511988887777", "wamid.9", "obrigado")]),
            json!([{ "wa_id": "5511988887777", "profile": { "name": "Maria" } }]),
        );

        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, "OK");

        let mut sent = messenger.sent();
        for _ in 0..100 {
            if !sent.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            sent = messenger.sent();
        }
        assert_eq!(
            sent,
            vec![(
                "5511988887777".to_string(),
                responder::THANKS_REPLY.to_string()
            )]
        );
    }

    #[tokio::test]
    async fn delivery_without_client_is_dropped() {
        let state = make_state(test_config(&[]), None);
        let body = delivery(json!([text_message("551100", "wamid.1", "oi")]), json!([]));
        process_delivery(&state, &body).await;
    }
}
