use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Accepts strings as-is and stringifies numbers and booleans, so a form that
/// posts a phone as a JSON number keeps the value. Anything else is `None`.
fn lenient_string<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(d)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

fn lenient_string_or_empty<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_string(d)?.unwrap_or_default())
}

/// Body of `POST /api/enviar-mensagem`.
#[derive(Deserialize, Default, Debug)]
#[serde(default)]
pub struct SendRequest {
    #[serde(deserialize_with = "lenient_string_or_empty")]
    pub telefone: String,
    #[serde(deserialize_with = "lenient_string_or_empty")]
    pub mensagem: String,
    #[serde(deserialize_with = "lenient_string")]
    pub nome: Option<String>,
}

#[derive(Serialize)]
pub struct SendResponse {
    pub sucesso: bool,
    pub mensagem: String,
    pub detalhes: SendDetails,
}

#[derive(Serialize)]
pub struct SendDetails {
    pub status: String,
    pub para: String,
    pub id: Option<String>,
}

/// Body of `POST /api/notificar-admin`. Every field is optional.
#[derive(Deserialize, Default, Debug)]
#[serde(default)]
pub struct AdminNotification {
    #[serde(deserialize_with = "lenient_string")]
    pub nome: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub email: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub telefone: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub mensagem: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub origem: Option<String>,
}

impl AdminNotification {
    pub fn render(&self) -> String {
        let field = |value: &Option<String>, default: &str| {
            value
                .as_deref()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(default)
                .to_string()
        };
        format!(
            "🔔 *Nova mensagem do site*\n\n*Nome:* {}\n*Email:* {}\n*Telefone:* {}\n*Origem:* {}\n*Mensagem:* {}",
            field(&self.nome, "Visitante"),
            field(&self.email, ""),
            field(&self.telefone, ""),
            field(&self.origem, "formulário do site"),
            field(&self.mensagem, ""),
        )
    }
}

#[derive(Serialize)]
pub struct NotifyResponse {
    pub sucesso: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aviso: Option<String>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub servico: String,
    pub whatsapp_configured: bool,
}

#[derive(Serialize)]
pub struct DebugResponse {
    pub phone_id_configured: bool,
    pub token_configured: bool,
    pub verify_token_configured: bool,
    pub wa_initialized: bool,
}
