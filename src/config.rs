use std::time::Duration;

use log::warn;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_COUNTRY_CODE: &str = "55";
const DEFAULT_API_BASE: &str = "https://graph.facebook.com/v18.0";
const DEFAULT_HEARTBEAT_SECS: u64 = 300;

/// Process-wide settings, read once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub access_token: Option<String>,
    pub phone_number_id: Option<String>,
    pub verify_token: Option<String>,
    pub admin_phone: Option<String>,
    pub port: u16,
    pub country_code: String,
    pub api_base: String,
    pub heartbeat_interval: Duration,
    pub api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let port = match get("PORT") {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!("Invalid PORT {:?}, using {}", raw, DEFAULT_PORT);
                DEFAULT_PORT
            }),
            None => DEFAULT_PORT,
        };

        let heartbeat_secs = get("HEARTBEAT_INTERVAL_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_HEARTBEAT_SECS);

        Config {
            access_token: get("WHATSAPP_TOKEN"),
            phone_number_id: get("WHATSAPP_PHONE_ID"),
            verify_token: get("VERIFY_TOKEN"),
            admin_phone: get("ADMIN_PHONE"),
            port,
            country_code: get("DEFAULT_COUNTRY_CODE")
                .unwrap_or_else(|| DEFAULT_COUNTRY_CODE.to_string()),
            api_base: get("WHATSAPP_API_BASE")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
            api_key: get("RELAY_API_KEY"),
        }
    }

    /// Names of the credentials the messaging client needs but did not get.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.access_token.is_none() {
            missing.push("WHATSAPP_TOKEN");
        }
        if self.phone_number_id.is_none() {
            missing.push("WHATSAPP_PHONE_ID");
        }
        if self.verify_token.is_none() {
            missing.push("VERIFY_TOKEN");
        }
        missing
    }
}
