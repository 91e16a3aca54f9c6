//! Keyword responder.
//!
//! Rules are checked in order against the lowercased text and the first match
//! wins. Text that matches nothing is echoed back with a holding message.

const DEFAULT_NAME: &str = "Cliente";

pub const PRICING_REPLY: &str = "Nossos produtos têm preços a partir de R$ 50,00.";
pub const THANKS_REPLY: &str = "Por nada! 😊";
pub const UNKNOWN_CALLBACK_REPLY: &str = "Opção não reconhecida.";

struct Rule {
    name: &'static str,
    triggers: &'static [&'static str],
    reply: fn(&Incoming<'_>) -> String,
}

struct Incoming<'a> {
    text: &'a str,
    display_name: &'a str,
}

static RULES: &[Rule] = &[
    Rule {
        name: "greeting",
        triggers: &["oi", "olá"],
        reply: |msg| format!("Olá {}! Tudo bem? Como posso ajudar?", msg.display_name),
    },
    Rule {
        name: "pricing",
        triggers: &["preço", "valor"],
        reply: |_| PRICING_REPLY.to_string(),
    },
    Rule {
        name: "thanks",
        triggers: &["obrigado"],
        reply: |_| THANKS_REPLY.to_string(),
    },
];

fn fallback(msg: &Incoming<'_>) -> String {
    format!(
        "Entendi: '{}'. Em breve um atendente vai responder.",
        msg.text
    )
}

/// Maps an incoming text to a reply. Never fails and never returns an empty string.
pub fn respond(user_id: &str, text: &str, display_name: &str) -> String {
    let display_name = if display_name.trim().is_empty() {
        DEFAULT_NAME
    } else {
        display_name
    };
    let msg = Incoming { text, display_name };
    let lowered = text.to_lowercase();

    match RULES
        .iter()
        .find(|rule| rule.triggers.iter().any(|t| lowered.contains(t)))
    {
        Some(rule) => {
            log::debug!("Rule '{}' matched for {}", rule.name, user_id);
            (rule.reply)(&msg)
        }
        None => {
            log::debug!("No rule matched for {}, echoing", user_id);
            fallback(&msg)
        }
    }
}

/// Reply for interactive button/list selections. No options are defined yet.
pub fn respond_to_callback(user_id: &str, callback_data: &str) -> String {
    log::debug!("Callback '{}' from {} not recognized", callback_data, user_id);
    UNKNOWN_CALLBACK_REPLY.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_uses_display_name() {
        for text in ["oi", "Oi, tudo bem?", "OLÁ", "bom dia, olá"] {
            let reply = respond("u1", text, "Maria");
            assert!(reply.starts_with("Olá"), "{text}: {reply}");
            assert!(reply.contains("Maria"));
        }
    }

    #[test]
    fn greeting_defaults_name() {
        assert_eq!(
            respond("u1", "oi", ""),
            "Olá Cliente! Tudo bem? Como posso ajudar?"
        );
    }

    #[test]
    fn greeting_beats_pricing() {
        let reply = respond("u1", "Oi, qual o preço?", "Ana");
        assert!(reply.starts_with("Olá Ana"));
    }

    #[test]
    fn pricing() {
        assert_eq!(respond("u1", "Qual o PREÇO?", "Ana"), PRICING_REPLY);
        assert_eq!(respond("u1", "me passa o valor", "Ana"), PRICING_REPLY);
    }

    #[test]
    fn pricing_beats_thanks() {
        assert_eq!(respond("u1", "obrigado pelo valor", "Ana"), PRICING_REPLY);
    }

    #[test]
    fn thanks() {
        assert_eq!(respond("u1", "Muito Obrigado", "Ana"), THANKS_REPLY);
    }

    #[test]
    fn substring_match_is_literal() {
        // "noite" contains "oi"
        assert!(respond("u1", "boa noite", "Ana").starts_with("Olá"));
    }

    #[test]
    fn fallback_echoes_text_verbatim() {
        assert_eq!(
            respond("u1", "Quero Comprar", "Ana"),
            "Entendi: 'Quero Comprar'. Em breve um atendente vai responder."
        );
        assert_eq!(
            respond("u1", "", "Ana"),
            "Entendi: ''. Em breve um atendente vai responder."
        );
    }

    #[test]
    fn callback_is_unrecognized() {
        assert_eq!(respond_to_callback("u1", "btn_1"), UNKNOWN_CALLBACK_REPLY);
    }
}
