//! Login-initiation URL construction and the `lti_message_hint` codec.
//!
//! The hint is an opaque round-trip vehicle: whatever we encode at
//! initiation the tool echoes back untouched, so the per-launch nonce and
//! any resolved custom parameters ride inside it.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{ContextType, Tool};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MessageHint {
    pub context_id: String,
    pub context_type: ContextType,
    pub deep_link: bool,
    pub nonce: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_link_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, String>,
}

impl MessageHint {
    pub fn encode(&self) -> Result<String, ApiError> {
        let json = serde_json::to_vec(self)
            .map_err(|e| ApiError::Internal(format!("encode message hint: {e}")))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    pub fn decode(raw: &str) -> Result<Self, ApiError> {
        let json = URL_SAFE_NO_PAD
            .decode(raw)
            .map_err(|_| ApiError::Validation("malformed lti_message_hint".into()))?;
        serde_json::from_slice(&json)
            .map_err(|_| ApiError::Validation("malformed lti_message_hint".into()))
    }
}

pub struct LaunchContext<'a> {
    pub user_id: &'a str,
    pub context_id: &'a str,
    pub context_type: ContextType,
}

/// Expand a `key=value;key=value` template into concrete pairs.
/// Supported placeholders: $UserId, $ContextId, $ContextType.
pub fn resolve_custom_params(template: &str, ctx: &LaunchContext) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for pair in template.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let resolved = value
            .replace("$UserId", ctx.user_id)
            .replace("$ContextId", ctx.context_id)
            .replace("$ContextType", ctx.context_type.as_str());
        out.insert(key.trim().to_string(), resolved);
    }
    out
}

fn push_param(url: &mut String, key: &str, value: &str) {
    url.push(if url.contains('?') { '&' } else { '?' });
    url.push_str(key);
    url.push('=');
    url.push_str(&utf8_percent_encode(value, NON_ALPHANUMERIC).to_string());
}

/// OIDC third-party-initiated login redirect to the tool.
pub fn login_init_url(
    tool: &Tool,
    platform_issuer: &str,
    login_hint: &str,
    target_link_uri: &str,
    message_hint: &str,
) -> String {
    let mut url = tool.tool_login_url.clone();
    push_param(&mut url, "iss", platform_issuer);
    push_param(&mut url, "login_hint", login_hint);
    push_param(&mut url, "target_link_uri", target_link_uri);
    push_param(&mut url, "client_id", &tool.client_id);
    push_param(&mut url, "lti_deployment_id", &tool.deployment_id);
    push_param(&mut url, "lti_message_hint", message_hint);
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::models::{DeeplinkType, PublicKeyType};

    fn tool() -> Tool {
        Tool {
            id: Uuid::new_v4(),
            name: "Quiz Tool".into(),
            client_id: "client-123".into(),
            deployment_id: "dep-1".into(),
            issuer: "https://tool.example".into(),
            tool_login_url: "https://tool.example/login".into(),
            public_key_type: PublicKeyType::KeysetUrl,
            tool_keyset_url: Some("https://tool.example/jwks".into()),
            tool_public_key: None,
            content_selection_url: "https://tool.example/select".into(),
            redirect_uris: vec!["https://tool.example/launch".into()],
            enable_grade_sync: true,
            enable_nrps: false,
            deeplink_type: DeeplinkType::AllowEverytime,
            custom_params: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn hint_round_trips() {
        let hint = MessageHint {
            context_id: "C1".into(),
            context_type: ContextType::Section,
            deep_link: true,
            nonce: "abc123".into(),
            resource_link_id: None,
            custom: BTreeMap::from([("roster".into(), "C1".into())]),
        };
        let encoded = hint.encode().unwrap();
        // opaque to the tool: no JSON punctuation survives the encoding
        assert!(!encoded.contains('{'));
        assert_eq!(MessageHint::decode(&encoded).unwrap(), hint);
    }

    #[test]
    fn hint_decode_rejects_garbage() {
        assert!(MessageHint::decode("not-base64!!").is_err());
        let not_json = URL_SAFE_NO_PAD.encode(b"plain text");
        assert!(MessageHint::decode(&not_json).is_err());
    }

    #[test]
    fn custom_params_resolve_placeholders() {
        let ctx = LaunchContext {
            user_id: "U1",
            context_id: "C1",
            context_type: ContextType::CourseTemplate,
        };
        let got = resolve_custom_params("user=$UserId; roster=$ContextId;kind=$ContextType", &ctx);
        assert_eq!(got.get("user").unwrap(), "U1");
        assert_eq!(got.get("roster").unwrap(), "C1");
        assert_eq!(got.get("kind").unwrap(), "course_template");
    }

    #[test]
    fn custom_params_skip_malformed_pairs() {
        let ctx = LaunchContext {
            user_id: "U1",
            context_id: "C1",
            context_type: ContextType::Section,
        };
        let got = resolve_custom_params("no_equals_sign;;a=1", &ctx);
        assert_eq!(got.len(), 1);
        assert_eq!(got.get("a").unwrap(), "1");
    }

    #[test]
    fn login_url_carries_required_params() {
        let url = login_init_url(
            &tool(),
            "https://platform.example",
            "U1",
            "https://tool.example/select",
            "HINT",
        );
        assert!(url.starts_with("https://tool.example/login?iss="));
        assert!(url.contains("login_hint=U1"));
        assert!(url.contains("client_id=client%2D123"));
        assert!(url.contains("lti_deployment_id=dep%2D1"));
        assert!(url.contains("lti_message_hint=HINT"));
        // target is percent-encoded, not raw
        assert!(url.contains("target_link_uri=https%3A%2F%2Ftool%2Eexample%2Fselect"));
    }

    #[test]
    fn login_url_appends_when_query_exists() {
        let mut t = tool();
        t.tool_login_url = "https://tool.example/login?tenant=7".into();
        let url = login_init_url(&t, "https://platform.example", "U1", "x", "h");
        assert!(url.contains("tenant=7&iss="));
    }
}
