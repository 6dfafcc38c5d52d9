//! Product classification against the tariff nomenclature.

use aduana_models::{Classification, ClassificationRequest, MAX_SUGGESTIONS};
use aduana_utils::{AduanaError, AduanaResult};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::script_runner::parse_json_loose;
use crate::vlm_client::VlmClient;

/// Classification collaborator used by review sessions and the ad-hoc
/// classify endpoint.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, request: &ClassificationRequest) -> AduanaResult<Classification>;
}

/// Classifier backed by a vision-language model.
pub struct VlmClassifier {
    client: Arc<VlmClient>,
}

impl VlmClassifier {
    pub fn new(client: Arc<VlmClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Classifier for VlmClassifier {
    async fn classify(&self, request: &ClassificationRequest) -> AduanaResult<Classification> {
        let image_url = request.image.resolvable_url();
        if image_url.is_empty() {
            return Err(AduanaError::validation("image", "Image has neither data nor a URL"));
        }

        let hint = request
            .name_hint
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty());
        let mut prompt = CLASSIFICATION_USER_PROMPT.to_string();
        if let Some(hint) = hint {
            prompt.push_str(&format!(" Nombre ingresado: {}", hint));
        }

        let reply = self
            .client
            .chat(CLASSIFICATION_SYSTEM_PROMPT, &prompt, &[image_url])
            .await?;

        let classification = parse_classification_reply(&reply, hint);
        tracing::info!(
            tariff_code = %classification.tariff_code,
            confidence = ?classification.confidence,
            "Classification received"
        );
        Ok(classification)
    }
}

/// Read the raw model reply. A reply that is not a JSON object yields an
/// empty classification instead of an error.
pub fn parse_classification_reply(reply: &str, hint: Option<&str>) -> Classification {
    let answer = match parse_json_loose(reply).filter(Value::is_object) {
        Some(answer) => answer,
        None => {
            tracing::warn!(reply_len = reply.len(), "Classification reply is not a JSON object");
            Value::Object(Map::new())
        }
    };
    parse_classification(&answer, hint)
}

/// Read a classification answer, accepting camelCase and snake_case keys.
/// Numeric values are rendered as text.
pub fn parse_classification(answer: &Value, hint: Option<&str>) -> Classification {
    let text = |keys: &[&str]| -> String {
        keys.iter()
            .filter_map(|key| answer.get(*key))
            .filter_map(|value| match value {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .find(|s| !s.is_empty())
            .unwrap_or_default()
    };

    let mut commercial_name = text(&["commercialName", "commercial_name"]);
    if commercial_name.is_empty() {
        commercial_name = hint.unwrap_or_default().to_string();
    }
    let normalized_name = text(&["normalizedName", "normalized_name"]);

    let suggestions = answer
        .get("suggestions")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .take(MAX_SUGGESTIONS)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let mut reference_link = text(&["referenceLink", "reference_link", "linkCotizador"]);
    if reference_link.is_empty() {
        let name = [normalized_name.as_str(), commercial_name.as_str()]
            .into_iter()
            .find(|n| !n.is_empty())
            .unwrap_or_default();
        reference_link = supplier_search_link(name);
    }

    Classification {
        tariff_code: text(&["hsCode", "hs_code", "tariffCode", "tariff_code"]),
        commercial_name,
        normalized_name,
        suggestions,
        confidence: answer
            .get("confidence")
            .and_then(Value::as_f64)
            .filter(|c| c.is_finite() && (0.0..=1.0).contains(c)),
        reason: text(&["reason", "rationale"]),
        reference_link,
    }
}

/// Supplier search URL for a product name; empty when there is no name.
pub fn supplier_search_link(name: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        return String::new();
    }
    reqwest::Url::parse_with_params(SUPPLIER_SEARCH_URL, &[("SearchText", name)])
        .map(|url| url.to_string())
        .unwrap_or_default()
}

const SUPPLIER_SEARCH_URL: &str = "https://www.alibaba.com/trade/search";

const CLASSIFICATION_SYSTEM_PROMPT: &str = r#"Eres un especialista en clasificación arancelaria (Ecuador / SENAE, NANDINA).
Devuelve SOLO JSON con el esquema:
{
  "hsCode": "string",
  "commercialName": "string",
  "normalizedName": "string",
  "suggestions": ["string", "string", "string"],
  "confidence": 0-1,
  "reason": "string",
  "referenceLink": "string"
}
commercialName es el nombre tal como vino (o el correcto si está vacío).
normalizedName es el nombre COMERCIAL FORMAL en español (Ecuador), singular, sin marcas.
suggestions contiene hasta 3 nombres formales alternativos.
Normaliza términos coloquiales (p. ej. "parlante" -> "altavoz", "audífonos" -> "auriculares").
Evita marcas y adjetivos de marketing; usa descriptores técnicos solo si se observan en la imagen."#;

const CLASSIFICATION_USER_PROMPT: &str =
    "Clasifica este producto según el sistema arancelario ecuatoriano y propone un nombre comercial formal.";
