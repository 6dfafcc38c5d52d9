//! Classification service request/response contract.

use serde::{Deserialize, Serialize};

use crate::image::ImageRef;
use crate::line_item::{LineItem, TariffCode};

/// Maximum number of alternative names kept from a classification.
pub const MAX_SUGGESTIONS: usize = 3;

/// One image to classify, with an optional commercial-name hint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationRequest {
    pub image: ImageRef,
    pub name_hint: Option<String>,
}

/// A classification produced by the vision service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    /// Raw code as returned; sanitized when applied to an item.
    pub tariff_code: String,
    pub commercial_name: String,
    pub normalized_name: String,
    pub suggestions: Vec<String>,
    pub confidence: Option<f64>,
    pub reason: String,
    pub reference_link: String,
}

impl Classification {
    /// The name this classification proposes: the formal normalized name if
    /// any, else the commercial name.
    pub fn proposed_name(&self) -> Option<&str> {
        [self.normalized_name.trim(), self.commercial_name.trim()]
            .into_iter()
            .find(|name| !name.is_empty())
    }

    pub fn confidence_in_range(&self) -> Option<f64> {
        self.confidence
            .filter(|c| c.is_finite() && (0.0..=1.0).contains(c))
    }
}

impl LineItem {
    /// Overwrite the classification fields from a successful classification.
    ///
    /// `display_name` is replaced only when the classification proposes a
    /// different, non-empty name. Returns `false` without touching the item
    /// when the classification carries no usable tariff code.
    pub fn apply_classification(&mut self, classification: &Classification, max_digits: usize) -> bool {
        let code = TariffCode::sanitize(&classification.tariff_code, max_digits);
        if code.is_empty() {
            return false;
        }

        self.tariff_code = code;
        if let Some(name) = classification.proposed_name() {
            if !name.eq_ignore_ascii_case(self.display_name.trim()) {
                self.display_name = name.to_string();
            }
        }
        self.classification_confidence = classification.confidence_in_range();
        self.classification_reason = classification.reason.clone();
        if self.text.quote_link.trim().is_empty() {
            self.text.quote_link = classification.reference_link.clone();
        }
        self.classification_stale = false;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line_item::{QuantityFields, SupplementaryText};

    fn item() -> LineItem {
        LineItem {
            id: "a".into(),
            image: ImageRef::inline("iVBOR"),
            display_name: "parlante".into(),
            tariff_code: TariffCode::empty(),
            classification_confidence: None,
            classification_reason: String::new(),
            classification_stale: true,
            quantities: QuantityFields::default(),
            text: SupplementaryText::default(),
        }
    }

    #[test]
    fn test_apply_prefers_normalized_name() {
        let mut item = item();
        let applied = item.apply_classification(
            &Classification {
                tariff_code: "8518.22.00".into(),
                commercial_name: "parlante".into(),
                normalized_name: "Altavoz inalámbrico".into(),
                confidence: Some(0.9),
                reason: "Altavoz con batería".into(),
                ..Default::default()
            },
            10,
        );

        assert!(applied);
        assert_eq!(item.tariff_code.as_str(), "85182200");
        assert_eq!(item.display_name, "Altavoz inalámbrico");
        assert_eq!(item.classification_confidence, Some(0.9));
        assert!(!item.classification_stale);
    }

    #[test]
    fn test_apply_without_code_is_rejected() {
        let mut item = item();
        let before = item.clone();
        let applied = item.apply_classification(
            &Classification {
                commercial_name: "Altavoz".into(),
                confidence: Some(0.4),
                ..Default::default()
            },
            10,
        );
        assert!(!applied);
        assert_eq!(item, before);
    }

    #[test]
    fn test_out_of_range_confidence_is_dropped() {
        let classification = Classification {
            confidence: Some(82.0),
            ..Default::default()
        };
        assert_eq!(classification.confidence_in_range(), None);
    }
}
