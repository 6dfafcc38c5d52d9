//! # Aduana Core Domain Models
//!
//! Canonical data model for the customs-liquidation intake and review service.
//!
//! ## Key Models
//!
//! - **LineItem**: one product row of a liquidation with its image, tariff
//!   classification, quantities and free-text columns
//! - **ImageRef**: inline base64 data and/or an external URL for a product image
//! - **TariffCode**: digit-only HS code, truncated to a configured length
//! - **RawRecord**: loosely-typed record emitted by an extraction path
//! - **LineItemPatch**: partial update from the review UI
//! - **Classification**: result of the vision classification service
//! - **FolderId / PublishTemplate / PublishRequest**: publish contract
//!
//! Invariants (unique ids within a session, digit-only tariff codes, no item
//! without an image or identifying text) are enforced by the constructors in
//! this crate and by the normalizer in `aduana-utils`.

pub mod image;
pub mod record;
pub mod line_item;
pub mod classification;
pub mod publish;


pub use image::ImageRef;
pub use record::RawRecord;
pub use line_item::{
    keys, LineItem, LineItemPatch, PatchEffect, QuantityFields, SupplementaryText, TariffCode,
    DEFAULT_UNIT_OF_MEASURE,
};
pub use classification::{Classification, ClassificationRequest, MAX_SUGGESTIONS};
pub use publish::{FolderId, PublishReceipt, PublishRequest, PublishTemplate};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_item_json_shape() {
        let item = LineItem {
            id: "img3".to_string(),
            image: ImageRef::external("https://cdn.example.com/p3.jpg"),
            display_name: "Auriculares".to_string(),
            tariff_code: TariffCode::sanitize("851830", TariffCode::CANONICAL_MAX_DIGITS),
            classification_confidence: None,
            classification_reason: String::new(),
            classification_stale: false,
            quantities: QuantityFields::default(),
            text: SupplementaryText::default(),
        };

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["displayName"], "Auriculares");
        assert_eq!(json["tariffCode"], "851830");
        assert_eq!(json["image"]["url"], "https://cdn.example.com/p3.jpg");
        assert!(json["quantities"]["totalUnits"].is_null());

        let back: LineItem = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn test_deserialized_tariff_code_is_sanitized() {
        let code: TariffCode = serde_json::from_str("\"8518.22-00\"").unwrap();
        assert_eq!(code.as_str(), "85182200");
    }
}
