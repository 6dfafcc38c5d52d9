//! Canonical line item model.
//!
//! Every extraction path, user edit and classification result ends up in a
//! [`LineItem`]. Source-specific field names never leak past normalization.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Number, Value};

use crate::image::ImageRef;
use crate::record::RawRecord;

/// Canonical record keys emitted by [`LineItem::to_record`].
///
/// These are the first-priority aliases of the normalizer's alias table, so a
/// re-emitted record normalizes back to the same item.
pub mod keys {
    pub const ID: &str = "id";
    pub const IMAGE_B64: &str = "b64";
    pub const IMAGE_URL: &str = "url";
    pub const IMAGE_NAME: &str = "name";
    pub const DISPLAY_NAME: &str = "nombre_comercial";
    pub const TARIFF_CODE: &str = "partida";
    pub const CONFIDENCE: &str = "confidence";
    pub const REASON: &str = "reason";
    pub const DESCRIPTION: &str = "descripcion";
    pub const MODEL: &str = "modelo";
    pub const UNIT_OF_MEASURE: &str = "unidad_de_medida";
    pub const SUPPLIER: &str = "proveedores";
    pub const QUOTE_LINK: &str = "link_cotizador";
    pub const ITEM_NUMBER: &str = "item_no";
    pub const COLOR: &str = "color";
    pub const SIZE: &str = "size";
    pub const NOTES: &str = "notes";
    pub const PER_PACKAGE: &str = "cantidad_x_caja";
    pub const PACKAGE_COUNT: &str = "cajas";
    pub const TOTAL_UNITS: &str = "total_unidades";
    pub const UNIT_PRICE: &str = "precio_unitario_usd";
    pub const TOTAL_PRICE: &str = "total_usd";
}

/// Unit of measure applied when a source carries none at all.
pub const DEFAULT_UNIT_OF_MEASURE: &str = "PZA";

/// Digit-only tariff (HS) code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TariffCode(String);

impl TariffCode {
    /// Canonical maximum length (national 10-digit subheading).
    pub const CANONICAL_MAX_DIGITS: usize = 10;

    /// Keep only ASCII digits and truncate to `max_digits`.
    pub fn sanitize(raw: &str, max_digits: usize) -> Self {
        Self(
            raw.chars()
                .filter(|c| c.is_ascii_digit())
                .take(max_digits)
                .collect(),
        )
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<'de> Deserialize<'de> for TariffCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::sanitize(&raw, Self::CANONICAL_MAX_DIGITS))
    }
}

impl std::fmt::Display for TariffCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Nullable quantities used for customs-value rows. `None` means the
/// source did not state the value; it is never conflated with zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantityFields {
    pub per_package: Option<f64>,
    pub package_count: Option<f64>,
    pub total_units: Option<f64>,
    pub unit_price: Option<f64>,
    pub total_price: Option<f64>,
}

impl QuantityFields {
    /// Derive `total_units` and `total_price` when they are absent and their
    /// inputs are present. Explicit values are never replaced.
    pub fn derive_missing(&mut self) {
        if self.total_units.is_none() {
            if let (Some(per_package), Some(packages)) = (self.per_package, self.package_count) {
                self.total_units = Some(per_package * packages);
            }
        }
        if self.total_price.is_none() {
            if let (Some(unit_price), Some(units)) = (self.unit_price, self.total_units) {
                self.total_price = Some(round_cents(unit_price * units));
            }
        }
    }

    /// Take each field from `other` where this one is absent.
    pub fn fill_from(&mut self, other: &QuantityFields) {
        self.per_package = self.per_package.or(other.per_package);
        self.package_count = self.package_count.or(other.package_count);
        self.total_units = self.total_units.or(other.total_units);
        self.unit_price = self.unit_price.or(other.unit_price);
        self.total_price = self.total_price.or(other.total_price);
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Free-text columns carried through unchanged from extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplementaryText {
    pub description: String,
    pub model: String,
    pub unit_of_measure: String,
    pub supplier: String,
    pub quote_link: String,
    pub item_number: String,
    pub color: String,
    pub size: String,
    pub notes: String,
}

impl SupplementaryText {
    /// Take each non-empty field from `other` where this one is empty.
    pub fn fill_from(&mut self, other: &SupplementaryText) {
        fill_text(&mut self.description, &other.description);
        fill_text(&mut self.model, &other.model);
        fill_text(&mut self.unit_of_measure, &other.unit_of_measure);
        fill_text(&mut self.supplier, &other.supplier);
        fill_text(&mut self.quote_link, &other.quote_link);
        fill_text(&mut self.item_number, &other.item_number);
        fill_text(&mut self.color, &other.color);
        fill_text(&mut self.size, &other.size);
        fill_text(&mut self.notes, &other.notes);
    }
}

pub(crate) fn fill_text(target: &mut String, fallback: &str) {
    if target.trim().is_empty() && !fallback.trim().is_empty() {
        *target = fallback.to_string();
    }
}

/// A single reviewed product row of a liquidation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub id: String,
    pub image: Option<ImageRef>,
    pub display_name: String,
    pub tariff_code: TariffCode,
    pub classification_confidence: Option<f64>,
    pub classification_reason: String,
    /// Set once `display_name` is edited after the last classification.
    #[serde(default)]
    pub classification_stale: bool,
    pub quantities: QuantityFields,
    pub text: SupplementaryText,
}

/// What an applied patch changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchEffect {
    pub changed: bool,
    pub display_name_changed: bool,
}

impl LineItem {
    /// Whether the item carries text that identifies a product.
    pub fn has_identifying_text(&self) -> bool {
        !self.display_name.trim().is_empty()
            || !self.text.description.trim().is_empty()
            || !self.text.model.trim().is_empty()
            || !self.tariff_code.is_empty()
    }

    /// Merge user-entered fields into this item. Tariff codes are sanitized
    /// to `max_digits`. Quantities are taken as given, without re-deriving.
    pub fn apply_patch(&mut self, patch: &LineItemPatch, max_digits: usize) -> PatchEffect {
        let before = self.clone();

        if let Some(name) = &patch.display_name {
            self.display_name = name.trim().to_string();
        }
        if let Some(code) = &patch.tariff_code {
            self.tariff_code = TariffCode::sanitize(code, max_digits);
        }
        if let Some(reason) = &patch.classification_reason {
            self.classification_reason = reason.clone();
        }
        // A new image URL replaces the whole reference, inline data included.
        if let Some(image_url) = &patch.image_url {
            let name = self.image.as_ref().and_then(|i| i.name().map(str::to_string));
            self.image = ImageRef::new(None, Some(image_url.clone()))
                .map(|image| match name {
                    Some(name) => image.with_name(name),
                    None => image,
                });
        }

        let text = &mut self.text;
        for (target, value) in [
            (&mut text.description, &patch.description),
            (&mut text.model, &patch.model),
            (&mut text.unit_of_measure, &patch.unit_of_measure),
            (&mut text.supplier, &patch.supplier),
            (&mut text.quote_link, &patch.quote_link),
            (&mut text.color, &patch.color),
            (&mut text.size, &patch.size),
            (&mut text.notes, &patch.notes),
        ] {
            if let Some(value) = value {
                *target = value.clone();
            }
        }

        let quantities = &mut self.quantities;
        for (target, value) in [
            (&mut quantities.per_package, patch.per_package),
            (&mut quantities.package_count, patch.package_count),
            (&mut quantities.total_units, patch.total_units),
            (&mut quantities.unit_price, patch.unit_price),
            (&mut quantities.total_price, patch.total_price),
        ] {
            if let Some(value) = value {
                *target = value.filter(|v| v.is_finite());
            }
        }

        let display_name_changed = before.display_name != self.display_name;
        if display_name_changed {
            self.classification_stale = true;
        }

        PatchEffect {
            changed: before != *self,
            display_name_changed,
        }
    }

    /// Re-emit the item as a record keyed by canonical names.
    pub fn to_record(&self) -> RawRecord {
        let mut record = RawRecord::new().with(keys::ID, self.id.clone());

        if let Some(image) = &self.image {
            if let Some(b64) = image.inline_b64() {
                record.insert(keys::IMAGE_B64, b64);
            }
            if let Some(url) = image.url() {
                record.insert(keys::IMAGE_URL, url);
            }
            if let Some(name) = image.name() {
                record.insert(keys::IMAGE_NAME, name);
            }
        }

        for (key, value) in [
            (keys::DISPLAY_NAME, &self.display_name),
            (keys::REASON, &self.classification_reason),
            (keys::DESCRIPTION, &self.text.description),
            (keys::MODEL, &self.text.model),
            (keys::UNIT_OF_MEASURE, &self.text.unit_of_measure),
            (keys::SUPPLIER, &self.text.supplier),
            (keys::QUOTE_LINK, &self.text.quote_link),
            (keys::ITEM_NUMBER, &self.text.item_number),
            (keys::COLOR, &self.text.color),
            (keys::SIZE, &self.text.size),
            (keys::NOTES, &self.text.notes),
        ] {
            record.insert(key, value.clone());
        }
        record.insert(keys::TARIFF_CODE, self.tariff_code.as_str());

        for (key, value) in [
            (keys::CONFIDENCE, self.classification_confidence),
            (keys::PER_PACKAGE, self.quantities.per_package),
            (keys::PACKAGE_COUNT, self.quantities.package_count),
            (keys::TOTAL_UNITS, self.quantities.total_units),
            (keys::UNIT_PRICE, self.quantities.unit_price),
            (keys::TOTAL_PRICE, self.quantities.total_price),
        ] {
            if let Some(number) = value.and_then(Number::from_f64) {
                record.insert(key, Value::Number(number));
            }
        }

        record
    }
}

/// Partial update sent by the review UI.
///
/// For numeric fields, a missing key leaves the value alone while an explicit
/// `null` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LineItemPatch {
    pub display_name: Option<String>,
    pub tariff_code: Option<String>,
    pub classification_reason: Option<String>,
    pub image_url: Option<String>,
    pub description: Option<String>,
    pub model: Option<String>,
    pub unit_of_measure: Option<String>,
    pub supplier: Option<String>,
    pub quote_link: Option<String>,
    pub color: Option<String>,
    pub size: Option<String>,
    pub notes: Option<String>,
    #[serde(deserialize_with = "nullable")]
    pub per_package: Option<Option<f64>>,
    #[serde(deserialize_with = "nullable")]
    pub package_count: Option<Option<f64>>,
    #[serde(deserialize_with = "nullable")]
    pub total_units: Option<Option<f64>>,
    #[serde(deserialize_with = "nullable")]
    pub unit_price: Option<Option<f64>>,
    #[serde(deserialize_with = "nullable")]
    pub total_price: Option<Option<f64>>,
}

impl LineItemPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn nullable<'de, D>(deserializer: D) -> Result<Option<Option<f64>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<f64>::deserialize(deserializer).map(Some)
}
