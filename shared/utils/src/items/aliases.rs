//! Source key aliases for canonical line item fields.
//!
//! Each field lists the keys producers are known to use, in priority order.
//! The canonical key from [`aduana_models::keys`] always comes first so that
//! re-emitted records resolve to the same values.

use std::collections::HashMap;
use std::sync::OnceLock;

use aduana_models::{keys, RawRecord};
use regex::Regex;
use serde_json::Value;

/// Canonical line item fields resolvable from a raw record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Id,
    ImageB64,
    ImageUrl,
    ImageName,
    DisplayName,
    TariffCode,
    Confidence,
    Reason,
    Description,
    Model,
    UnitOfMeasure,
    Supplier,
    QuoteLink,
    ItemNumber,
    Color,
    Size,
    Notes,
    PerPackage,
    PackageCount,
    TotalUnits,
    UnitPrice,
    TotalPrice,
}

impl Field {
    pub const ALL: [Field; 22] = [
        Field::Id,
        Field::ImageB64,
        Field::ImageUrl,
        Field::ImageName,
        Field::DisplayName,
        Field::TariffCode,
        Field::Confidence,
        Field::Reason,
        Field::Description,
        Field::Model,
        Field::UnitOfMeasure,
        Field::Supplier,
        Field::QuoteLink,
        Field::ItemNumber,
        Field::Color,
        Field::Size,
        Field::Notes,
        Field::PerPackage,
        Field::PackageCount,
        Field::TotalUnits,
        Field::UnitPrice,
        Field::TotalPrice,
    ];

    /// Source keys for this field, highest priority first.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Field::Id => &[keys::ID, "item_id", "itemId"],
            Field::ImageB64 => &[keys::IMAGE_B64, "_b64", "imageB64", "image_b64"],
            Field::ImageUrl => &[
                keys::IMAGE_URL,
                "image_url",
                "imageUrl",
                "picture_url",
                "link_de_la_imagen",
                "imageBytesOrRef",
            ],
            Field::ImageName => &[keys::IMAGE_NAME, "image_name", "imageName", "filename"],
            Field::DisplayName => &[
                keys::DISPLAY_NAME,
                "commercial_name",
                "commercialName",
                "tentativeName",
                "tentative_name",
                "displayName",
                "classification.commercial_name",
                "classification.commercialName",
            ],
            Field::TariffCode => &[
                keys::TARIFF_CODE,
                "hs_code",
                "hsCode",
                "tariff_code",
                "tariffCode",
                "tentativeTariffCode",
                "tentative_tariff_code",
                "classification.hs_code",
                "classification.hsCode",
            ],
            Field::Confidence => &[
                keys::CONFIDENCE,
                "classificationConfidence",
                "classification.confidence",
            ],
            Field::Reason => &[
                keys::REASON,
                "classificationReason",
                "rationale",
                "classification.reason",
            ],
            Field::Description => &[keys::DESCRIPTION, "description", "desc"],
            Field::Model => &[keys::MODEL, "model"],
            Field::UnitOfMeasure => &[
                keys::UNIT_OF_MEASURE,
                "unit_of_measure",
                "unitOfMeasure",
                "um",
                "unit",
            ],
            Field::Supplier => &[keys::SUPPLIER, "proveedor", "supplier"],
            Field::QuoteLink => &[
                keys::QUOTE_LINK,
                "linkCotizador",
                "referenceLink",
                "reference_link",
                "classification.referenceLink",
            ],
            Field::ItemNumber => &[keys::ITEM_NUMBER, "itemNumber", "item_number", "item"],
            Field::Color => &[keys::COLOR],
            Field::Size => &[keys::SIZE],
            Field::Notes => &[keys::NOTES, "remark", "remarks", "note"],
            Field::PerPackage => &[
                keys::PER_PACKAGE,
                "qty_per_box",
                "perPackage",
                "per_package",
            ],
            Field::PackageCount => &[
                keys::PACKAGE_COUNT,
                "package",
                "packages",
                "packageCount",
                "package_count",
                "boxes",
            ],
            Field::TotalUnits => &[
                keys::TOTAL_UNITS,
                "total_units",
                "totalUnits",
                "qty",
                "quantity",
            ],
            Field::UnitPrice => &[
                keys::UNIT_PRICE,
                "unit_price_usd",
                "unit_price",
                "unitPrice",
            ],
            Field::TotalPrice => &[
                keys::TOTAL_PRICE,
                "total_amount",
                "totalAmount",
                "total_price",
                "totalPrice",
            ],
        }
    }
}

/// Outcome of resolving one field against a record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup<'a> {
    /// No alias present, or only null/placeholder values.
    Missing,
    /// An alias is present with an explicit empty string.
    Empty,
    Value(&'a Value),
}

impl<'a> Lookup<'a> {
    pub fn is_missing(&self) -> bool {
        matches!(self, Lookup::Missing)
    }

    /// Trimmed text, or `None` when missing or empty.
    pub fn text(&self) -> Option<String> {
        match self {
            Lookup::Value(value) => value_text(value),
            _ => None,
        }
    }

    /// Number after stripping thousands separators, spaces and currency
    /// symbols. Non-numeric and non-finite values are absent.
    pub fn number(&self) -> Option<f64> {
        match self {
            Lookup::Value(Value::Number(n)) => n.as_f64().filter(|v| v.is_finite()),
            Lookup::Value(Value::String(s)) => clean_number(s),
            _ => None,
        }
    }
}

/// A record with every canonical field resolved once.
#[derive(Debug, Clone)]
pub struct ResolvedRecord<'a> {
    fields: HashMap<Field, Lookup<'a>>,
}

impl<'a> ResolvedRecord<'a> {
    pub fn resolve(record: &'a RawRecord) -> Self {
        let fields = Field::ALL
            .iter()
            .map(|field| (*field, resolve_field(record, *field)))
            .collect();
        Self { fields }
    }

    pub fn get(&self, field: Field) -> Lookup<'a> {
        self.fields.get(&field).copied().unwrap_or(Lookup::Missing)
    }

    pub fn text(&self, field: Field) -> Option<String> {
        self.get(field).text()
    }

    pub fn number(&self, field: Field) -> Option<f64> {
        self.get(field).number()
    }
}

fn resolve_field(record: &RawRecord, field: Field) -> Lookup<'_> {
    let mut saw_empty = false;

    for alias in field.aliases() {
        match record.get(alias) {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) if s.trim().is_empty() => saw_empty = true,
            Some(Value::String(s)) if is_placeholder(s) => {}
            Some(value) => return Lookup::Value(value),
        }
    }

    if saw_empty {
        Lookup::Empty
    } else {
        Lookup::Missing
    }
}

/// Textual stand-ins for "no value" left behind by dataframe exports.
pub fn is_placeholder(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "nan" | "none" | "null" | "<na>"
    )
}

fn value_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Value::Bool(b) => b.to_string(),
        Value::Array(values) => values
            .iter()
            .filter_map(value_text)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Null | Value::Object(_) => String::new(),
    };

    if text.is_empty() || is_placeholder(&text) {
        None
    } else {
        Some(text)
    }
}

fn number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"-?\d+(\.\d+)?").expect("number pattern is valid"))
}

/// Parse a loosely formatted number such as `"US$ 1,234.50"`.
pub fn clean_number(raw: &str) -> Option<f64> {
    if is_placeholder(raw) {
        return None;
    }
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ',' | '$') && !c.is_whitespace())
        .collect();

    number_pattern()
        .find(&cleaned)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}
