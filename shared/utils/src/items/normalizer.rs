//! Row Normalizer
//!
//! Converts a raw record from either extraction path into one canonical
//! [`LineItem`].

use aduana_models::{
    ImageRef, LineItem, QuantityFields, RawRecord, SupplementaryText, TariffCode,
};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::aliases::{Field, Lookup, ResolvedRecord};
use crate::config::NormalizationConfig;
use crate::error::{AduanaError, AduanaResult};

/// A normalized record before the default unit of measure and derived
/// quantities are applied. Reconciliation merges drafts so that values stated
/// on either side win over values computed from the other.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftItem {
    pub item: LineItem,
    /// The source named a unit of measure, possibly an empty one.
    pub unit_stated: bool,
}

impl From<LineItem> for DraftItem {
    fn from(item: LineItem) -> Self {
        Self {
            item,
            unit_stated: true,
        }
    }
}

/// Result of normalizing a batch of records.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedBatch<T = LineItem> {
    pub items: Vec<T>,
    pub warnings: Vec<String>,
    pub rejected: usize,
}

impl<T> Default for NormalizedBatch<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            warnings: Vec::new(),
            rejected: 0,
        }
    }
}

impl<T> NormalizedBatch<T> {
    fn push(&mut self, index: usize, result: AduanaResult<T>) {
        match result {
            Ok(item) => self.items.push(item),
            Err(e) => {
                tracing::debug!(row = index + 1, error = %e, "Skipping record");
                self.rejected += 1;
                self.warnings.push(format!("Row {}: {}", index + 1, e));
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RowNormalizer {
    config: NormalizationConfig,
}

impl RowNormalizer {
    pub fn new(config: NormalizationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NormalizationConfig {
        &self.config
    }

    /// Normalize a single record.
    ///
    /// Fails with `MalformedRecord` when the record carries neither an image
    /// reference nor identifying text.
    pub fn normalize(&self, record: &RawRecord) -> AduanaResult<LineItem> {
        self.draft(record).map(|draft| self.finish(draft))
    }

    /// Normalize a record without defaults or derived quantities.
    pub fn draft(&self, record: &RawRecord) -> AduanaResult<DraftItem> {
        let resolved = ResolvedRecord::resolve(record);

        let image = self.image_ref(&resolved);

        let tariff_code = resolved
            .text(Field::TariffCode)
            .map(|raw| TariffCode::sanitize(&raw, self.config.tariff_code_max_digits))
            .unwrap_or_default();

        let (unit_of_measure, unit_stated) = match resolved.get(Field::UnitOfMeasure) {
            Lookup::Missing => (String::new(), false),
            Lookup::Empty => (String::new(), true),
            value => (value.text().unwrap_or_default(), true),
        };

        let quantities = QuantityFields {
            per_package: resolved.number(Field::PerPackage),
            package_count: resolved.number(Field::PackageCount),
            total_units: resolved.number(Field::TotalUnits),
            unit_price: resolved.number(Field::UnitPrice),
            total_price: resolved.number(Field::TotalPrice),
        };

        let text_of = |field| resolved.text(field).unwrap_or_default();

        let item = LineItem {
            id: resolved
                .text(Field::Id)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            image,
            display_name: text_of(Field::DisplayName),
            tariff_code,
            classification_confidence: resolved
                .number(Field::Confidence)
                .filter(|c| (0.0..=1.0).contains(c)),
            classification_reason: text_of(Field::Reason),
            classification_stale: false,
            quantities,
            text: SupplementaryText {
                description: text_of(Field::Description),
                model: text_of(Field::Model),
                unit_of_measure,
                supplier: text_of(Field::Supplier),
                quote_link: text_of(Field::QuoteLink),
                item_number: text_of(Field::ItemNumber),
                color: text_of(Field::Color),
                size: text_of(Field::Size),
                notes: text_of(Field::Notes),
            },
        };

        if item.image.is_none() && !item.has_identifying_text() {
            return Err(AduanaError::malformed_record(
                "record has neither an image reference nor identifying text \
                 (name, description, model or tariff code)",
            ));
        }

        Ok(DraftItem { item, unit_stated })
    }

    /// Apply the default unit of measure and derive missing totals.
    pub fn finish(&self, draft: DraftItem) -> LineItem {
        let DraftItem {
            mut item,
            unit_stated,
        } = draft;
        if !unit_stated {
            item.text.unit_of_measure = self.config.default_unit_of_measure.clone();
        }
        item.quantities.derive_missing();
        item
    }

    /// Normalize records in order. Malformed records become warnings and
    /// never abort the batch.
    pub fn normalize_batch<'a, I>(&self, records: I) -> NormalizedBatch
    where
        I: IntoIterator<Item = &'a RawRecord>,
    {
        let mut batch = NormalizedBatch::default();
        for (index, record) in records.into_iter().enumerate() {
            batch.push(index, self.normalize(record));
        }
        batch
    }

    /// Normalize JSON values as emitted by a collaborator. Non-object
    /// entries are rejected like malformed records.
    pub fn normalize_values(&self, values: &[Value]) -> NormalizedBatch {
        self.collect_values(values, |record| self.normalize(record))
    }

    /// Like [`normalize_values`](Self::normalize_values), stopping short of
    /// [`finish`](Self::finish) so the drafts can be reconciled first.
    pub fn draft_values(&self, values: &[Value]) -> NormalizedBatch<DraftItem> {
        self.collect_values(values, |record| self.draft(record))
    }

    fn collect_values<T, F>(&self, values: &[Value], normalize: F) -> NormalizedBatch<T>
    where
        F: Fn(&RawRecord) -> AduanaResult<T>,
    {
        let mut batch = NormalizedBatch::default();
        for (index, value) in values.iter().enumerate() {
            let result = RawRecord::try_from(value.clone())
                .map_err(AduanaError::malformed_record)
                .and_then(|record| normalize(&record));
            batch.push(index, result);
        }
        batch
    }

    fn image_ref(&self, resolved: &ResolvedRecord<'_>) -> Option<ImageRef> {
        let mut b64 = resolved.text(Field::ImageB64);
        let mut url = resolved.text(Field::ImageUrl);

        // Some producers put a full data URL in the b64 slot.
        if let Some(data_url) = b64.clone().filter(|b| b.starts_with("data:")) {
            b64 = None;
            if url.is_none() {
                url = Some(data_url);
            } else {
                b64 = data_url.split_once(',').map(|(_, payload)| payload.to_string());
            }
        }

        let image = ImageRef::new(b64, url)?;
        Some(match resolved.text(Field::ImageName) {
            Some(name) => image.with_name(name),
            None => image,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalizer() -> RowNormalizer {
        RowNormalizer::new(NormalizationConfig::default())
    }

    fn record(value: Value) -> RawRecord {
        RawRecord::try_from(value).unwrap()
    }

    #[test]
    fn test_altavoz_scenario() {
        let item = normalizer()
            .normalize(&record(json!({
                "b64": "iVBORw0KGgo",
                "hsCode": "8518.22",
                "commercial_name": "ALTAVOZ BLUETOOTH",
                "cantidad_x_caja": 12,
                "cajas": 5
            })))
            .unwrap();

        assert_eq!(item.display_name, "ALTAVOZ BLUETOOTH");
        assert_eq!(item.tariff_code.as_str(), "851822");
        assert_eq!(item.quantities.total_units, Some(60.0));
        assert_eq!(item.text.unit_of_measure, "PZA");
        assert_eq!(item.image.as_ref().unwrap().inline_b64(), Some("iVBORw0KGgo"));
        assert!(Uuid::parse_str(&item.id).is_ok());
    }

    #[test]
    fn test_explicit_total_units_wins() {
        let item = normalizer()
            .normalize(&record(json!({
                "commercial_name": "ALTAVOZ BLUETOOTH",
                "cantidad_x_caja": 12,
                "cajas": 5,
                "total_unidades": 48
            })))
            .unwrap();
        assert_eq!(item.quantities.total_units, Some(48.0));
    }

    #[test]
    fn test_malformed_record() {
        let err = normalizer()
            .normalize(&record(json!({ "cajas": 5, "unidad_de_medida": "PZA", "notes": "x" })))
            .unwrap_err();
        assert_eq!(err.error_code(), "MALFORMED_RECORD");

        let err = normalizer()
            .normalize(&record(json!({ "b64": "  ", "commercial_name": "nan" })))
            .unwrap_err();
        assert_eq!(err.error_code(), "MALFORMED_RECORD");
    }

    #[test]
    fn test_numeric_cleanup_never_zero() {
        let item = normalizer()
            .normalize(&record(json!({
                "descripcion": "Cable USB",
                "unit_price": "$1,250.75",
                "total_amount": "",
                "qty": "n/a",
                "package": null
            })))
            .unwrap();

        assert_eq!(item.quantities.unit_price, Some(1250.75));
        assert_eq!(item.quantities.total_price, None);
        assert_eq!(item.quantities.total_units, None);
        assert_eq!(item.quantities.package_count, None);
    }

    #[test]
    fn test_unit_of_measure_default_only_when_absent() {
        let n = normalizer();
        let explicit_empty = n
            .normalize(&record(json!({ "modelo": "X1", "unidad_de_medida": "" })))
            .unwrap();
        let null = n
            .normalize(&record(json!({ "modelo": "X1", "unidad_de_medida": null })))
            .unwrap();
        let given = n
            .normalize(&record(json!({ "modelo": "X1", "um": "KG" })))
            .unwrap();

        assert_eq!(explicit_empty.text.unit_of_measure, "");
        assert_eq!(null.text.unit_of_measure, "PZA");
        assert_eq!(given.text.unit_of_measure, "KG");
    }

    #[test]
    fn test_confidence_out_of_range_is_absent() {
        let n = normalizer();
        let in_range = n
            .normalize(&record(json!({ "partida": "8471", "classification": { "confidence": 0.9 } })))
            .unwrap();
        let percent = n
            .normalize(&record(json!({ "partida": "8471", "confidence": 90 })))
            .unwrap();
        assert_eq!(in_range.classification_confidence, Some(0.9));
        assert_eq!(percent.classification_confidence, None);
    }

    #[test]
    fn test_tariff_code_truncated_to_config() {
        let n = RowNormalizer::new(NormalizationConfig {
            tariff_code_max_digits: 8,
            ..Default::default()
        });
        let item = n
            .normalize(&record(json!({ "tentativeTariffCode": "8518.22.00.00" })))
            .unwrap();
        assert_eq!(item.tariff_code.as_str(), "85182200");
    }

    #[test]
    fn test_data_url_becomes_inline() {
        let item = normalizer()
            .normalize(&record(json!({
                "url": "data:image/png;base64,iVBORw0KGgo",
                "name": "image_001.png"
            })))
            .unwrap();
        let image = item.image.unwrap();
        assert_eq!(image.inline_b64(), Some("iVBORw0KGgo"));
        assert_eq!(image.url(), None);
        assert_eq!(image.name(), Some("image_001.png"));

        let external = normalizer()
            .normalize(&record(json!({ "picture_url": "https://cdn.example.com/a.jpg" })))
            .unwrap();
        assert_eq!(external.image.unwrap().url(), Some("https://cdn.example.com/a.jpg"));
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let n = normalizer();
        let first = n
            .normalize(&record(json!({
                "id": "img7",
                "_b64": "R0lGODlh",
                "hs_code": "9503.00.99",
                "commercialName": "MUÑECA",
                "qty_per_box": "24",
                "boxes": 3,
                "unit_price_usd": 1.2,
                "item_no": 7,
                "remark": "frágil"
            })))
            .unwrap();
        let second = n.normalize(&first.to_record()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_batch_collects_warnings() {
        let values = vec![
            json!({ "commercial_name": "TAZA" }),
            json!({ "cajas": 1 }),
            json!("not a record"),
            json!({ "b64": "iVBORw0KGgo" }),
        ];
        let batch = normalizer().normalize_values(&values);

        assert_eq!(batch.items.len(), 2);
        assert_eq!(batch.rejected, 2);
        assert_eq!(batch.warnings.len(), 2);
        assert!(batch.warnings.iter().any(|w| w.starts_with("Row 2:")));
        assert!(batch.warnings.iter().any(|w| w.starts_with("Row 3:")));
    }

    #[test]
    fn test_draft_defers_defaults() {
        let n = normalizer();
        let draft = n
            .draft(&record(json!({ "commercial_name": "TAZA", "cantidad_x_caja": 12, "cajas": 5 })))
            .unwrap();
        assert!(!draft.unit_stated);
        assert_eq!(draft.item.text.unit_of_measure, "");
        assert_eq!(draft.item.quantities.total_units, None);

        let item = n.finish(draft);
        assert_eq!(item.text.unit_of_measure, "PZA");
        assert_eq!(item.quantities.total_units, Some(60.0));

        let stated_empty = n
            .draft(&record(json!({ "modelo": "X1", "unidad_de_medida": "" })))
            .unwrap();
        assert!(stated_empty.unit_stated);
        assert_eq!(n.finish(stated_empty).text.unit_of_measure, "");
    }
}
