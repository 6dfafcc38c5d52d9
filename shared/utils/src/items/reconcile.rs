//! Reconciliation Merge
//!
//! Aligns the image-derived and table-derived items of one document by
//! position. The Nth image pairs with the Nth table row; there is no content
//! matching.
//!
//! Merging works on [`DraftItem`]s; the default unit of measure and derived
//! totals are applied afterwards by [`RowNormalizer::finish`].
//!
//! [`RowNormalizer::finish`]: super::RowNormalizer::finish

use serde::{Deserialize, Serialize};

use super::normalizer::DraftItem;

/// Alignment summary returned alongside the merged items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub paired: usize,
    pub image_only: usize,
    pub text_only: usize,
    pub warnings: Vec<String>,
}

impl ReconciliationReport {
    pub fn is_aligned(&self) -> bool {
        self.image_only == 0 && self.text_only == 0
    }
}

/// Merge image-path and table-path items positionally.
///
/// Unmatched tails are kept as they are. Never fails on misalignment; the
/// report records it instead.
pub fn reconcile(
    image_items: Vec<DraftItem>,
    text_items: Vec<DraftItem>,
) -> (Vec<DraftItem>, ReconciliationReport) {
    let image_count = image_items.len();
    let text_count = text_items.len();
    let paired = image_count.min(text_count);

    let mut report = ReconciliationReport {
        paired,
        image_only: image_count - paired,
        text_only: text_count - paired,
        warnings: Vec::new(),
    };

    if image_count != text_count && image_count > 0 && text_count > 0 {
        let warning = format!(
            "Found {} images but {} table rows; items after position {} were not paired, \
             review them for misalignment",
            image_count, text_count, paired
        );
        tracing::warn!(image_count, text_count, "Image and table item counts differ");
        report.warnings.push(warning);
    }

    let mut images = image_items.into_iter();
    let mut texts = text_items.into_iter();
    let mut merged = Vec::with_capacity(image_count.max(text_count));

    loop {
        match (images.next(), texts.next()) {
            (Some(image), Some(text)) => merged.push(merge_pair(image, text)),
            (Some(image), None) => merged.push(image),
            (None, Some(text)) => merged.push(text),
            (None, None) => break,
        }
    }

    (merged, report)
}

/// Merge one pair. The table side supplies commercial fields, the image side
/// supplies the image; each field keeps the first non-empty value.
fn merge_pair(image: DraftItem, text: DraftItem) -> DraftItem {
    let unit_stated = text.unit_stated || image.unit_stated;
    let image = image.item;
    let mut merged = text.item;
    merged.id = image.id;

    merged.image = match (image.image, merged.image.take()) {
        (Some(mut primary), Some(fallback)) => {
            primary.fill_from(&fallback);
            Some(primary)
        }
        (primary, fallback) => primary.or(fallback),
    };

    if merged.display_name.trim().is_empty() {
        merged.display_name = image.display_name;
    }
    if merged.tariff_code.is_empty() {
        merged.tariff_code = image.tariff_code;
    }
    if merged.classification_confidence.is_none() {
        merged.classification_confidence = image.classification_confidence;
    }
    if merged.classification_reason.trim().is_empty() {
        merged.classification_reason = image.classification_reason;
    }
    merged.classification_stale |= image.classification_stale;

    merged.text.fill_from(&image.text);
    merged.quantities.fill_from(&image.quantities);

    DraftItem {
        item: merged,
        unit_stated,
    }
}
