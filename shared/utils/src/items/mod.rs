//! Line Item Pipeline
//!
//! Turns raw extraction records (image path and table path) into canonical
//! line items, and aligns the two sequences of one document.

pub mod aliases;
pub mod normalizer;
pub mod reconcile;
pub mod sheet;


pub use aliases::{Field, Lookup, ResolvedRecord};
pub use normalizer::{DraftItem, NormalizedBatch, RowNormalizer};
pub use reconcile::{reconcile, ReconciliationReport};
pub use sheet::{ParsedProforma, ProformaFormat, ProformaSheetReader};
