//! Publish contract: destination folder, template layout and outcome.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::line_item::LineItem;

/// Canonical drive folder identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FolderId(String);

fn folder_patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"/folders/([A-Za-z0-9_-]+)").expect("valid folder path pattern"),
            Regex::new(r"[?&]id=([A-Za-z0-9_-]+)").expect("valid folder query pattern"),
            Regex::new(r"^[A-Za-z0-9_-]{10,}$").expect("valid bare folder id pattern"),
        ]
    })
}

impl FolderId {
    /// Accepts a sharing URL with a `/folders/<id>` segment, a URL with an
    /// `id=<id>` query parameter, or a bare id of at least ten url-safe
    /// characters. Anything else yields `None`.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }

        let [by_path, by_query, bare] = folder_patterns();
        if let Some(caps) = by_path.captures(input) {
            return Some(Self(caps[1].to_string()));
        }
        if let Some(caps) = by_query.captures(input) {
            return Some(Self(caps[1].to_string()));
        }
        if bare.is_match(input) {
            return Some(Self(input.to_string()));
        }
        None
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FolderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Target spreadsheet layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishTemplate {
    /// Air freight liquidation
    Aereo,
    /// Ocean freight liquidation
    Maritimo,
}

impl PublishTemplate {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Aereo => "aereo",
            Self::Maritimo => "maritimo",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_lowercase().as_str() {
            "aereo" | "aéreo" | "air" => Some(Self::Aereo),
            "maritimo" | "marítimo" | "sea" | "ocean" => Some(Self::Maritimo),
            _ => None,
        }
    }
}

impl std::fmt::Display for PublishTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Everything the publish adapter needs for one liquidation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    pub document_name: String,
    pub folder_id: FolderId,
    pub template: PublishTemplate,
    pub items: Vec<LineItem>,
}

/// Result of a successful publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReceipt {
    pub sheet_url: String,
    pub rows_written: usize,
}
