//! Image references carried by line items.
//!
//! An image is held either as inline base64 bytes, as a resolvable external
//! URL, or both. A reference with neither cannot be constructed.

use serde::{Deserialize, Serialize};

/// Reference to the product image of a line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ImageRefWire", rename_all = "camelCase")]
pub struct ImageRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(rename = "b64", skip_serializing_if = "Option::is_none")]
    inline_b64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

#[derive(Deserialize)]
struct ImageRefWire {
    name: Option<String>,
    b64: Option<String>,
    url: Option<String>,
}

impl TryFrom<ImageRefWire> for ImageRef {
    type Error = String;

    fn try_from(wire: ImageRefWire) -> Result<Self, Self::Error> {
        let image = ImageRef::new(wire.b64, wire.url)
            .ok_or_else(|| "image reference requires b64 data or a url".to_string())?;
        Ok(match wire.name {
            Some(name) => image.with_name(name),
            None => image,
        })
    }
}

impl ImageRef {
    /// Build a reference from optional inline data and URL.
    ///
    /// Blank values are ignored. A `data:` URL is split into its inline
    /// payload. Returns `None` when nothing usable remains.
    pub fn new(inline_b64: Option<String>, url: Option<String>) -> Option<Self> {
        let mut inline_b64 = inline_b64.map(|b| b.trim().to_string()).filter(|b| !b.is_empty());
        let mut url = url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty());

        if let Some(data_url) = url.as_deref().filter(|u| u.starts_with("data:")) {
            let payload = data_url
                .split_once(',')
                .map(|(_, payload)| payload.trim().to_string())
                .filter(|payload| !payload.is_empty());
            if inline_b64.is_none() {
                inline_b64 = payload;
            }
            url = None;
        }

        if inline_b64.is_none() && url.is_none() {
            return None;
        }

        Some(Self {
            name: None,
            inline_b64,
            url,
        })
    }

    pub fn inline(b64: impl Into<String>) -> Option<Self> {
        Self::new(Some(b64.into()), None)
    }

    pub fn external(url: impl Into<String>) -> Option<Self> {
        Self::new(None, Some(url.into()))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        let name = name.trim();
        self.name = (!name.is_empty()).then(|| name.to_string());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn inline_b64(&self) -> Option<&str> {
        self.inline_b64.as_deref()
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Fill the parts this reference is missing from a sibling reference.
    /// Parts already present are kept.
    pub fn fill_from(&mut self, other: &ImageRef) {
        if self.inline_b64.is_none() {
            self.inline_b64 = other.inline_b64.clone();
        }
        if self.url.is_none() {
            self.url = other.url.clone();
        }
        if self.name.is_none() {
            self.name = other.name.clone();
        }
    }

    /// Inline data rendered as a `data:` URL.
    pub fn data_url(&self) -> Option<String> {
        self.inline_b64
            .as_deref()
            .map(|b64| format!("data:{};base64,{}", sniff_mime(b64), b64))
    }

    /// A URL a vision service can fetch: inline data first, then the
    /// external URL.
    pub fn resolvable_url(&self) -> String {
        match self.data_url() {
            Some(data_url) => data_url,
            None => self.url.clone().unwrap_or_default(),
        }
    }
}

/// Guess the image MIME type from the first base64 characters.
fn sniff_mime(b64: &str) -> &'static str {
    if b64.starts_with("/9j/") {
        "image/jpeg"
    } else if b64.starts_with("R0lGOD") {
        "image/gif"
    } else if b64.starts_with("UklGR") {
        "image/webp"
    } else {
        "image/png"
    }
}
