use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use url::Url;

/// A parsed document, ready for the indexing sink.
///
/// Keyed by a stable identifier derived from the location, so re-parsing
/// the same resource upserts rather than duplicates.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Document {
    /// SHA-256 of the location, 64-char hex.
    pub id: String,
    pub location: Url,
    /// Normalized content type the winning parser was invoked with.
    pub content_type: String,
    pub charset: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Vec<String>,
    /// Extracted text body.
    pub text: String,
    /// Outbound links discovered during parsing, absolute.
    pub links: Vec<Url>,
    pub parsed_at: DateTime<Utc>,
}

impl Document {
    pub fn new(location: &Url, content_type: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: stable_id(location),
            location: location.clone(),
            content_type: content_type.into(),
            charset: None,
            title: None,
            description: None,
            keywords: Vec::new(),
            text: text.into(),
            links: Vec::new(),
            parsed_at: Utc::now(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    pub fn with_links(mut self, links: Vec<Url>) -> Self {
        self.links = links;
        self
    }
}

/// One metadata record pulled from a harvested page.
///
/// The field set mirrors the lowest common denominator of syndicated
/// metadata: identifier, title, link, free-text description, publication
/// date string (kept verbatim; sources disagree on date formats).
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HarvestRecord {
    pub guid: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub pubdate: Option<String>,
}

impl HarvestRecord {
    pub fn is_empty(&self) -> bool {
        self.guid.is_none()
            && self.title.is_none()
            && self.link.is_none()
            && self.description.is_none()
            && self.pubdate.is_none()
    }
}

/// Stable document identifier: SHA-256 of the location, 64-char hex.
pub fn stable_id(location: &Url) -> String {
    let mut hasher = Sha256::new();
    hasher.update(location.as_str().as_bytes());
    format!("{:x}", hasher.finalize())
}
