//! Resumption cursor: the paging position inside a remote metadata listing.

use chrono::{DateTime, Utc};
use url::Url;

use crate::error::AppError;

/// Query parameters a source URL is rewritten with to request the first
/// listing page.
const LIST_VERB: &str = "ListRecords";
const METADATA_PREFIX: &str = "oai_dc";

/// Opaque continuation state for a paged remote listing.
///
/// Carries the continuation token issued by the endpoint, the record
/// counter for the current page position (monotonically non-decreasing
/// across pages of one listing), and optional endpoint hints. A cursor
/// that cannot produce a next URL signals exhaustion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumptionCursor {
    pub token: Option<String>,
    pub cursor: u64,
    pub complete_list_size: Option<u64>,
    pub expiration: Option<DateTime<Utc>>,
}

impl ResumptionCursor {
    /// Cursor for a listing that continues with `token`.
    pub fn resuming(token: impl Into<String>, cursor: u64) -> Self {
        Self {
            token: Some(token.into()),
            cursor,
            complete_list_size: None,
            expiration: None,
        }
    }

    /// Cursor for a listing whose final page has been read.
    pub fn exhausted_at(cursor: u64) -> Self {
        Self {
            token: None,
            cursor,
            complete_list_size: None,
            expiration: None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        match &self.token {
            Some(t) => t.is_empty(),
            None => true,
        }
    }

    /// Whether the endpoint's expiry for this token has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expiration, Some(exp) if exp < now)
    }

    /// The source URL stripped of its query part.
    pub fn truncated_url(url: &Url) -> String {
        let mut base = url.clone();
        base.set_query(None);
        base.set_fragment(None);
        base.to_string()
    }

    /// Rewrite a source URL into the endpoint's initial page-listing form,
    /// appending the listing query parameters unless already present.
    pub fn initial_url(source: &Url) -> Result<Url, AppError> {
        if source.query_pairs().any(|(k, _)| k == "verb") {
            return Ok(source.clone());
        }
        let mut url = Url::parse(&Self::truncated_url(source))
            .map_err(|e| AppError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("verb", LIST_VERB)
            .append_pair("metadataPrefix", METADATA_PREFIX);
        Ok(url)
    }

    /// Compute the request URL for the next page, or `None` when the
    /// listing is exhausted.
    pub fn next_url(&self, current: &Url) -> Option<Url> {
        let token = self.token.as_deref().filter(|t| !t.is_empty())?;
        let mut url = Url::parse(&Self::truncated_url(current)).ok()?;
        url.query_pairs_mut()
            .append_pair("verb", LIST_VERB)
            .append_pair("resumptionToken", token);
        Some(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn missing_or_empty_token_is_exhaustion() {
        assert!(ResumptionCursor::exhausted_at(42).is_exhausted());
        assert!(ResumptionCursor::resuming("", 0).is_exhausted());
        assert!(!ResumptionCursor::resuming("abc", 0).is_exhausted());

        let current = url("http://archive.example.org/oai?verb=ListRecords");
        assert!(
            ResumptionCursor::exhausted_at(42)
                .next_url(&current)
                .is_none()
        );
    }

    #[test]
    fn next_url_replaces_query_with_token() {
        let current = url("http://archive.example.org/oai?verb=ListRecords&metadataPrefix=oai_dc");
        let cursor = ResumptionCursor::resuming("tok/123 x", 100);
        let next = cursor.next_url(&current).unwrap();
        assert_eq!(next.path(), "/oai");
        assert!(next.query().unwrap().contains("verb=ListRecords"));
        assert!(next.query().unwrap().contains("resumptionToken=tok"));
        // token is percent-encoded, not mangled
        let token = next
            .query_pairs()
            .find(|(k, _)| k == "resumptionToken")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert_eq!(token, "tok/123 x");
    }

    #[test]
    fn initial_url_appends_listing_parameters() {
        let source = url("http://archive.example.org/oai");
        let initial = ResumptionCursor::initial_url(&source).unwrap();
        let q = initial.query().unwrap();
        assert!(q.contains("verb=ListRecords"));
        assert!(q.contains("metadataPrefix=oai_dc"));
    }

    #[test]
    fn initial_url_keeps_existing_listing_form() {
        let source = url("http://archive.example.org/oai?verb=ListRecords&metadataPrefix=oai_dc");
        let initial = ResumptionCursor::initial_url(&source).unwrap();
        assert_eq!(initial, source);
    }

    #[test]
    fn expiry_is_checked_against_now() {
        let mut cursor = ResumptionCursor::resuming("t", 0);
        assert!(!cursor.is_expired(Utc::now()));
        cursor.expiration = Some(Utc::now() - chrono::Duration::minutes(1));
        assert!(cursor.is_expired(Utc::now()));
    }
}
