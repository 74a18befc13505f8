//! Parser dispatch registry.
//!
//! Given a resource's URL, declared content type, and file extension, the
//! registry deterministically picks the content extractors to try.
//! Resolution uses three signals in fixed precedence: the URL extension,
//! the declared content type, and the content type implied by the
//! extension. Candidates are tried in order; the first success wins.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::content::{ContentKind, extension_of, fold_key, normalize_content_type};
use crate::error::AppError;
use crate::models::Document;
use crate::traits::Parser;

/// Upper bound on container re-dispatch nesting. A malformed archive that
/// contains itself fails with `RecursionLimitExceeded` instead of
/// exhausting the call stack.
pub const MAX_PARSE_DEPTH: usize = 8;

/// One parse invocation handed to a [`Parser`].
///
/// Bytes are fully buffered before dispatch, so each candidate sees the
/// complete input regardless of what an earlier candidate consumed.
pub struct ParseJob<'a> {
    pub location: &'a Url,
    /// Normalized declared content type (parameters stripped).
    pub content_type: String,
    pub charset: Option<&'a str>,
    pub bytes: &'a [u8],
    /// Container nesting depth; 0 for a top-level parse.
    pub depth: usize,
    pub cancel: &'a CancellationToken,
}

#[derive(Default)]
struct Tables {
    mime2parser: HashMap<String, Arc<dyn Parser>>,
    ext2parser: HashMap<String, Arc<dyn Parser>>,
    /// Extension to the prototype content type of whichever plugin first
    /// claimed that extension.
    ext2mime: HashMap<String, String>,
    deny_mime: HashSet<String>,
    deny_ext: HashSet<String>,
}

/// Process-wide table mapping content types and extensions to parsers,
/// plus runtime deny lists.
///
/// Explicitly constructed and shared by reference; tests build isolated
/// instances. Registration and deny-list mutation take the write lock and
/// are expected to be rare; resolution and parsing only read.
pub struct ParserRegistry {
    tables: RwLock<Tables>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Build a registry from an ordered list of plugins. Order matters:
    /// the last registration for a key wins.
    pub fn with_plugins(plugins: impl IntoIterator<Item = Arc<dyn Parser>>) -> Self {
        let registry = Self::new();
        for plugin in plugins {
            registry.register(plugin);
        }
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a parser for every content type and extension it declares.
    ///
    /// Last registration for a key wins; an overwritten binding is
    /// reported at warn level, never silently lost and never merged.
    /// Content types are processed before extensions so the plugin's
    /// prototype type is fixed before extensions reference it.
    pub fn register(&self, parser: Arc<dyn Parser>) {
        let mut tables = self.write();

        let mut prototype: Option<String> = None;
        for raw in parser.supported_content_types() {
            let mime = normalize_content_type(Some(&raw));
            if prototype.is_none() {
                prototype = Some(mime.clone());
            }
            if let Some(prev) = tables.mime2parser.insert(fold_key(&mime), parser.clone()) {
                if prev.name() != parser.name() {
                    tracing::warn!(
                        content_type = %mime,
                        previous = prev.name(),
                        replacement = parser.name(),
                        "content-type binding overwritten"
                    );
                }
            }
            tracing::debug!(content_type = %mime, parser = parser.name(), "registered");
        }

        if let Some(proto) = &prototype {
            for ext in parser.supported_extensions() {
                if let Some(prev) = tables.ext2mime.insert(fold_key(&ext), proto.clone()) {
                    if fold_key(&prev) != fold_key(proto) {
                        tracing::warn!(
                            extension = %ext,
                            previous = %prev,
                            replacement = %proto,
                            "extension-to-content-type binding overwritten"
                        );
                    }
                }
            }
        }

        for ext in parser.supported_extensions() {
            if let Some(prev) = tables.ext2parser.insert(fold_key(&ext), parser.clone()) {
                if prev.name() != parser.name() {
                    tracing::warn!(
                        extension = %ext,
                        previous = prev.name(),
                        replacement = parser.name(),
                        "extension binding overwritten"
                    );
                }
            }
            tracing::debug!(extension = %ext, parser = parser.name(), "registered");
        }
    }

    /// Resolve the ordered, identity-deduplicated candidate list for a
    /// resource.
    ///
    /// Precedence: the extension's parser, the declared content type's
    /// parser, then the parser of the content type implied by the
    /// extension. A denied extension or denied declared type fails fast;
    /// an unresolvable or denied extension-implied type is tolerated
    /// silently (extension-derived hints are advisory, not authoritative).
    /// An empty result with no denial means "no capable parser", a
    /// distinct condition from denial.
    pub fn resolve_candidates(
        &self,
        location: &Url,
        declared: Option<&str>,
    ) -> Result<Vec<Arc<dyn Parser>>, AppError> {
        let tables = self.read();
        let mut candidates: Vec<Arc<dyn Parser>> = Vec::with_capacity(2);

        let extension = extension_of(location);
        if let Some(ext) = &extension {
            if tables.deny_ext.contains(ext) {
                return Err(AppError::ExtensionDenied(ext.clone()));
            }
            if let Some(parser) = tables.ext2parser.get(ext) {
                candidates.push(parser.clone());
            }
        }

        if let Some(raw) = declared {
            let mime = normalize_content_type(Some(raw));
            let key = fold_key(&mime);
            if tables.deny_mime.contains(&key) {
                return Err(AppError::ContentTypeDenied(mime));
            }
            if let Some(parser) = tables.mime2parser.get(&key) {
                if !contains(&candidates, parser) {
                    candidates.push(parser.clone());
                }
            }
        }

        if let Some(ext) = &extension {
            if let Some(implied) = tables.ext2mime.get(ext) {
                let key = fold_key(implied);
                if !tables.deny_mime.contains(&key) {
                    if let Some(parser) = tables.mime2parser.get(&key) {
                        if !contains(&candidates, parser) {
                            candidates.push(parser.clone());
                        }
                    }
                }
            }
        }

        Ok(candidates)
    }

    /// Parse fully buffered resource bytes into a [`Document`].
    ///
    /// Candidates are tried strictly in resolution order; a candidate
    /// failing with a parse error is logged and the next one tried. If
    /// every candidate fails (or none exists), the result is
    /// `UnsupportedContent` describing both signals that were attempted.
    pub fn parse(
        &self,
        location: &Url,
        declared: Option<&str>,
        charset: Option<&str>,
        bytes: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Document, AppError> {
        if bytes.is_empty() {
            return Err(AppError::parse_failure(
                "no resource content available",
                location,
            ));
        }
        let content_type = normalize_content_type(declared);
        let candidates = self.resolve_candidates(location, Some(&content_type))?;
        let job = ParseJob {
            location,
            content_type,
            charset,
            bytes,
            depth: 0,
            cancel,
        };
        self.try_candidates(&job, candidates)
    }

    /// Parse a resource whose bytes were staged in a local file.
    ///
    /// Buffers the file fully so every candidate sees the whole input.
    pub fn parse_file(
        &self,
        location: &Url,
        declared: Option<&str>,
        charset: Option<&str>,
        path: &std::path::Path,
        cancel: &CancellationToken,
    ) -> Result<Document, AppError> {
        let bytes = std::fs::read(path)?;
        self.parse(location, declared, charset, &bytes, cancel)
    }

    /// Re-dispatch decoded container content back through the registry.
    ///
    /// Called by container plugins with the unwrapped bytes and the inner
    /// location (the outer URL with the container suffix stripped).
    /// Nesting deeper than [`MAX_PARSE_DEPTH`] fails with
    /// `RecursionLimitExceeded`.
    pub fn parse_within(
        &self,
        outer: &ParseJob<'_>,
        location: &Url,
        declared: Option<&str>,
        bytes: &[u8],
    ) -> Result<Document, AppError> {
        let depth = outer.depth + 1;
        if depth > MAX_PARSE_DEPTH {
            return Err(AppError::RecursionLimitExceeded { depth });
        }
        if bytes.is_empty() {
            return Err(AppError::parse_failure(
                "container unwrapped to empty content",
                location,
            ));
        }
        let content_type = normalize_content_type(declared);
        let candidates = self.resolve_candidates(location, declared)?;
        let job = ParseJob {
            location,
            content_type,
            charset: None,
            bytes,
            depth,
            cancel: outer.cancel,
        };
        self.try_candidates(&job, candidates)
    }

    fn try_candidates(
        &self,
        job: &ParseJob<'_>,
        candidates: Vec<Arc<dyn Parser>>,
    ) -> Result<Document, AppError> {
        let unsupported = || {
            let kind = ContentKind::of(job.location, Some(&job.content_type));
            AppError::UnsupportedContent {
                extension: kind.extension.unwrap_or_default(),
                content_type: kind.content_type,
            }
        };
        if candidates.is_empty() {
            return Err(unsupported());
        }
        for parser in &candidates {
            if job.cancel.is_cancelled() {
                return Err(AppError::Interrupted);
            }
            match parser.parse(job, self) {
                Ok(document) => {
                    tracing::debug!(
                        parser = parser.name(),
                        location = %job.location,
                        "parsed"
                    );
                    return Ok(document);
                }
                Err(e) if e.is_parse_failure() => {
                    tracing::warn!(
                        parser = parser.name(),
                        location = %job.location,
                        error = %e,
                        "candidate parser failed, trying next"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Err(unsupported())
    }

    /// Dry-run of resolution without allocating any parser state.
    ///
    /// `None` means the resource can be processed; otherwise the returned
    /// string is the human-readable denial/unsupported reason. Used by
    /// admission control before a resource is fetched.
    pub fn supports(&self, location: &Url, declared: Option<&str>) -> Option<String> {
        match self.resolve_candidates(location, declared) {
            Err(e) => Some(e.to_string()),
            Ok(list) if list.is_empty() => Some("no parser found".to_string()),
            Ok(_) => None,
        }
    }

    /// Per-axis dry-run for a declared content type alone.
    pub fn supports_content_type(&self, raw: &str) -> Option<String> {
        let mime = normalize_content_type(Some(raw));
        let key = fold_key(&mime);
        let tables = self.read();
        if tables.deny_mime.contains(&key) {
            return Some(format!("content type '{mime}' is denied"));
        }
        if !tables.mime2parser.contains_key(&key) {
            return Some(format!("no parser for content type '{mime}' available"));
        }
        None
    }

    /// Per-axis dry-run for a URL's extension alone. A URL without an
    /// extension is not rejected on this axis.
    pub fn supports_extension(&self, location: &Url) -> Option<String> {
        let Some(ext) = extension_of(location) else {
            return None;
        };
        let tables = self.read();
        if tables.deny_ext.contains(&ext) {
            return Some(format!("file extension '{ext}' is denied"));
        }
        match tables.ext2mime.get(&ext) {
            Some(mime) if tables.mime2parser.contains_key(&fold_key(mime)) => None,
            _ => Some("no parser available".to_string()),
        }
    }

    /// The prototype content type bound to an extension, if any.
    pub fn content_type_of(&self, ext: &str) -> Option<String> {
        self.read().ext2mime.get(&fold_key(ext)).cloned()
    }

    /// All distinct registered parsers.
    pub fn plugins(&self) -> Vec<Arc<dyn Parser>> {
        let tables = self.read();
        let mut distinct: Vec<Arc<dyn Parser>> = Vec::new();
        for parser in tables.mime2parser.values() {
            if !contains(&distinct, parser) {
                distinct.push(parser.clone());
            }
        }
        distinct
    }

    /// Replace the denied-content-type set.
    pub fn set_denied_content_types<I, S>(&self, types: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tables = self.write();
        tables.deny_mime = types
            .into_iter()
            .filter(|t| !t.as_ref().trim().is_empty())
            .map(|t| fold_key(&normalize_content_type(Some(t.as_ref()))))
            .collect();
    }

    /// Grant (`true`) or deny (`false`) a single content type.
    pub fn grant_content_type(&self, raw: &str, grant: bool) {
        let key = fold_key(&normalize_content_type(Some(raw)));
        let mut tables = self.write();
        if grant {
            tables.deny_mime.remove(&key);
        } else {
            tables.deny_mime.insert(key);
        }
    }

    pub fn denied_content_types(&self) -> Vec<String> {
        let mut list: Vec<String> = self.read().deny_mime.iter().cloned().collect();
        list.sort();
        list
    }

    /// Replace the denied-extension set.
    pub fn set_denied_extensions<I, S>(&self, exts: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tables = self.write();
        tables.deny_ext = exts
            .into_iter()
            .map(|e| fold_key(e.as_ref()))
            .filter(|e| !e.is_empty())
            .collect();
    }

    /// Grant (`true`) or deny (`false`) a single extension.
    pub fn grant_extension(&self, ext: &str, grant: bool) {
        let key = fold_key(ext);
        let mut tables = self.write();
        if grant {
            tables.deny_ext.remove(&key);
        } else {
            tables.deny_ext.insert(key);
        }
    }

    pub fn denied_extensions(&self) -> Vec<String> {
        let mut list: Vec<String> = self.read().deny_ext.iter().cloned().collect();
        list.sort();
        list
    }
}

fn contains(list: &[Arc<dyn Parser>], parser: &Arc<dyn Parser>) -> bool {
    list.iter().any(|p| Arc::ptr_eq(p, parser))
}
