use std::sync::Arc;

use gleaner_core::error::AppError;
use gleaner_core::models::Document;
use gleaner_core::registry::{ParseJob, ParserRegistry};
use gleaner_core::traits::Parser;

use crate::decode::decode_text;

/// Plain text extractor.
pub struct PlainTextParser;

impl PlainTextParser {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl Parser for PlainTextParser {
    fn name(&self) -> &str {
        "Plain Text Parser"
    }

    fn supported_content_types(&self) -> Vec<String> {
        vec!["text/plain".to_string()]
    }

    fn supported_extensions(&self) -> Vec<String> {
        vec!["txt".to_string(), "text".to_string()]
    }

    fn parse(&self, job: &ParseJob<'_>, _registry: &ParserRegistry) -> Result<Document, AppError> {
        let (text, charset) = decode_text(job.bytes, job.charset);
        Ok(Document::new(job.location, job.content_type.clone(), text).with_charset(charset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;
    use url::Url;

    #[test]
    fn decodes_with_charset_hint() {
        let location = Url::parse("http://example.org/notes.txt").unwrap();
        let cancel = CancellationToken::new();
        let bytes = [b'c', 0xE9, b'z', b'a', b'n', b'n', b'e'];
        let job = ParseJob {
            location: &location,
            content_type: "text/plain".to_string(),
            charset: Some("ISO-8859-1"),
            bytes: &bytes,
            depth: 0,
            cancel: &cancel,
        };
        let registry = ParserRegistry::new();
        let doc = PlainTextParser::new().parse(&job, &registry).unwrap();
        assert_eq!(doc.text, "cézanne");
        assert_eq!(doc.charset.as_deref(), Some("windows-1252"));
    }
}
