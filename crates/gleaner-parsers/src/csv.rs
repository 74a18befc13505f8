use std::sync::Arc;

use gleaner_core::error::AppError;
use gleaner_core::models::Document;
use gleaner_core::registry::{ParseJob, ParserRegistry};
use gleaner_core::traits::Parser;

use crate::decode::decode_text;

/// Rows between cooperative cancellation checks.
const CANCEL_CHECK_ROWS: usize = 256;

/// Comma-separated value extractor. Cells are flattened row by row into
/// the document text.
pub struct CsvParser;

impl CsvParser {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }

    /// Parse raw CSV bytes into rows of cells. Also used outside the
    /// plugin contract, e.g. by source-list loading.
    pub fn read_table(bytes: &[u8], charset_hint: Option<&str>) -> Result<Vec<Vec<String>>, String> {
        let (text, _) = decode_text(bytes, charset_hint);
        let mut reader = ::csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());
        let mut table = Vec::new();
        for row in reader.records() {
            let row = row.map_err(|e| e.to_string())?;
            table.push(row.iter().map(|cell| cell.to_string()).collect());
        }
        Ok(table)
    }
}

impl Parser for CsvParser {
    fn name(&self) -> &str {
        "Comma Separated Value Parser"
    }

    fn supported_content_types(&self) -> Vec<String> {
        vec![
            "text/csv".to_string(),
            "text/comma-separated-values".to_string(),
            "application/csv".to_string(),
        ]
    }

    fn supported_extensions(&self) -> Vec<String> {
        vec!["csv".to_string()]
    }

    fn parse(&self, job: &ParseJob<'_>, _registry: &ParserRegistry) -> Result<Document, AppError> {
        let (text, charset) = decode_text(job.bytes, job.charset);
        let mut reader = ::csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut lines = Vec::new();
        for (i, row) in reader.records().enumerate() {
            if i % CANCEL_CHECK_ROWS == 0 && job.cancel.is_cancelled() {
                return Err(AppError::Interrupted);
            }
            let row = row.map_err(|e| {
                AppError::parse_failure(format!("malformed CSV row: {e}"), job.location)
            })?;
            lines.push(row.iter().collect::<Vec<_>>().join("; "));
        }

        Ok(
            Document::new(job.location, job.content_type.clone(), lines.join("\n"))
                .with_charset(charset),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;
    use url::Url;

    fn job<'a>(
        location: &'a Url,
        bytes: &'a [u8],
        cancel: &'a CancellationToken,
    ) -> ParseJob<'a> {
        ParseJob {
            location,
            content_type: "text/csv".to_string(),
            charset: None,
            bytes,
            depth: 0,
            cancel,
        }
    }

    #[test]
    fn flattens_rows_into_text() {
        let location = Url::parse("http://example.org/data.csv").unwrap();
        let cancel = CancellationToken::new();
        let registry = ParserRegistry::new();
        let bytes = b"name,city\nada,london\ngrace,arlington\n";

        let doc = CsvParser::new()
            .parse(&job(&location, bytes, &cancel), &registry)
            .unwrap();
        assert_eq!(doc.text, "name; city\nada; london\ngrace; arlington");
    }

    #[test]
    fn read_table_keeps_ragged_rows() {
        let table = CsvParser::read_table(b"a,b,c\nd\n", None).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table[0], vec!["a", "b", "c"]);
        assert_eq!(table[1], vec!["d"]);
    }

    #[test]
    fn cancellation_stops_parsing() {
        let location = Url::parse("http://example.org/data.csv").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let registry = ParserRegistry::new();

        let err = CsvParser::new()
            .parse(&job(&location, b"a,b\n", &cancel), &registry)
            .unwrap_err();
        assert!(matches!(err, AppError::Interrupted));
    }
}
