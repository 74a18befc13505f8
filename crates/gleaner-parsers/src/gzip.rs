use std::io::Read;
use std::sync::Arc;

use flate2::read::GzDecoder;
use url::Url;

use gleaner_core::error::AppError;
use gleaner_core::models::Document;
use gleaner_core::registry::{ParseJob, ParserRegistry};
use gleaner_core::traits::Parser;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const DECODE_CHUNK: usize = 64 * 1024;

/// Gzip container extractor: a composition policy, not a terminal format.
///
/// On a valid stream it inflates the payload and feeds the decoded bytes
/// back into the registry under the inner location (the outer URL with
/// the compression suffix stripped), chaining dispatch. Framing that does
/// not validate is reported as a parse failure so the registry can try
/// sibling candidates; the registry bounds the re-dispatch depth.
pub struct GzipParser;

impl GzipParser {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

/// The location the unwrapped payload is dispatched under:
/// `report.xml.gz` -> `report.xml`, `bundle.tgz` -> `bundle.tar`.
fn inner_location(outer: &Url) -> Url {
    let path = outer.path();
    let mut inner = outer.clone();
    if let Some(stripped) = path.strip_suffix(".gz") {
        let stripped = stripped.to_string();
        inner.set_path(&stripped);
    } else if let Some(stripped) = path.strip_suffix(".tgz") {
        let mut tar = stripped.to_string();
        tar.push_str(".tar");
        inner.set_path(&tar);
    }
    inner
}

impl Parser for GzipParser {
    fn name(&self) -> &str {
        "GNU Zip Compressed Archive Parser"
    }

    fn supported_content_types(&self) -> Vec<String> {
        vec![
            "application/x-gzip".to_string(),
            "application/gzip".to_string(),
            "application/x-gunzip".to_string(),
            "application/gzipped".to_string(),
            "gzip/document".to_string(),
        ]
    }

    fn supported_extensions(&self) -> Vec<String> {
        vec!["gz".to_string(), "tgz".to_string()]
    }

    fn parse(&self, job: &ParseJob<'_>, registry: &ParserRegistry) -> Result<Document, AppError> {
        if job.bytes.len() < 2 || job.bytes[..2] != GZIP_MAGIC {
            return Err(AppError::parse_failure(
                "invalid gzip framing",
                job.location,
            ));
        }

        let mut decoder = GzDecoder::new(job.bytes);
        let mut decoded = Vec::new();
        let mut chunk = [0u8; DECODE_CHUNK];
        loop {
            if job.cancel.is_cancelled() {
                return Err(AppError::Interrupted);
            }
            match decoder.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => decoded.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    return Err(AppError::parse_failure(
                        format!("corrupt gzip stream: {e}"),
                        job.location,
                    ));
                }
            }
        }

        let inner = inner_location(job.location);
        tracing::debug!(
            outer = %job.location,
            inner = %inner,
            compressed = job.bytes.len(),
            decoded = decoded.len(),
            "unwrapped gzip container"
        );
        registry.parse_within(job, &inner, None, &decoded)
    }
}
