//! Built-in parser plugins.
//!
//! Each plugin implements the [`Parser`](gleaner_core::traits::Parser)
//! contract; [`default_plugins`] wires the standard set in registration
//! order for [`ParserRegistry::with_plugins`](gleaner_core::registry::ParserRegistry::with_plugins).

mod decode;

pub mod csv;
pub mod feed;
pub mod gzip;
pub mod html;
pub mod plain;

use std::sync::Arc;

use gleaner_core::traits::Parser;

pub use csv::CsvParser;
pub use feed::FeedParser;
pub use gzip::GzipParser;
pub use html::HtmlParser;
pub use plain::PlainTextParser;

/// The standard plugin set, in registration order. Later registrations
/// win key collisions, so order here is part of the configuration.
pub fn default_plugins() -> Vec<Arc<dyn Parser>> {
    vec![
        PlainTextParser::new() as Arc<dyn Parser>,
        CsvParser::new(),
        FeedParser::new(),
        HtmlParser::new(),
        GzipParser::new(),
    ]
}
