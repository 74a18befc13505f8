use std::sync::Arc;

use htmd::HtmlToMarkdown;
use scraper::{Html, Selector};
use url::Url;

use gleaner_core::error::AppError;
use gleaner_core::models::Document;
use gleaner_core::registry::{ParseJob, ParserRegistry};
use gleaner_core::traits::Parser;

use crate::decode::decode_text;

/// HTML extractor.
///
/// The text body is the page converted to Markdown with non-content
/// elements stripped; title and outbound links come from the DOM.
pub struct HtmlParser {
    converter: HtmlToMarkdown,
    title_selector: Selector,
    anchor_selector: Selector,
}

impl HtmlParser {
    pub fn new() -> Arc<Self> {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(vec![
                "script", "style", "nav", "footer", "header", "aside", "noscript", "iframe", "svg",
            ])
            .build();
        // both selectors are static and syntactically valid
        let title_selector = Selector::parse("title").expect("static selector");
        let anchor_selector = Selector::parse("a[href]").expect("static selector");
        Arc::new(Self {
            converter,
            title_selector,
            anchor_selector,
        })
    }
}

impl Parser for HtmlParser {
    fn name(&self) -> &str {
        "Streaming HTML Parser"
    }

    fn supported_content_types(&self) -> Vec<String> {
        vec![
            "text/html".to_string(),
            "application/xhtml+xml".to_string(),
            "application/x-httpd-php".to_string(),
        ]
    }

    fn supported_extensions(&self) -> Vec<String> {
        vec![
            "html".to_string(),
            "htm".to_string(),
            "xhtml".to_string(),
            "shtml".to_string(),
            "php".to_string(),
        ]
    }

    fn parse(&self, job: &ParseJob<'_>, _registry: &ParserRegistry) -> Result<Document, AppError> {
        let (html, charset) = decode_text(job.bytes, job.charset);
        if job.cancel.is_cancelled() {
            return Err(AppError::Interrupted);
        }

        let text = self
            .converter
            .convert(&html)
            .map_err(|e| AppError::parse_failure(format!("markdown conversion: {e}"), job.location))?;

        let dom = Html::parse_document(&html);
        let title = dom
            .select(&self.title_selector)
            .next()
            .map(|t| t.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty());

        let mut links: Vec<Url> = Vec::new();
        for anchor in dom.select(&self.anchor_selector) {
            if let Some(href) = anchor.value().attr("href") {
                if let Ok(absolute) = job.location.join(href) {
                    if !links.contains(&absolute) {
                        links.push(absolute);
                    }
                }
            }
        }

        let mut doc = Document::new(job.location, job.content_type.clone(), text)
            .with_charset(charset)
            .with_links(links);
        doc.title = title;
        Ok(doc)
    }
}
