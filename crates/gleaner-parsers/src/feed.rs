use std::sync::Arc;

use quick_xml::Reader;
use quick_xml::events::Event;
use url::Url;

use gleaner_core::error::AppError;
use gleaner_core::models::Document;
use gleaner_core::registry::{ParseJob, ParserRegistry};
use gleaner_core::traits::Parser;

use crate::decode::decode_text;

/// XML events between cooperative cancellation checks.
const CANCEL_CHECK_EVENTS: usize = 512;

#[derive(Clone, Copy, PartialEq)]
enum Field {
    Title,
    Link,
    Description,
}

#[derive(Default)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
}

/// RSS/Atom feed extractor. Handles both `<item>` and `<entry>` framing;
/// Atom link elements carry the target in an `href` attribute.
pub struct FeedParser;

impl FeedParser {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl Parser for FeedParser {
    fn name(&self) -> &str {
        "Rich Site Summary/Atom Feed Parser"
    }

    fn supported_content_types(&self) -> Vec<String> {
        vec![
            "application/rss+xml".to_string(),
            "application/atom+xml".to_string(),
            "text/rss".to_string(),
            "application/rdf+xml".to_string(),
        ]
    }

    fn supported_extensions(&self) -> Vec<String> {
        vec!["rss".to_string(), "atom".to_string(), "xml".to_string()]
    }

    fn parse(&self, job: &ParseJob<'_>, _registry: &ParserRegistry) -> Result<Document, AppError> {
        let (xml, charset) = decode_text(job.bytes, job.charset);
        let mut reader = Reader::from_str(&xml);
        reader.config_mut().trim_text(true);

        let mut channel_title: Option<String> = None;
        let mut items: Vec<Item> = Vec::new();
        let mut in_item = false;
        let mut field: Option<Field> = None;
        let mut events = 0usize;

        loop {
            events += 1;
            if events % CANCEL_CHECK_EVENTS == 0 && job.cancel.is_cancelled() {
                return Err(AppError::Interrupted);
            }
            match reader.read_event() {
                Ok(Event::Start(e)) => match e.local_name().as_ref() {
                    b"item" | b"entry" => {
                        in_item = true;
                        items.push(Item::default());
                    }
                    b"title" => field = Some(Field::Title),
                    b"link" => field = Some(Field::Link),
                    b"description" | b"summary" => field = Some(Field::Description),
                    _ => field = None,
                },
                Ok(Event::Empty(e)) => {
                    // Atom: <link href="..."/>
                    if in_item && e.local_name().as_ref() == b"link" {
                        for attr in e.attributes().flatten() {
                            if attr.key.local_name().as_ref() == b"href" {
                                if let Ok(value) = attr.unescape_value() {
                                    if let Some(item) = items.last_mut() {
                                        item.link = Some(value.into_owned());
                                    }
                                }
                            }
                        }
                    }
                }
                Ok(Event::Text(t)) => {
                    let Ok(value) = t.unescape() else { continue };
                    let value = value.trim().to_string();
                    if value.is_empty() {
                        continue;
                    }
                    match (in_item, field, items.last_mut()) {
                        (true, Some(Field::Title), Some(item)) => item.title = Some(value),
                        (true, Some(Field::Link), Some(item)) => item.link = Some(value),
                        (true, Some(Field::Description), Some(item)) => {
                            item.description = Some(value);
                        }
                        (false, Some(Field::Title), _) => {
                            if channel_title.is_none() {
                                channel_title = Some(value);
                            }
                        }
                        _ => {}
                    }
                }
                Ok(Event::End(e)) => {
                    if matches!(e.local_name().as_ref(), b"item" | b"entry") {
                        in_item = false;
                    }
                    field = None;
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(AppError::parse_failure(
                        format!("malformed feed XML: {e}"),
                        job.location,
                    ));
                }
            }
        }

        if channel_title.is_none() && items.is_empty() {
            return Err(AppError::parse_failure(
                "no feed channel or entries found",
                job.location,
            ));
        }

        let mut links: Vec<Url> = Vec::new();
        let mut text = String::new();
        for item in &items {
            if let Some(title) = &item.title {
                text.push_str(title);
                text.push('\n');
            }
            if let Some(description) = &item.description {
                text.push_str(description);
                text.push('\n');
            }
            if let Some(link) = &item.link {
                if let Ok(absolute) = job.location.join(link) {
                    links.push(absolute);
                }
            }
        }

        let mut doc = Document::new(job.location, job.content_type.clone(), text.trim_end())
            .with_charset(charset)
            .with_links(links);
        doc.title = channel_title;
        Ok(doc)
    }
}
