//! Batch reader for OAI-style metadata listings.
//!
//! Streams every `<record>` into the surrogate sink as it is read and
//! extracts the `<resumptionToken>` element for the next page. The wire
//! format stays behind this reader; nothing upstream sees XML.

use chrono::DateTime;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use url::Url;

use gleaner_core::cursor::ResumptionCursor;
use gleaner_core::error::AppError;
use gleaner_core::models::HarvestRecord;
use gleaner_core::traits::{BatchReader, HarvestBatch, RecordSink};

#[derive(Clone, Copy, PartialEq)]
enum Field {
    Guid,
    Title,
    Link,
    Description,
    Date,
    Token,
    ErrorText,
}

#[derive(Clone, Default)]
pub struct OaiBatchReader;

impl OaiBatchReader {
    pub fn new() -> Self {
        Self
    }
}

fn token_attributes(element: &BytesStart<'_>, cursor: &mut ResumptionCursor) {
    for attr in element.attributes().flatten() {
        let Ok(value) = attr.unescape_value() else {
            continue;
        };
        match attr.key.local_name().as_ref() {
            b"cursor" => {
                if let Ok(position) = value.parse::<u64>() {
                    cursor.cursor = position;
                }
            }
            b"completeListSize" => {
                cursor.complete_list_size = value.parse::<u64>().ok();
            }
            b"expirationDate" => {
                cursor.expiration = DateTime::parse_from_rfc3339(&value)
                    .ok()
                    .map(|d| d.to_utc());
            }
            _ => {}
        }
    }
}

impl BatchReader for OaiBatchReader {
    fn read_page<S: RecordSink>(
        &self,
        source: &Url,
        bytes: &[u8],
        sink: &mut S,
    ) -> Result<HarvestBatch, AppError> {
        let xml = String::from_utf8_lossy(bytes);
        let mut reader = Reader::from_str(&xml);
        reader.config_mut().trim_text(true);

        let mut current: Option<HarvestRecord> = None;
        let mut in_header = false;
        let mut field: Option<Field> = None;
        let mut records = 0u64;
        let mut cursor = ResumptionCursor::default();
        let mut token_text: Option<String> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => match e.local_name().as_ref() {
                    b"record" => {
                        current = Some(HarvestRecord::default());
                        in_header = false;
                        field = None;
                    }
                    b"header" => in_header = true,
                    b"identifier" if current.is_some() => {
                        field = Some(if in_header { Field::Guid } else { Field::Link });
                    }
                    b"datestamp" if in_header => field = Some(Field::Date),
                    b"title" if current.is_some() => field = Some(Field::Title),
                    b"description" if current.is_some() => field = Some(Field::Description),
                    b"date" if current.is_some() && !in_header => field = Some(Field::Date),
                    b"resumptionToken" => {
                        token_attributes(&e, &mut cursor);
                        field = Some(Field::Token);
                    }
                    b"error" => field = Some(Field::ErrorText),
                    _ => field = None,
                },
                Ok(Event::Empty(e)) => {
                    if e.local_name().as_ref() == b"resumptionToken" {
                        token_attributes(&e, &mut cursor);
                    }
                }
                Ok(Event::Text(t)) => {
                    let Ok(value) = t.unescape() else { continue };
                    let value = value.trim();
                    if value.is_empty() {
                        continue;
                    }
                    match (field, current.as_mut()) {
                        (Some(Field::ErrorText), _) => {
                            return Err(AppError::Fetch(format!(
                                "endpoint reported an error: {value}"
                            )));
                        }
                        (Some(Field::Token), _) => token_text = Some(value.to_string()),
                        (Some(Field::Guid), Some(record)) => {
                            record.guid = Some(value.to_string());
                        }
                        (Some(Field::Title), Some(record)) => {
                            record.title = Some(value.to_string());
                        }
                        (Some(Field::Link), Some(record)) => {
                            record.link = Some(value.to_string());
                        }
                        (Some(Field::Description), Some(record)) => {
                            record.description = Some(value.to_string());
                        }
                        (Some(Field::Date), Some(record)) => {
                            record.pubdate = Some(value.to_string());
                        }
                        _ => {}
                    }
                }
                Ok(Event::End(e)) => {
                    match e.local_name().as_ref() {
                        b"record" => {
                            if let Some(record) = current.take() {
                                if !record.is_empty() {
                                    sink.append(&record)?;
                                    records += 1;
                                }
                            }
                        }
                        b"header" => in_header = false,
                        _ => {}
                    }
                    field = None;
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(AppError::parse_failure(
                        format!("malformed harvest listing: {e}"),
                        source,
                    ));
                }
            }
        }

        cursor.token = token_text;
        tracing::debug!(
            source = %source,
            records,
            exhausted = cursor.is_exhausted(),
            "listing page read"
        );
        Ok(HarvestBatch { records, cursor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gleaner_core::testutil::MemorySurrogateStore;
    use gleaner_core::traits::{RecordSink as _, SurrogateStore};

    const LISTING: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
  <ListRecords>
    <record>
      <header>
        <identifier>oai:archive.example.org:11</identifier>
        <datestamp>2009-11-02</datestamp>
      </header>
      <metadata>
        <oai_dc:dc xmlns:oai_dc="http://www.openarchives.org/OAI/2.0/oai_dc/"
                   xmlns:dc="http://purl.org/dc/elements/1.1/">
          <dc:title>First Paper</dc:title>
          <dc:identifier>http://archive.example.org/11</dc:identifier>
          <dc:description>About things &amp; stuff</dc:description>
          <dc:date>2009-10-30</dc:date>
        </oai_dc:dc>
      </metadata>
    </record>
    <record>
      <header><identifier>oai:archive.example.org:12</identifier></header>
      <metadata>
        <oai_dc:dc xmlns:oai_dc="http://www.openarchives.org/OAI/2.0/oai_dc/"
                   xmlns:dc="http://purl.org/dc/elements/1.1/">
          <dc:title>Second Paper</dc:title>
        </oai_dc:dc>
      </metadata>
    </record>
    <resumptionToken cursor="0" completeListSize="100"
        expirationDate="2009-11-03T12:00:00Z">tok-abc/123</resumptionToken>
  </ListRecords>
</OAI-PMH>"#;

    fn source() -> Url {
        Url::parse("http://archive.example.org/oai?verb=ListRecords").unwrap()
    }

    #[test]
    fn streams_records_and_extracts_token() {
        let store = MemorySurrogateStore::new();
        let mut sink = store.begin_batch(&source()).unwrap();

        let batch = OaiBatchReader::new()
            .read_page(&source(), LISTING.as_bytes(), &mut sink)
            .unwrap();
        sink.commit().unwrap();

        assert_eq!(batch.records, 2);
        assert_eq!(batch.cursor.token.as_deref(), Some("tok-abc/123"));
        assert_eq!(batch.cursor.cursor, 0);
        assert_eq!(batch.cursor.complete_list_size, Some(100));
        assert!(batch.cursor.expiration.is_some());
        assert!(!batch.cursor.is_exhausted());
        assert!(batch.cursor.next_url(&source()).is_some());

        let batches = store.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].title.as_deref(), Some("First Paper"));
        assert_eq!(
            batches[0][0].guid.as_deref(),
            Some("oai:archive.example.org:11")
        );
        assert_eq!(
            batches[0][0].description.as_deref(),
            Some("About things & stuff")
        );
        assert_eq!(batches[0][0].pubdate.as_deref(), Some("2009-10-30"));
        assert_eq!(batches[0][1].title.as_deref(), Some("Second Paper"));
    }

    #[test]
    fn missing_token_means_exhaustion() {
        let xml = r#"<OAI-PMH><ListRecords>
            <record><header><identifier>oai:a:1</identifier></header></record>
        </ListRecords></OAI-PMH>"#;
        let store = MemorySurrogateStore::new();
        let mut sink = store.begin_batch(&source()).unwrap();
        let batch = OaiBatchReader::new()
            .read_page(&source(), xml.as_bytes(), &mut sink)
            .unwrap();
        assert_eq!(batch.records, 1);
        assert!(batch.cursor.is_exhausted());
        assert!(batch.cursor.next_url(&source()).is_none());
    }

    #[test]
    fn endpoint_error_element_fails_the_page() {
        let xml = r#"<OAI-PMH><error code="badResumptionToken">token expired</error></OAI-PMH>"#;
        let store = MemorySurrogateStore::new();
        let mut sink = store.begin_batch(&source()).unwrap();
        let err = OaiBatchReader::new()
            .read_page(&source(), xml.as_bytes(), &mut sink)
            .unwrap_err();
        assert!(err.to_string().contains("token expired"));
    }

    #[test]
    fn malformed_xml_is_a_parse_failure() {
        let store = MemorySurrogateStore::new();
        let mut sink = store.begin_batch(&source()).unwrap();
        let err = OaiBatchReader::new()
            .read_page(&source(), b"<OAI-PMH><ListRecords></broken>", &mut sink)
            .unwrap_err();
        assert!(err.is_parse_failure());
    }
}
