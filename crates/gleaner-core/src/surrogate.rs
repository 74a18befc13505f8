//! File-backed surrogate storage: durable staging of harvested batches.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use quick_xml::escape::escape;
use url::Url;

use crate::error::AppError;
use crate::models::HarvestRecord;
use crate::scheduler::filename_for_source;
use crate::traits::{RecordSink, SurrogateStore};

/// Writes each harvested batch to a uniquely named XML file inside one
/// directory. The filename embeds the source's host identity and a
/// fixed-width stamp (see [`crate::scheduler::filename_for_source`]),
/// which is what the de-duplication scan keys on.
#[derive(Clone)]
pub struct FileSurrogateStore {
    dir: PathBuf,
}

impl FileSurrogateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, AppError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SurrogateStore for FileSurrogateStore {
    type Batch = FileRecordSink;

    fn begin_batch(&self, source: &Url) -> Result<FileRecordSink, AppError> {
        let path = self.dir.join(filename_for_source(source, Utc::now()));
        let mut writer = BufWriter::new(File::create(&path)?);
        writeln!(writer, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>")?;
        writeln!(writer, "<surrogates source=\"{}\">", escape(source.as_str()))?;
        Ok(FileRecordSink { writer, path })
    }
}

/// Streaming writer for one surrogate file. Records are flushed through a
/// buffered writer as they arrive; `commit` closes the document element.
pub struct FileRecordSink {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl FileRecordSink {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSink for FileRecordSink {
    fn append(&mut self, record: &HarvestRecord) -> Result<(), AppError> {
        writeln!(self.writer, "  <record>")?;
        let fields = [
            ("guid", &record.guid),
            ("title", &record.title),
            ("link", &record.link),
            ("description", &record.description),
            ("pubDate", &record.pubdate),
        ];
        for (tag, value) in fields {
            if let Some(value) = value {
                writeln!(self.writer, "    <{tag}>{}</{tag}>", escape(value.as_str()))?;
            }
        }
        writeln!(self.writer, "  </record>")?;
        Ok(())
    }

    fn commit(mut self) -> Result<(), AppError> {
        writeln!(self.writer, "</surrogates>")?;
        self.writer.flush()?;
        Ok(())
    }
}
