use crate::crawler::{CrawlError, Crawler};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Crawl(#[from] CrawlError),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Write every crawl record to `path`, one JSON object per line. Returns the
/// number of records written.
pub fn export_jsonl<P: AsRef<Path>>(crawler: &Crawler, path: P) -> Result<usize, ExportError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    let mut count = 0;
    for record in crawler.iter_url_info() {
        let record = record?;
        serde_json::to_writer(&mut writer, &record)?;
        writer.write_all(b"\n")?;
        count += 1;
    }

    writer.flush()?;
    Ok(count)
}
