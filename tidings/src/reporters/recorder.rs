use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::Path,
};

use crate::{Envelope, Result, Sink};

/// A reporter that appends envelopes to a file in JSON Lines format.
///
/// Each envelope is written as one JSON object per line and flushed
/// immediately, so the file is readable while the monitor runs.
///
/// # Example
///
/// ```rust,no_run
/// use tidings::{Filter, MonitorConfig, ReporterSpec, reporters::Recorder};
///
/// # fn main() -> tidings::Result {
/// let recorder = Recorder::new("events.jsonl")?;
/// let config = MonitorConfig::default()
///     .with_reporter(ReporterSpec::instance(recorder, Filter::new().all("response")));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Recorder {
    writer: BufWriter<File>,
}

impl Recorder {
    /// Open (or create) the file at `path` for appending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IoError`](crate::Error::IoError) if the file cannot be opened.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl Sink for Recorder {
    async fn write(&mut self, envelope: &Envelope) -> Result<()> {
        serde_json::to_writer(&mut self.writer, envelope)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn name(&self) -> &str {
        "recorder"
    }
}
