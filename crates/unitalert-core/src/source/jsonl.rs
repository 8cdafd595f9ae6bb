//! JSON lines unit source

use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collector::UnitSender;
use crate::error::Result;
use crate::models::{unit_object_path, UnitStatus};

use super::UnitSource;

/// Reads one JSON [`UnitStatus`] per line.
///
/// Blank lines and lines starting with `#` are skipped. A missing `path`
/// is derived from the unit name. End of input closes the stream.
pub struct JsonLinesSource {
    name: String,
    reader: Box<dyn AsyncBufRead + Send + Unpin>,
}

impl JsonLinesSource {
    /// Create a source over any buffered reader
    pub fn new(name: impl Into<String>, reader: impl AsyncBufRead + Send + Unpin + 'static) -> Self {
        Self {
            name: name.into(),
            reader: Box::new(reader),
        }
    }

    /// Read records from standard input
    pub fn stdin() -> Self {
        Self::new("stdin", BufReader::new(tokio::io::stdin()))
    }

    /// Read records from a file
    pub async fn open(path: &Path) -> Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Self::new(path.display().to_string(), BufReader::new(file)))
    }

    fn decode(line: &str) -> std::result::Result<UnitStatus, String> {
        let mut unit: UnitStatus = serde_json::from_str(line).map_err(|e| e.to_string())?;
        if unit.name.is_empty() {
            return Err("unit name is empty".to_string());
        }
        if unit.path.is_empty() {
            unit.path = unit_object_path(&unit.name);
        }
        Ok(unit)
    }
}

#[async_trait]
impl UnitSource for JsonLinesSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(self: Box<Self>, tx: UnitSender, cancel: CancellationToken) -> Result<()> {
        let Self { name, reader } = *self;
        let mut lines = reader.lines();
        let mut line_no = 0usize;

        loop {
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = cancel.cancelled() => break,
            };

            let Some(line) = line else {
                info!(source = %name, lines = line_no, "End of input");
                break;
            };
            line_no += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            match Self::decode(trimmed) {
                Ok(unit) => {
                    debug!(source = %name, unit = %unit.name, sub_state = %unit.sub_state, "Unit record");
                    if tx.send(unit).is_err() {
                        debug!(source = %name, "Pipeline gone, stopping source");
                        break;
                    }
                }
                Err(e) => warn!(source = %name, line = line_no, error = %e, "Skipping malformed unit record"),
            }
        }

        Ok(())
    }
}
