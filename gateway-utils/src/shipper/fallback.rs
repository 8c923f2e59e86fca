//! Append-only local store for log records
//!
//! Every record is written here before it is buffered for shipping, one JSON
//! object per line.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use gateway_protocol::LogRecord;

use crate::{GatewayError, Result};

pub struct FallbackStore {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl std::fmt::Debug for FallbackStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackStore")
            .field("path", &self.path)
            .finish()
    }
}

impl FallbackStore {
    /// Open (or create) the store at `path`, creating parent directories
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| GatewayError::FileWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| GatewayError::FileWrite {
                path: path.clone(),
                source: e,
            })?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and flush it to the OS
    pub fn append(&self, record: &LogRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{}", line)
            .and_then(|_| writer.flush())
            .map_err(|e| GatewayError::FileWrite {
                path: self.path.clone(),
                source: e,
            })
    }

    /// Read every record back from a store file
    ///
    /// Lines that fail to parse (e.g. a torn final write) are skipped.
    pub fn read_records(path: &Path) -> Result<Vec<LogRecord>> {
        let file = File::open(path).map_err(|e| GatewayError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(record) = serde_json::from_str(&line) {
                records.push(record);
            }
        }
        Ok(records)
    }
}
