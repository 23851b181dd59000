use crate::error::{Result, StoreError};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Append-only NDJSON trail. Never rewritten and never read by the pipeline.
pub struct AuditLog {
    path: PathBuf,
    w: BufWriter<File>,
}

impl AuditLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        }
        let f = OpenOptions::new().create(true).append(true).open(path).map_err(|e| StoreError::io(path, e))?;
        Ok(AuditLog { path: path.to_path_buf(), w: BufWriter::new(f) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event and flush it so the line is on disk as soon as the
    /// probe completes.
    pub fn append<T: Serialize>(&mut self, event: &T) -> Result<()> {
        let line = serde_json::to_string(event).map_err(|source| StoreError::Encode { path: self.path.clone(), source })?;
        writeln!(self.w, "{line}").and_then(|_| self.w.flush()).map_err(|e| StoreError::io(&self.path, e))
    }
}

/// One resolution observation in the host graph.
#[derive(Debug, Clone, Serialize)]
pub struct IpEdge<'a> {
    pub ts: i64,
    pub host: &'a str,
    pub ip: &'a str,
    pub event: &'static str,
}
