//! Atomic file replacement.
//!
//! Writes go to a uniquely named temp file in the target's directory and are
//! renamed over the target on [`AtomicFileWriter::commit`]. Readers see either
//! the previous file or the complete new one. A writer dropped before commit
//! (error, panic, cancelled task) removes its temp file and leaves the target
//! untouched.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Writer that atomically replaces a file on commit.
#[derive(Debug)]
pub struct AtomicFileWriter {
    target: PathBuf,
    temp_path: PathBuf,
    file: Option<File>,
}

impl AtomicFileWriter {
    /// Opens a temp file next to `target` with permissions `mode`.
    pub fn new(target: &Path, mode: u32) -> Result<Self> {
        let dir = target.parent().unwrap_or_else(|| Path::new("."));
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        // Unique per writer so concurrent writers never share a temp file.
        let temp_path = dir.join(format!(".{file_name}.tmp.{}", uuid::Uuid::now_v7()));

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;

        let file = options.open(&temp_path).map_err(|e| Error::IoAt {
            context: "failed to create temp file",
            path: temp_path.clone(),
            source: e,
        })?;

        Ok(Self {
            target: target.to_path_buf(),
            temp_path,
            file: Some(file),
        })
    }

    /// Path that will be replaced on commit.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Flushes to disk and renames the temp file over the target.
    pub fn commit(mut self) -> Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        file.sync_all().map_err(|e| Error::IoAt {
            context: "failed to sync",
            path: self.temp_path.clone(),
            source: e,
        })?;
        drop(file);

        fs::rename(&self.temp_path, &self.target).map_err(|e| Error::IoAt {
            context: "failed to rename temp file onto",
            path: self.target.clone(),
            source: e,
        })?;
        // Renamed; nothing left for Drop to clean.
        self.temp_path = PathBuf::new();
        Ok(())
    }
}

impl Write for AtomicFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.write(buf),
            None => Err(io::Error::other("atomic writer already committed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for AtomicFileWriter {
    fn drop(&mut self) {
        if !self.temp_path.as_os_str().is_empty() {
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}

/// Serializes `value` as JSON and atomically replaces `path` with it.
pub fn write_json_atomic<T: Serialize>(path: &Path, mode: u32, value: &T) -> Result<()> {
    let mut writer = AtomicFileWriter::new(path, mode)?;
    serde_json::to_writer(&mut writer, value).map_err(|e| Error::Serialization(e.to_string()))?;
    writer.write_all(b"\n")?;
    writer.commit()
}

/// Reads a JSON document from `path`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = fs::read(path).map_err(|e| Error::IoAt {
        context: "failed to read",
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_slice(&data)
        .map_err(|e| Error::Serialization(format!("{}: {e}", path.display())))
}
