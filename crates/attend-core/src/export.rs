//! Where finished exports go.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("invalid export filename: {0}")]
    InvalidFilename(String),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Saves a named text document somewhere the user can reach it.
pub trait Exporter {
    fn export(&self, filename: &str, content: &str) -> Result<(), ExportError>;
}

/// Writes exports as files into a directory.
#[derive(Debug, Clone)]
pub struct FileExporter {
    dir: PathBuf,
}

impl FileExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path an export with this name would be written to.
    pub fn path_for(&self, filename: &str) -> Result<PathBuf, ExportError> {
        let name = Path::new(filename);
        let plain = name.file_name().map(|f| f == name.as_os_str()).unwrap_or(false);
        if filename.is_empty() || !plain {
            return Err(ExportError::InvalidFilename(filename.to_string()));
        }
        Ok(self.dir.join(name))
    }
}

impl Exporter for FileExporter {
    fn export(&self, filename: &str, content: &str) -> Result<(), ExportError> {
        let path = self.path_for(filename)?;
        std::fs::create_dir_all(&self.dir).map_err(|source| ExportError::Io {
            path: self.dir.clone(),
            source,
        })?;
        std::fs::write(&path, content).map_err(|source| ExportError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::info!(path = %path.display(), bytes = content.len(), "export written");
        Ok(())
    }
}
