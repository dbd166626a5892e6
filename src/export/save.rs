use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use tempfile::NamedTempFile;

use crate::error::{ExportError, Result};

/// Where finished archives go.
pub trait FileSaver {
    /// Persists `bytes` under (a variant of) `file_name` and returns the path.
    fn save(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf>;
}

/// Saves into a directory without overwriting: a taken name gets a ` (n)`
/// suffix, the way browsers name repeated downloads.
pub struct DirectorySaver {
    dir: PathBuf,
}

impl DirectorySaver {
    const MAX_ATTEMPTS: u32 = 1000;

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FileSaver for DirectorySaver {
    fn save(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let save_err = |path: &Path, source: io::Error| ExportError::Save {
            path: path.to_path_buf(),
            source,
        };

        fs::create_dir_all(&self.dir).map_err(|e| save_err(&self.dir, e))?;

        // Written next to the target so the final rename stays on one filesystem.
        let mut temp = NamedTempFile::new_in(&self.dir).map_err(|e| save_err(&self.dir, e))?;
        temp.write_all(bytes)
            .and_then(|()| temp.flush())
            .map_err(|e| save_err(temp.path(), e))?;
        debug!("Wrote {} bytes to {:?}", bytes.len(), temp.path());

        for attempt in 1..=Self::MAX_ATTEMPTS {
            let target = self.dir.join(numbered_name(file_name, attempt));
            match temp.persist_noclobber(&target) {
                Ok(_) => {
                    info!("Saved archive to {}", target.display());
                    return Ok(target);
                }
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => temp = e.file,
                Err(e) => return Err(save_err(&target, e.error)),
            }
        }

        Err(save_err(
            &self.dir.join(file_name),
            io::Error::new(io::ErrorKind::AlreadyExists, "no free file name"),
        ))
    }
}

/// `name.zip`, then `name (2).zip`, `name (3).zip`, ...
fn numbered_name(file_name: &str, attempt: u32) -> String {
    if attempt <= 1 {
        return file_name.to_string();
    }
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem} ({attempt}).{ext}"),
        _ => format!("{file_name} ({attempt})"),
    }
}
