//! JSON file store for the whole protocol state

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::domain::{ProtocolData, TreeSnapshot};
use crate::infrastructure::error::{InfraError, InfraResult};
use crate::infrastructure::traits::PersistenceHook;

/// File-backed store for [`ProtocolData`].
///
/// A missing file yields default data. The store performs no caching:
/// every load reads the file, every save rewrites it.
#[derive(Debug, Clone)]
pub struct ProtocolStore {
    path: PathBuf,
}

impl ProtocolStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load protocol data, falling back to defaults if the file is absent.
    pub fn load(&self) -> InfraResult<ProtocolData> {
        if !self.path.exists() {
            debug!("load: {} absent, using defaults", self.path.display());
            return Ok(ProtocolData::default());
        }

        let content = fs::read_to_string(&self.path)
            .map_err(|e| InfraError::io(format!("read {}", self.path.display()), e))?;

        serde_json::from_str(&content).map_err(|e| InfraError::Data {
            context: self.path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Write protocol data as pretty JSON, creating parent directories.
    pub fn save(&self, data: &ProtocolData) -> InfraResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| InfraError::io(format!("create {}", parent.display()), e))?;
            }
        }

        let content = serde_json::to_string_pretty(data).map_err(|e| InfraError::Data {
            context: self.path.display().to_string(),
            message: e.to_string(),
        })?;

        fs::write(&self.path, content)
            .map_err(|e| InfraError::io(format!("write {}", self.path.display()), e))?;
        debug!("save: wrote {}", self.path.display());
        Ok(())
    }
}

impl PersistenceHook for ProtocolStore {
    /// Splice a fresh tree snapshot into the file, keeping the chain
    /// portion of the data untouched.
    fn persist(&self, snapshot: &TreeSnapshot) {
        let mut data = match self.load() {
            Ok(data) => data,
            Err(e) => {
                // Don't clobber a file we cannot read.
                warn!("persist: cannot load current state, skipping save: {e}");
                return;
            }
        };

        data.formulas = snapshot.clone();
        if let Err(e) = self.save(&data) {
            warn!("persist: failed to save formula snapshot: {e}");
        }
    }
}
