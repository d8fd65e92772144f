//! Installation tracker
//!
//! The tracker is the durable ledger of components this process installed.
//! It is an insertion-ordered set of [`ComponentId`]s stored as YAML at a
//! well-known path:
//!
//! ```yaml
//! components:
//!   - iptables
//!   - signing-helper
//! ```
//!
//! # Persistence
//!
//! The ledger is read once when the tracker is loaded (a missing file is an
//! empty set), mutated in memory, and written back in full after every
//! mutation that changes it, before the call returns. Writes go to a sibling
//! temp file which is then renamed over the ledger.
//!
//! There is no locking: only one bootstrap process may run per node.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::artifact::ComponentId;
use crate::{Error, Result};

/// Default location of the ledger
pub const DEFAULT_TRACKER_PATH: &str = "/opt/nodeadm/tracker";

#[derive(Debug, Default, Serialize, Deserialize)]
struct TrackerFile {
    #[serde(default)]
    components: Vec<ComponentId>,
}

/// Persisted set of installed components
#[derive(Debug)]
pub struct Tracker {
    path: PathBuf,
    components: Vec<ComponentId>,
}

impl Tracker {
    /// Load the ledger at `path`, starting empty if it does not exist yet
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let components = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => Vec::new(),
            Ok(content) => {
                let file: TrackerFile = serde_yaml::from_str(&content)
                    .map_err(|e| Error::persistence(&path, format!("invalid tracker file: {}", e)))?;
                let mut components: Vec<ComponentId> = Vec::with_capacity(file.components.len());
                for id in file.components {
                    if !components.contains(&id) {
                        components.push(id);
                    }
                }
                components
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(Error::persistence(&path, e)),
        };

        debug!(path = %path.display(), count = components.len(), "Loaded tracker");
        Ok(Self { path, components })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Components in the order they were recorded
    pub fn components(&self) -> &[ComponentId] {
        &self.components
    }

    /// Whether `id` is recorded as installed
    pub fn has(&self, id: &ComponentId) -> bool {
        self.components.contains(id)
    }

    /// Record `id` as installed; a no-op if it is already present
    pub fn add(&mut self, id: ComponentId) -> Result<()> {
        if self.has(&id) {
            return Ok(());
        }
        self.components.push(id);
        if let Err(e) = self.persist() {
            self.components.pop();
            return Err(e);
        }
        Ok(())
    }

    /// Forget `id`; a no-op if it is absent
    pub fn remove(&mut self, id: &ComponentId) -> Result<()> {
        let Some(pos) = self.components.iter().position(|c| c == id) else {
            return Ok(());
        };
        let removed = self.components.remove(pos);
        if let Err(e) = self.persist() {
            self.components.insert(pos, removed);
            return Err(e);
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let content = serde_yaml::to_string(&TrackerFile {
            components: self.components.clone(),
        })
        .map_err(|e| Error::persistence(&self.path, e))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::persistence(&self.path, e))?;
        }

        let tmp = self.path.with_extension("tmp");
        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)?;
            sync_parent(&self.path)
        };
        write().map_err(|e| {
            let _ = fs::remove_file(&tmp);
            Error::persistence(&self.path, e)
        })?;

        debug!(path = %self.path.display(), count = self.components.len(), "Persisted tracker");
        Ok(())
    }
}

/// Flush the directory entry for `path` so a completed rename survives power loss
fn sync_parent(path: &Path) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::File::open(dir)?.sync_all()
}
