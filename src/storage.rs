//! Local persistence for session preferences.
//!
//! ```text
//! <root>/
//!   prefs.json    # Developer token and location toggle
//! ```

use std::{fs, io, path::PathBuf};

use serde::{Deserialize, Serialize};

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = core::result::Result<T, StorageError>;

/// Preferences that persist between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub token: Option<String>,

    /// Start location tracking with each session.
    pub use_gps: bool,
}

/// File-based preference storage.
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Creates a new storage instance rooted at the given directory.
    ///
    /// The directory is created if it doesn't exist.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Returns the default storage root: `~/.mapper/`.
    pub fn default_root() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".mapper"))
    }

    fn prefs_path(&self) -> PathBuf {
        self.root.join("prefs.json")
    }

    /// Loads preferences. A missing file yields defaults.
    pub fn load_prefs(&self) -> Result<Preferences> {
        match fs::read_to_string(self.prefs_path()) {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Preferences::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save_prefs(&self, prefs: &Preferences) -> Result<()> {
        let json = serde_json::to_string_pretty(prefs)?;
        fs::write(self.prefs_path(), json)?;
        Ok(())
    }

    pub fn set_token(&self, token: &str) -> Result<()> {
        self.update(|p| p.token = Some(token.to_string()))
    }

    pub fn clear_token(&self) -> Result<()> {
        self.update(|p| p.token = None)
    }

    pub fn set_use_gps(&self, on: bool) -> Result<()> {
        self.update(|p| p.use_gps = on)
    }

    fn update(&self, f: impl FnOnce(&mut Preferences)) -> Result<()> {
        let mut prefs = self.load_prefs()?;
        f(&mut prefs);
        self.save_prefs(&prefs)
    }
}
