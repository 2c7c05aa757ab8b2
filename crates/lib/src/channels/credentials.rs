//! Credential store: persisted WhatsApp session credentials (opaque JSON from the bridge).
//!
//! Saved on every `creds.update` and handed back to the bridge when a session starts, so a
//! reconnect or restart does not need a new pairing.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

const CREDS_FILE: &str = "creds.json";
const LOCK_FILE: &str = "creds.lock";

/// Hook invoked by the supervisor to persist and reload credentials.
pub trait CredentialStore: Send + Sync {
    /// Saved credentials, or None when the device has never been paired.
    fn load(&self) -> Result<Option<serde_json::Value>>;
    fn save(&self, creds: &serde_json::Value) -> Result<()>;
}

/// Stores credentials as `creds.json` in a directory. Writes go through a temp file and a
/// rename while holding an exclusive lock on `creds.lock`.
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn creds_path(&self) -> PathBuf {
        self.dir.join(CREDS_FILE)
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<serde_json::Value>> {
        let path = self.creds_path();
        if !path.exists() {
            return Ok(None);
        }
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading credentials from {}", path.display()))?;
        let creds = serde_json::from_str(&s)
            .with_context(|| format!("parsing credentials from {}", path.display()))?;
        Ok(Some(creds))
    }

    fn save(&self, creds: &serde_json::Value) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating auth directory {}", self.dir.display()))?;
        let lock_path = self.dir.join(LOCK_FILE);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("opening {}", lock_path.display()))?;
        FileExt::lock_exclusive(&lock)
            .with_context(|| format!("locking {}", lock_path.display()))?;

        let path = self.creds_path();
        let tmp = self.dir.join(format!("{}.tmp", CREDS_FILE));
        let json = serde_json::to_vec_pretty(creds)?;
        let written = std::fs::write(&tmp, json)
            .and_then(|_| std::fs::rename(&tmp, &path))
            .with_context(|| format!("writing credentials to {}", path.display()));
        let _ = FileExt::unlock(&lock);
        written
    }
}
