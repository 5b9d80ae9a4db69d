//! Session file persistence.
//!
//! The session is written as JSON through a temporary file in the same
//! directory and then renamed into place, so a crash never leaves a torn
//! file behind.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use forcelink_session::Session;

/// A session saved at a fixed path.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the saved session, or `None` if nothing has been saved yet.
    pub fn load(&self) -> Result<Option<Session>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read session file {}", self.path.display()))?;
        let session = serde_json::from_str(&contents)
            .with_context(|| format!("invalid session file {}", self.path.display()))?;
        Ok(Some(session))
    }

    /// Load the saved session or fail with a hint to log in.
    pub fn require(&self) -> Result<Session> {
        self.load()?.with_context(|| {
            format!(
                "no session at {}; run `forcelink login` first",
                self.path.display()
            )
        })
    }

    /// Save `session`, replacing any previous file.
    pub fn save(&self, session: &Session) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let json = serde_json::to_vec_pretty(session).context("failed to serialize session")?;
        let mut file = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
        file.write_all(&json).context("failed to write session")?;
        file.persist(&self.path)
            .with_context(|| format!("failed to save session to {}", self.path.display()))?;

        tracing::debug!(path = %self.path.display(), "session saved");
        Ok(())
    }
}
