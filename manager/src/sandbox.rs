//! Bot identity validation and path confinement.
//!
//! Every bot name that reaches the manager from outside goes through
//! [`BotIdentity::parse`], and every filesystem path derived from one goes
//! through [`Sandbox`]. Rejections are deliberately uniform so callers cannot
//! tell which rule tripped.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tokio::fs;
use tracing::debug;

use crate::errors::ManagerError;

/// Message carried by every sandbox rejection
pub const INVALID_MESSAGE: &str = "invalid bot name or path";

/// Longest accepted identity; keeps the derived service name within the
/// platform's 63 character limit.
pub const MAX_IDENTITY_LEN: usize = 59;

const SERVICE_SUFFIX: &str = "-bot";

fn reject(detail: impl fmt::Display) -> ManagerError {
    debug!("Sandbox rejected input: {}", detail);
    ManagerError::ValidationError(INVALID_MESSAGE.to_string())
}

fn is_identity_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// A validated bot name: only `[A-Za-z0-9_-]`, never empty, never starting
/// with `-`, never containing `..`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BotIdentity(String);

impl BotIdentity {
    /// Sanitize and validate a raw bot name.
    ///
    /// Surrounding whitespace is trimmed. Each run of characters outside
    /// `[A-Za-z0-9_-]` becomes a single `-`, and a substituted `-` at the end
    /// is dropped, so `"My Bot!! "` becomes `"My-Bot"`. Names that are
    /// already valid pass through unchanged.
    pub fn parse(raw: &str) -> Result<Self, ManagerError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(reject("empty name"));
        }

        let mut sanitized = String::with_capacity(trimmed.len());
        let mut last_substituted = false;
        for c in trimmed.chars() {
            if is_identity_char(c) {
                sanitized.push(c);
                last_substituted = false;
            } else if !last_substituted {
                sanitized.push('-');
                last_substituted = true;
            }
        }
        if last_substituted {
            sanitized.pop();
        }

        if sanitized.is_empty()
            || sanitized.starts_with('-')
            || sanitized.contains("..")
            || sanitized.len() > MAX_IDENTITY_LEN
        {
            return Err(reject(format_args!("{raw:?} sanitized to {sanitized:?}")));
        }

        Ok(Self(sanitized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the bot's deployed service
    pub fn service_name(&self) -> ServiceName {
        ServiceName::from(self)
    }
}

impl fmt::Display for BotIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BotIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// External service name, always derived from a [`BotIdentity`]:
/// lowercase `{identity}-bot` with anything outside `[a-z0-9-]` turned into `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ServiceName(String);

impl ServiceName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&BotIdentity> for ServiceName {
    fn from(identity: &BotIdentity) -> Self {
        let name = format!("{}{}", identity.as_str(), SERVICE_SUFFIX)
            .to_lowercase()
            .chars()
            .map(|c| {
                if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        Self(name)
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Confines bot directories and files to a single root directory
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// Create the root if needed and pin it to its canonical absolute path
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, ManagerError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        let root = fs::canonicalize(&root).await?;
        Ok(Self { root })
    }

    /// Canonical bots root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a bot. Accepted only when it resolves to the root itself
    /// or a direct child of it, so a symlinked bot directory cannot escape.
    pub async fn resolve_bot_dir(&self, identity: &BotIdentity) -> Result<PathBuf, ManagerError> {
        let joined = self.root.join(identity.as_str());
        let resolved = canonicalize_lenient(&joined).await?;

        let inside = resolved == self.root || resolved.parent() == Some(self.root.as_path());
        if !inside {
            return Err(reject(format_args!("{} escapes the bots root", resolved.display())));
        }
        Ok(resolved)
    }

    /// Path of a file inside a bot's directory. The relative path may not be
    /// absolute or contain `..`, and the resolved path must lie strictly
    /// inside the bot directory.
    pub async fn resolve_file_path(
        &self,
        identity: &BotIdentity,
        relative: &str,
    ) -> Result<PathBuf, ManagerError> {
        let rel = Path::new(relative);
        if relative.trim().is_empty()
            || relative.contains("..")
            || relative.starts_with('/')
            || relative.starts_with('\\')
            || rel.is_absolute()
            || rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(reject(format_args!("relative path {relative:?}")));
        }

        let bot_dir = self.resolve_bot_dir(identity).await?;
        let resolved = canonicalize_lenient(&bot_dir.join(rel)).await?;

        if !resolved.starts_with(&bot_dir) || resolved == bot_dir {
            return Err(reject(format_args!("{} escapes {}", resolved.display(), bot_dir.display())));
        }
        Ok(resolved)
    }
}

/// Canonicalize the longest existing prefix of `path` and append the rest.
///
/// Symlinks in the existing part are resolved; the missing tail is appended
/// lexically (it cannot contain symlinks because it does not exist yet).
async fn canonicalize_lenient(path: &Path) -> Result<PathBuf, ManagerError> {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();

    loop {
        match fs::canonicalize(&existing).await {
            Ok(canonical) => {
                let mut resolved = canonical;
                for part in tail.iter().rev() {
                    resolved.push(part);
                }
                return Ok(resolved);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let name = existing
                    .file_name()
                    .map(|n| n.to_os_string())
                    .ok_or_else(|| reject(format_args!("{} has no existing ancestor", path.display())))?;
                tail.push(name);
                if !existing.pop() {
                    return Err(reject(format_args!("{} has no existing ancestor", path.display())));
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}
