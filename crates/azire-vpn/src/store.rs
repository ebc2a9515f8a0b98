//! Credential Store
//!
//! Two small line-oriented records in the user directory:
//! - `token.txt`: username, then API token
//! - `keypair.txt`: public key, then private key
//!
//! Loading is soft: a missing or malformed file reads as "nothing stored".
//! Saving writes a sibling temp file and renames it into place, so readers
//! never see a half-written record.

use crate::keys::KeyPair;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Storage errors (only `save`/`clear` can fail)
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A logged-in identity
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub token: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("token", &"[redacted]")
            .finish()
    }
}

/// File-backed credential and keypair persistence
#[derive(Debug, Clone)]
pub struct CredentialStore {
    token_file: PathBuf,
    keypair_file: PathBuf,
}

impl CredentialStore {
    /// Create a store over explicit file paths
    pub fn new(token_file: impl Into<PathBuf>, keypair_file: impl Into<PathBuf>) -> Self {
        Self {
            token_file: token_file.into(),
            keypair_file: keypair_file.into(),
        }
    }

    /// Load the stored credential, if any
    pub async fn load_credential(&self) -> Option<Credential> {
        let lines = read_lines(&self.token_file).await?;
        match <[String; 2]>::try_from(lines) {
            Ok([username, token]) if !token.is_empty() => Some(Credential { username, token }),
            _ => {
                debug!("Ignoring malformed {}", self.token_file.display());
                None
            }
        }
    }

    /// Persist a credential, replacing any previous one
    pub async fn save_credential(&self, credential: &Credential) -> Result<(), StoreError> {
        write_lines(&self.token_file, &[credential.username.as_str(), credential.token.as_str()]).await
    }

    /// Forget the stored credential. Absent is not an error.
    pub async fn clear_credential(&self) -> Result<(), StoreError> {
        match tokio::fs::remove_file(&self.token_file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Remove {
                path: self.token_file.clone(),
                source,
            }),
        }
    }

    /// Load the stored keypair, if both lines are present and valid
    pub async fn load_keypair(&self) -> Option<KeyPair> {
        let lines = read_lines(&self.keypair_file).await?;
        let [public, private] = <[String; 2]>::try_from(lines).ok()?;
        match KeyPair::from_base64(&public, &private) {
            Ok(keypair) => Some(keypair),
            Err(e) => {
                warn!("Ignoring stored keypair: {}", e);
                None
            }
        }
    }

    /// Persist a keypair
    pub async fn save_keypair(&self, keypair: &KeyPair) -> Result<(), StoreError> {
        let public = keypair.public.to_base64();
        let private = keypair.private.to_base64();
        write_lines(&self.keypair_file, &[public.as_str(), private.as_str()]).await
    }
}

// Returns at most the first two non-trailing lines; extra lines are ignored.
async fn read_lines(path: &Path) -> Option<Vec<String>> {
    let contents = tokio::fs::read_to_string(path).await.ok()?;
    Some(
        contents
            .lines()
            .take(2)
            .map(|l| l.trim_end_matches('\r').to_string())
            .collect(),
    )
}

async fn write_lines(path: &Path, lines: &[&str]) -> Result<(), StoreError> {
    let mut contents = lines.join("\n");
    contents.push('\n');

    let tmp = path.with_extension("tmp");
    let write_err = |source: io::Error| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    write_private_file(&tmp, &contents).await.map_err(write_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(write_err)
}

/// Write `contents` readable by the owner only; both records and the tunnel
/// config carry secrets
pub(crate) async fn write_private_file(path: &Path, contents: &str) -> io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    // `mode` only applies when the file is created
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600)).await?;
    }
    file.write_all(contents.as_bytes()).await?;
    file.flush().await
}
