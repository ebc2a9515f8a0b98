//! Tunnel Service
//!
//! The client never drives WireGuard itself. It hands a configuration file
//! to the platform's tunnel service, asks for it to be torn down again, and
//! queries live counters over the service's local control channel.
//!
//! - Unix: `wg-quick up|down <config>`, control socket
//!   `/var/run/wireguard/<interface>.sock`
//! - Windows: `wireguard.exe /installtunnelservice|/uninstalltunnelservice`,
//!   named pipe `\\.\pipe\ProtectedPrefix\Administrators\WireGuard\<name>`

use async_trait::async_trait;
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Tunnel service errors
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} failed: {message}")]
    Failed { program: String, message: String },

    #[error("Invalid tunnel config path: {0}")]
    InvalidPath(PathBuf),
}

/// Bidirectional byte stream to the service's control channel
pub trait QueryStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> QueryStream for T {}

/// The external tunnel service contract
#[async_trait]
pub trait TunnelService: Send + Sync {
    /// Bring up a tunnel from `config`
    async fn add(&self, config: &Path) -> Result<(), ServiceError>;

    /// Tear down the tunnel for `config`; safe when nothing is up.
    ///
    /// With `best_effort`, failures are logged and swallowed.
    async fn remove(&self, config: &Path, best_effort: bool) -> Result<(), ServiceError>;

    /// Connect to the control channel of the tunnel for `config`
    async fn open_query(&self, config: &Path) -> io::Result<Box<dyn QueryStream>>;
}

/// Tunnel name as the service derives it: the config file stem
pub fn tunnel_name(config: &Path) -> Result<&str, ServiceError> {
    config
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ServiceError::InvalidPath(config.to_path_buf()))
}

async fn run(program: &str, args: &[&OsStr]) -> Result<(), ServiceError> {
    debug!("Running {} {:?}", program, args);
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|source| ServiceError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(ServiceError::Failed {
            program: program.to_string(),
            message: if stderr.is_empty() { output.status.to_string() } else { stderr },
        })
    }
}

fn swallow(result: Result<(), ServiceError>, best_effort: bool) -> Result<(), ServiceError> {
    match result {
        Err(e) if best_effort => {
            warn!("Ignoring tunnel removal failure: {}", e);
            Ok(())
        }
        other => other,
    }
}

/// `wg-quick` based service for Linux and macOS
#[derive(Debug, Clone)]
pub struct WgQuickService {
    program: String,
    socket_dir: PathBuf,
}

impl WgQuickService {
    /// Use `program` (normally `wg-quick`) and the standard socket directory
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            socket_dir: PathBuf::from("/var/run/wireguard"),
        }
    }

    /// Control socket path for the tunnel named after `config`
    pub fn socket_path(&self, config: &Path) -> Result<PathBuf, ServiceError> {
        Ok(self.socket_dir.join(format!("{}.sock", tunnel_name(config)?)))
    }
}

impl Default for WgQuickService {
    fn default() -> Self {
        Self::new("wg-quick")
    }
}

#[async_trait]
impl TunnelService for WgQuickService {
    async fn add(&self, config: &Path) -> Result<(), ServiceError> {
        info!("Bringing up tunnel {}", tunnel_name(config)?);
        run(&self.program, &[OsStr::new("up"), config.as_os_str()]).await
    }

    async fn remove(&self, config: &Path, best_effort: bool) -> Result<(), ServiceError> {
        info!("Tearing down tunnel {}", tunnel_name(config)?);
        swallow(run(&self.program, &[OsStr::new("down"), config.as_os_str()]).await, best_effort)
    }

    #[cfg(unix)]
    async fn open_query(&self, config: &Path) -> io::Result<Box<dyn QueryStream>> {
        let path = self
            .socket_path(config)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let stream = tokio::net::UnixStream::connect(path).await?;
        Ok(Box::new(stream))
    }

    #[cfg(not(unix))]
    async fn open_query(&self, _config: &Path) -> io::Result<Box<dyn QueryStream>> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "wg-quick control sockets need Unix"))
    }
}

/// WireGuard for Windows tunnel service manager
#[derive(Debug, Clone)]
pub struct WireGuardWindowsService {
    program: String,
}

impl WireGuardWindowsService {
    /// Use `program` (normally `wireguard.exe`)
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    /// Named pipe of the tunnel service for `config`
    pub fn pipe_name(config: &Path) -> Result<String, ServiceError> {
        Ok(format!(
            r"\\.\pipe\ProtectedPrefix\Administrators\WireGuard\{}",
            tunnel_name(config)?
        ))
    }
}

impl Default for WireGuardWindowsService {
    fn default() -> Self {
        Self::new("wireguard.exe")
    }
}

#[async_trait]
impl TunnelService for WireGuardWindowsService {
    async fn add(&self, config: &Path) -> Result<(), ServiceError> {
        info!("Installing tunnel service {}", tunnel_name(config)?);
        run(&self.program, &[OsStr::new("/installtunnelservice"), config.as_os_str()]).await
    }

    async fn remove(&self, config: &Path, best_effort: bool) -> Result<(), ServiceError> {
        let name = tunnel_name(config)?;
        info!("Uninstalling tunnel service {}", name);
        swallow(
            run(&self.program, &[OsStr::new("/uninstalltunnelservice"), OsStr::new(name)]).await,
            best_effort,
        )
    }

    #[cfg(windows)]
    async fn open_query(&self, config: &Path) -> io::Result<Box<dyn QueryStream>> {
        use tokio::net::windows::named_pipe::ClientOptions;

        let name = Self::pipe_name(config)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let pipe = ClientOptions::new().open(name)?;
        Ok(Box::new(pipe))
    }

    #[cfg(not(windows))]
    async fn open_query(&self, _config: &Path) -> io::Result<Box<dyn QueryStream>> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "named pipes need Windows"))
    }
}

/// The service appropriate for the running platform
pub fn platform_service(program: Option<&str>) -> Arc<dyn TunnelService> {
    if cfg!(windows) {
        Arc::new(program.map(WireGuardWindowsService::new).unwrap_or_default())
    } else {
        Arc::new(program.map(WgQuickService::new).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tunnel_name_from_config() {
        assert_eq!(tunnel_name(Path::new("/home/u/AzireVPN/AzireVPN.conf")).unwrap(), "AzireVPN");
        assert!(tunnel_name(Path::new("/")).is_err());
    }

    #[test]
    fn test_socket_path() {
        let service = WgQuickService::default();
        let path = service.socket_path(Path::new("/tmp/AzireVPN.conf")).unwrap();
        assert_eq!(path, PathBuf::from("/var/run/wireguard/AzireVPN.sock"));
    }

    #[test]
    fn test_pipe_name() {
        let name = WireGuardWindowsService::pipe_name(Path::new("AzireVPN.conf")).unwrap();
        assert_eq!(name, r"\\.\pipe\ProtectedPrefix\Administrators\WireGuard\AzireVPN");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_best_effort_remove_swallows_failure() {
        let service = WgQuickService::new("false");
        let config = Path::new("/tmp/AzireVPN.conf");

        assert!(service.remove(config, true).await.is_ok());
        assert!(matches!(service.remove(config, false).await, Err(ServiceError::Failed { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_uninstall_failure_follows_best_effort() {
        let service = WireGuardWindowsService::new("false");
        let config = Path::new("AzireVPN.conf");

        assert!(service.remove(config, true).await.is_ok());
        assert!(matches!(service.remove(config, false).await, Err(ServiceError::Failed { .. })));
    }

    #[tokio::test]
    async fn test_missing_program_reports_spawn_error() {
        let service = WgQuickService::new("definitely-not-a-real-wg-quick");
        let result = service.add(Path::new("/tmp/AzireVPN.conf")).await;
        assert!(matches!(result, Err(ServiceError::Spawn { .. })));
    }
}
