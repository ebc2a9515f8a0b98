//! AzireVPN client core
//!
//! Session state, credential persistence, tunnel configuration and the two
//! background pollers that feed the presentation thread.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Presentation thread                     │
//! │   commands ──▶ Session ◀── flags/controls ── UiEvent queue ◀─┐ │
//! └────────────────│─────────────────────────────────────────────│─┘
//!                  │                                             │
//!     ┌────────────┼──────────────┬──────────────┐               │
//!     ▼            ▼              ▼              ▼               │
//! ┌────────┐ ┌───────────┐ ┌────────────┐ ┌────────────┐         │
//! │ VpnApi │ │Credential │ │  Tunnel    │ │ Ring log   │         │
//! │ (HTTP) │ │  Store    │ │  Service   │ │            │         │
//! └────────┘ └───────────┘ └─────┬──────┘ └─────┬──────┘         │
//!                                │ get=1        │ follow         │
//!                         ┌──────▼──────┐ ┌─────▼──────┐         │
//!                         │  Transfer   │ │    Log     │─────────┘
//!                         │   Poller    │ │   Tailer   │
//!                         └─────────────┘ └────────────┘
//! ```

mod config;
mod keys;
mod ringlog;
mod runner;
mod service;
mod session;
mod settings;
mod state;
mod store;
mod tailer;
mod transfer;
mod ui;

pub use config::{ALLOWED_IPS, TunnelConfig};
pub use keys::{KeyError, KeyPair, PrivateKey, PublicKey};
pub use ringlog::{LogCursor, LogSource, MAX_LINES, RingLogError, RingLogger};
pub use runner::{BackgroundTasks, RunFlag};
pub use service::{
    QueryStream, ServiceError, TunnelService, WgQuickService, WireGuardWindowsService,
    platform_service, tunnel_name,
};
pub use session::{Session, SessionError};
pub use settings::{
    APP_DIR_NAME, CONFIG_FILE_NAME, KEYPAIR_FILE_NAME, LOG_FILE_NAME, Settings, SettingsError,
    TOKEN_FILE_NAME,
};
pub use state::{Command, Controls, SessionFlags, SessionView};
pub use store::{Credential, CredentialStore, StoreError};
pub use tailer::LogTailer;
pub use transfer::{GET_REQUEST, TransferPoller, TransferTotals, query_transfer};
pub use ui::{
    CredentialFields, DEFAULT_TITLE, LOADING_PLACEHOLDER, Presentation, UiEvent, format_bytes,
    transfer_title,
};
