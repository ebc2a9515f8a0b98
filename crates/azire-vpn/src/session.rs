//! Session Coordinator
//!
//! Owns the session flags and sequences every user command against them:
//! login/logout, connect/disconnect, server changes, and shutdown. It is
//! the only writer of flags and of control state shown to the user.
//!
//! # Usage
//!
//! ```rust,ignore
//! let session = Arc::new(Session::new(settings, api, service, log, ui_tx));
//! session.start_background();
//! session.load_token().await;
//! session.load_servers().await?;
//!
//! session.login_or_logout("user", "password").await?;
//! session.toggle_connect().await?;
//!
//! session.shutdown().await;
//! ```
//!
//! Commands take `&self` and may run concurrently. A command only starts if
//! its control is enabled, checked and applied under one lock, so two
//! commands of the same kind can never overlap.

use crate::config::TunnelConfig;
use crate::keys::KeyPair;
use crate::ringlog::RingLogger;
use crate::runner::BackgroundTasks;
use crate::service::{ServiceError, TunnelService};
use crate::settings::Settings;
use crate::state::{Command, Controls, SessionFlags, SessionView};
use crate::store::{Credential, CredentialStore, StoreError, write_private_file};
use crate::tailer::LogTailer;
use crate::transfer::{TransferPoller, TransferTotals};
use crate::ui::{LOADING_PLACEHOLDER, UiEvent};
use azire_network::{ApiError, Server, VpnApi};
use crossbeam_channel::Sender;
use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{info, warn};

/// Session errors. All of them are also written to the user-visible log.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{0} is not available right now")]
    Unavailable(Command),

    #[error("Shutting down")]
    ShuttingDown,

    #[error("No server selected")]
    NoServerSelected,

    #[error("No server at index {0}")]
    NoSuchServer(usize),

    #[error("No servers found")]
    NoServers,

    #[error("Not logged in")]
    NotLoggedIn,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("Failed to write tunnel config: {0}")]
    ConfigWrite(#[source] io::Error),
}

#[derive(Default)]
struct Inner {
    flags: SessionFlags,
    token: Option<String>,
    servers: Vec<Server>,
    selected: Option<usize>,
}

/// The session/state coordinator
pub struct Session {
    api: Arc<dyn VpnApi>,
    service: Arc<dyn TunnelService>,
    store: CredentialStore,
    log: Arc<RingLogger>,
    settings: Settings,
    config_path: PathBuf,
    ui_tx: Sender<UiEvent>,
    inner: Mutex<Inner>,
    background: Mutex<Option<BackgroundTasks>>,
    // Mirrors `inner.flags` so shutdown can wait for an in-flight connect
    flags_tx: watch::Sender<SessionFlags>,
    shutting_down: AtomicBool,
    torn_down: AtomicBool,
}

/// Clears an in-flight marker on every exit path, cancellation included
struct InFlight<'a> {
    session: &'a Session,
    finish: fn(&mut SessionFlags),
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let finish = self.finish;
        self.session.transition(|inner| finish(&mut inner.flags));
    }
}

impl Session {
    /// Create a session; file locations come from `settings`
    pub fn new(
        settings: Settings,
        api: Arc<dyn VpnApi>,
        service: Arc<dyn TunnelService>,
        log: Arc<RingLogger>,
        ui_tx: Sender<UiEvent>,
    ) -> Self {
        let store = CredentialStore::new(settings.token_file(), settings.keypair_file());
        let config_path = settings.config_file();

        Self {
            api,
            service,
            store,
            log,
            settings,
            config_path,
            ui_tx,
            inner: Mutex::new(Inner::default()),
            background: Mutex::new(None),
            flags_tx: watch::Sender::new(SessionFlags::empty()),
            shutting_down: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Current flags
    pub fn flags(&self) -> SessionFlags {
        self.lock().flags
    }

    /// Current controls and labels
    pub fn view(&self) -> SessionView {
        SessionView::from(self.flags())
    }

    /// Which commands may start now
    pub fn controls(&self) -> Controls {
        Controls::from(self.flags())
    }

    /// The fetched server list
    pub fn servers(&self) -> Vec<Server> {
        self.lock().servers.clone()
    }

    /// The server the next connect will use
    pub fn selected_server(&self) -> Option<Server> {
        let inner = self.lock();
        inner.selected.and_then(|i| inner.servers.get(i).cloned())
    }

    /// Where the tunnel configuration is written
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Start the log tailer and transfer poller. Must run inside a runtime.
    pub fn start_background(&self) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        let mut slot = self.background.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }

        let tailer = LogTailer::new(
            self.log.clone(),
            self.settings.log_poll_interval(),
            self.ui_tx.clone(),
        );
        let poller = TransferPoller::new(
            self.service.clone(),
            self.config_path.clone(),
            self.settings.transfer_poll_interval(),
            self.settings.connect_retry_interval(),
            self.ui_tx.clone(),
        );
        *slot = Some(BackgroundTasks::spawn(tailer, poller));
    }

    /// Restore a stored login without contacting the API
    pub async fn load_token(&self) -> bool {
        let Some(credential) = self.store.load_credential().await else {
            return false;
        };

        info!("Restored login for {}", credential.username);
        self.publish(UiEvent::Username(credential.username));
        self.transition(|inner| {
            inner.token = Some(credential.token);
            inner.flags.insert(SessionFlags::LOGGED_IN);
        });
        true
    }

    /// Fetch the server list; only the first successful fetch counts
    pub async fn load_servers(&self) -> Result<(), SessionError> {
        self.check_running()?;
        if self.flags().servers_loaded() {
            return Ok(());
        }

        self.note("Loading server list");
        self.publish(UiEvent::Servers {
            entries: vec![LOADING_PLACEHOLDER.to_string()],
            selected: Some(0),
        });

        let servers = match self.api.servers().await {
            Ok(servers) => servers,
            Err(e) => {
                self.note_failure("Server fetch error", &e);
                return Err(e.into());
            }
        };
        if servers.is_empty() {
            self.note("No servers found");
            return Err(SessionError::NoServers);
        }

        let entries = servers.iter().map(Server::to_string).collect();
        self.transition(|inner| {
            inner.servers = servers;
            inner.selected = Some(0);
            inner.flags.insert(SessionFlags::SERVERS_LOADED);
        });
        self.publish(UiEvent::Servers { entries, selected: Some(0) });
        Ok(())
    }

    /// Log out when logged in, otherwise log in with the given credentials
    pub async fn login_or_logout(&self, username: &str, password: &str) -> Result<(), SessionError> {
        let (was_logged_in, token) = self.begin(Command::LoginOrLogout, |inner| {
            let was_logged_in = inner.flags.is_logged_in();
            let token = if was_logged_in { inner.token.take() } else { None };
            inner.flags.begin_login();
            Ok((was_logged_in, token))
        })?;
        let _in_flight = InFlight {
            session: self,
            finish: |flags| {
                if flags.is_logging_in() {
                    flags.finish_login(false);
                }
            },
        };

        if was_logged_in {
            self.logout(token).await;
            Ok(())
        } else {
            self.login(username, password).await
        }
    }

    async fn logout(&self, token: Option<String>) {
        self.publish(UiEvent::Username(String::new()));
        self.note("Logging out");

        if let Err(e) = self.store.clear_credential().await {
            self.note_failure("Failed to log out", &e);
        }
        if let Some(token) = token {
            if let Err(e) = self.api.logout(&token).await {
                self.note_failure("Failed to log out", &e);
            }
        }

        self.transition(|inner| inner.flags.finish_login(false));
    }

    async fn login(&self, username: &str, password: &str) -> Result<(), SessionError> {
        self.note("Logging in to generate token");

        let result: Result<String, SessionError> = async {
            let token = self.api.login(username, password).await?;
            let credential = Credential {
                username: username.to_string(),
                token: token.clone(),
            };
            self.store.save_credential(&credential).await?;
            Ok(token)
        }
        .await;

        match result {
            Ok(token) => {
                self.publish(UiEvent::ClearPassword);
                self.transition(|inner| {
                    inner.token = Some(token);
                    inner.flags.finish_login(true);
                });
                Ok(())
            }
            Err(e) => {
                self.note_failure("Failed to log in", &e);
                self.transition(|inner| inner.flags.finish_login(false));
                Err(e)
            }
        }
    }

    /// Disconnect when connected, otherwise connect to the selected server
    pub async fn toggle_connect(&self) -> Result<(), SessionError> {
        let was_connected = self.begin(Command::ToggleConnect, |inner| {
            let was_connected = inner.flags.is_connected();
            inner.flags.begin_connecting();
            Ok(was_connected)
        })?;
        let _in_flight = InFlight { session: self, finish: SessionFlags::finish_connecting };

        if was_connected {
            self.tear_down().await;
            Ok(())
        } else {
            self.bring_up().await
        }
    }

    /// Select server `index`; while connected this reconnects to it
    pub async fn select_server(&self, index: usize) -> Result<(), SessionError> {
        let was_connected = self.begin(Command::SelectServer, |inner| {
            if index >= inner.servers.len() {
                return Err(SessionError::NoSuchServer(index));
            }
            inner.selected = Some(index);
            let was_connected = inner.flags.is_connected();
            if was_connected {
                inner.flags.begin_connecting();
            }
            Ok(was_connected)
        })?;
        self.publish(UiEvent::ServerSelected(index));

        if !was_connected {
            return Ok(());
        }

        let _in_flight = InFlight { session: self, finish: SessionFlags::finish_connecting };
        self.tear_down().await;
        self.bring_up().await
    }

    /// Stop background tasks and tear the tunnel down. Idempotent.
    ///
    /// The teardown is issued even if no connection is recorded, since a
    /// connect may be mid-flight or the service may hold a tunnel from an
    /// earlier run. An in-flight connect is given the shutdown timeout to
    /// settle first, so the teardown comes after its `add`.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down session");

        let timeout = self.settings.shutdown_timeout();
        let mut flags = self.flags_tx.subscribe();
        let settled = tokio::time::timeout(timeout, async {
            let _ = flags.wait_for(|f| !f.is_connecting()).await;
        })
        .await;
        if settled.is_err() {
            warn!("Connect still in flight after {:?}, tearing down anyway", timeout);
        }

        let background = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tasks) = background {
            tasks.stop(timeout).await;
        }

        self.torn_down.store(true, Ordering::SeqCst);
        if let Err(e) = self.service.remove(&self.config_path, true).await {
            warn!("Tunnel teardown on exit failed: {}", e);
        }
        self.transition(|inner| inner.flags.remove(SessionFlags::CONNECTED));
    }

    /// Has `shutdown` been called?
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    async fn tear_down(&self) {
        self.note("Disconnecting");
        if let Err(e) = self.service.remove(&self.config_path, true).await {
            self.note_failure("Failed to disconnect", &e);
        }
        self.publish(UiEvent::Transfer(TransferTotals::default()));
    }

    async fn bring_up(&self) -> Result<(), SessionError> {
        match self.connect_steps().await {
            Ok(server) => {
                self.note(&format!("Connected to {}", server));
                self.transition(|inner| inner.flags.mark_connected());
                Ok(())
            }
            Err(e) => {
                self.note_failure("Failed to connect", &e);
                Err(e)
            }
        }
    }

    async fn connect_steps(&self) -> Result<Server, SessionError> {
        let (server, token) = {
            let inner = self.lock();
            (
                inner.selected.and_then(|i| inner.servers.get(i).cloned()),
                inner.token.clone(),
            )
        };
        let server = server.ok_or(SessionError::NoServerSelected)?;
        let token = token.ok_or(SessionError::NotLoggedIn)?;

        let keypair = self.resolve_keypair().await?;
        let registration = self
            .api
            .register(&server, &token, &keypair.public.to_base64())
            .await?;

        let config = TunnelConfig::new(&keypair, &registration);
        write_private_file(&self.config_path, &config.render())
            .await
            .map_err(SessionError::ConfigWrite)?;

        self.check_running()?;
        self.service.add(&self.config_path).await?;

        if self.shutting_down.load(Ordering::SeqCst) {
            // Shutdown stopped waiting for us; undo our own bring-up
            if self.torn_down.load(Ordering::SeqCst) {
                if let Err(e) = self.service.remove(&self.config_path, true).await {
                    warn!("Tunnel teardown after late connect failed: {}", e);
                }
            }
            return Err(SessionError::ShuttingDown);
        }
        Ok(server)
    }

    async fn resolve_keypair(&self) -> Result<KeyPair, SessionError> {
        if let Some(keypair) = self.store.load_keypair().await {
            self.note("Loaded cached keypair from file");
            return Ok(keypair);
        }

        let keypair = KeyPair::generate();
        self.store.save_keypair(&keypair).await?;
        self.note("Generated new keypair");
        Ok(keypair)
    }

    fn check_running(&self) -> Result<(), SessionError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            Err(SessionError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    // Check the command's control and apply `f` under one lock
    fn begin<R>(
        &self,
        command: Command,
        f: impl FnOnce(&mut Inner) -> Result<R, SessionError>,
    ) -> Result<R, SessionError> {
        self.check_running()?;
        let (result, view) = {
            let mut inner = self.lock();
            if !Controls::from(inner.flags).allows(command) {
                return Err(SessionError::Unavailable(command));
            }
            let result = f(&mut inner)?;
            self.flags_tx.send_replace(inner.flags);
            (result, SessionView::from(inner.flags))
        };
        self.publish(UiEvent::State(view));
        Ok(result)
    }

    // Apply `f`; publish the new view if the flags moved
    fn transition(&self, f: impl FnOnce(&mut Inner)) {
        let changed = {
            let mut inner = self.lock();
            let before = inner.flags;
            f(&mut inner);
            self.flags_tx.send_replace(inner.flags);
            (inner.flags != before).then(|| SessionView::from(inner.flags))
        };
        if let Some(view) = changed {
            self.publish(UiEvent::State(view));
        }
    }

    fn publish(&self, event: UiEvent) {
        // A closed channel just means nobody is watching any more
        let _ = self.ui_tx.send(event);
    }

    fn note(&self, message: &str) {
        info!("{}", message);
        if let Err(e) = self.log.write(message) {
            warn!("Failed to write log: {}", e);
        }
    }

    fn note_failure(&self, context: &str, error: &dyn Display) {
        warn!("{}: {}", context, error);
        if let Err(e) = self.log.write(&format!("{}: {}", context, error)) {
            warn!("Failed to write log: {}", e);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
