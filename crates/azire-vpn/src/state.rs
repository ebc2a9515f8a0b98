//! Session flags and the control-enablement table derived from them.
//!
//! The flags are independent facts, so they live in a small bit set rather
//! than a single enum. Every transition goes through one of the helpers
//! below; nothing else in the crate manipulates bits directly.

use std::fmt;

/// Set of session facts
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SessionFlags(u8);

impl SessionFlags {
    /// A token is held
    pub const LOGGED_IN: Self = Self(0x01);
    /// A login or logout is in flight
    pub const LOGGING_IN: Self = Self(0x02);
    /// A connect or disconnect is in flight
    pub const CONNECTING: Self = Self(0x04);
    /// The tunnel service was told to bring the tunnel up and succeeded
    pub const CONNECTED: Self = Self(0x08);
    /// The server list has been fetched
    pub const SERVERS_LOADED: Self = Self(0x10);

    const NAMES: [(Self, &'static str); 5] = [
        (Self::LOGGED_IN, "LoggedIn"),
        (Self::LOGGING_IN, "LoggingIn"),
        (Self::CONNECTING, "Connecting"),
        (Self::CONNECTED, "Connected"),
        (Self::SERVERS_LOADED, "ServersLoaded"),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub fn is_logged_in(self) -> bool {
        self.contains(Self::LOGGED_IN)
    }

    pub fn is_logging_in(self) -> bool {
        self.contains(Self::LOGGING_IN)
    }

    pub fn is_connecting(self) -> bool {
        self.contains(Self::CONNECTING)
    }

    pub fn is_connected(self) -> bool {
        self.contains(Self::CONNECTED)
    }

    pub fn servers_loaded(self) -> bool {
        self.contains(Self::SERVERS_LOADED)
    }

    /// Mark a login/logout in flight. Logging out drops `LoggedIn` up front.
    pub fn begin_login(&mut self) {
        self.remove(Self::LOGGED_IN);
        self.insert(Self::LOGGING_IN);
    }

    /// Finish a login/logout, ending logged in or not
    pub fn finish_login(&mut self, logged_in: bool) {
        self.remove(Self::LOGGING_IN);
        if logged_in {
            self.insert(Self::LOGGED_IN);
        } else {
            self.remove(Self::LOGGED_IN);
        }
    }

    /// Mark a connect/disconnect in flight. Any recorded connection is dropped.
    pub fn begin_connecting(&mut self) {
        self.remove(Self::CONNECTED);
        self.insert(Self::CONNECTING);
    }

    /// Record a successful bring-up
    pub fn mark_connected(&mut self) {
        self.insert(Self::CONNECTED);
    }

    /// Leave the in-flight connect/disconnect state
    pub fn finish_connecting(&mut self) {
        self.remove(Self::CONNECTING);
    }

    /// True when no transient marker is set
    pub fn is_at_rest(self) -> bool {
        !self.is_logging_in() && !self.is_connecting()
    }
}

impl fmt::Debug for SessionFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "SessionFlags({})", names.join(" | "))
    }
}

/// A user command, for refusal messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    LoginOrLogout,
    ToggleConnect,
    SelectServer,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoginOrLogout => write!(f, "Login/logout"),
            Self::ToggleConnect => write!(f, "Connect/disconnect"),
            Self::SelectServer => write!(f, "Server selection"),
        }
    }
}

/// Which controls accept input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls {
    pub login: bool,
    pub credentials: bool,
    pub server_selector: bool,
    pub connect: bool,
}

impl Controls {
    /// Whether `command` may start now
    pub fn allows(&self, command: Command) -> bool {
        match command {
            Command::LoginOrLogout => self.login,
            Command::ToggleConnect => self.connect,
            Command::SelectServer => self.server_selector,
        }
    }
}

impl From<SessionFlags> for Controls {
    fn from(flags: SessionFlags) -> Self {
        let busy = flags.is_connecting();
        Self {
            login: !flags.is_logging_in() && !busy && !flags.is_connected(),
            credentials: !flags.is_logged_in()
                && !flags.is_logging_in()
                && !busy
                && !flags.is_connected(),
            server_selector: flags.servers_loaded() && !busy,
            connect: flags.servers_loaded() && flags.is_logged_in() && !busy,
        }
    }
}

/// Everything the presentation layer shows about the session state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub flags: SessionFlags,
    pub controls: Controls,
    pub login_label: &'static str,
    pub connect_label: &'static str,
}

impl From<SessionFlags> for SessionView {
    fn from(flags: SessionFlags) -> Self {
        Self {
            flags,
            controls: Controls::from(flags),
            login_label: if flags.is_logged_in() { "Logout" } else { "Login" },
            connect_label: if flags.is_connected() { "Disconnect" } else { "Connect" },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(list: &[SessionFlags]) -> SessionFlags {
        let mut f = SessionFlags::empty();
        for flag in list {
            f.insert(*flag);
        }
        f
    }

    #[test]
    fn test_initial_controls() {
        let controls = Controls::from(SessionFlags::empty());
        assert!(controls.login);
        assert!(controls.credentials);
        assert!(!controls.server_selector);
        assert!(!controls.connect);
    }

    #[test]
    fn test_connect_needs_login_and_servers() {
        let f = flags(&[SessionFlags::SERVERS_LOADED]);
        assert!(!Controls::from(f).connect);
        assert!(Controls::from(f).server_selector);

        let f = flags(&[SessionFlags::SERVERS_LOADED, SessionFlags::LOGGED_IN]);
        let controls = Controls::from(f);
        assert!(controls.connect);
        assert!(controls.login);
        assert!(!controls.credentials);
    }

    #[test]
    fn test_connecting_locks_everything() {
        let f = flags(&[SessionFlags::SERVERS_LOADED, SessionFlags::LOGGED_IN, SessionFlags::CONNECTING]);
        let controls = Controls::from(f);
        assert!(!controls.login);
        assert!(!controls.credentials);
        assert!(!controls.server_selector);
        assert!(!controls.connect);
    }

    #[test]
    fn test_connected_blocks_logout_but_allows_disconnect() {
        let f = flags(&[SessionFlags::SERVERS_LOADED, SessionFlags::LOGGED_IN, SessionFlags::CONNECTED]);
        let controls = Controls::from(f);
        assert!(!controls.login);
        assert!(controls.connect);
        assert!(controls.server_selector);
        assert_eq!(SessionView::from(f).connect_label, "Disconnect");
        assert_eq!(SessionView::from(f).login_label, "Logout");
    }

    #[test]
    fn test_login_transitions_never_overlap() {
        let mut f = SessionFlags::empty();
        f.begin_login();
        assert!(f.is_logging_in() && !f.is_logged_in());
        f.finish_login(true);
        assert!(f.is_logged_in() && !f.is_logging_in());

        f.begin_login();
        assert!(!f.is_logged_in());
        f.finish_login(false);
        assert_eq!(f, SessionFlags::empty());
    }

    #[test]
    fn test_connect_transitions() {
        let mut f = flags(&[SessionFlags::CONNECTED]);
        f.begin_connecting();
        assert!(f.is_connecting() && !f.is_connected());
        f.mark_connected();
        f.finish_connecting();
        assert!(f.is_connected() && f.is_at_rest());
    }

    #[test]
    fn test_debug_names() {
        let f = flags(&[SessionFlags::LOGGED_IN, SessionFlags::SERVERS_LOADED]);
        assert_eq!(format!("{:?}", f), "SessionFlags(LoggedIn | ServersLoaded)");
    }
}
