//! Presentation-thread side of the client.
//!
//! Background tasks and the session never touch presentation state. They
//! post [`UiEvent`]s over a channel; the presentation thread drains it and
//! folds each event into a [`Presentation`].

use crate::state::{SessionFlags, SessionView};
use crate::transfer::TransferTotals;
use crossbeam_channel::Receiver;

/// Window title without transfer counters
pub const DEFAULT_TITLE: &str = "AzireVPN";

/// Placeholder shown in the server selector while the list loads
pub const LOADING_PLACEHOLDER: &str = "Loading...";

/// Messages posted to the presentation thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    /// One new line from the ring log
    LogLine(String),
    /// Latest transfer totals; zero after a disconnect
    Transfer(TransferTotals),
    /// Flags changed; controls and labels follow from them
    State(SessionView),
    /// Replace the server selector entries
    Servers { entries: Vec<String>, selected: Option<usize> },
    /// Move the selector to an existing entry
    ServerSelected(usize),
    /// Set the username field
    Username(String),
    /// Clear the password field
    ClearPassword,
}

/// Username/password input state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialFields {
    pub username: String,
    pub password: String,
}

/// Headless model of the client window
#[derive(Debug, Clone)]
pub struct Presentation {
    title_base: String,
    pub title: String,
    pub log: Vec<String>,
    pub view: SessionView,
    pub servers: Vec<String>,
    pub selected: Option<usize>,
    pub fields: CredentialFields,
    pub transfer: TransferTotals,
}

impl Presentation {
    pub fn new(title_base: &str) -> Self {
        Self {
            title_base: title_base.to_string(),
            title: title_base.to_string(),
            log: Vec::new(),
            view: SessionView::from(SessionFlags::empty()),
            servers: Vec::new(),
            selected: None,
            fields: CredentialFields::default(),
            transfer: TransferTotals::default(),
        }
    }

    /// Fold one event into the model
    pub fn apply(&mut self, event: UiEvent) {
        match event {
            UiEvent::LogLine(line) => self.log.push(line),
            UiEvent::Transfer(totals) => {
                self.transfer = totals;
                self.title = transfer_title(&self.title_base, totals);
            }
            UiEvent::State(view) => self.view = view,
            UiEvent::Servers { entries, selected } => {
                self.servers = entries;
                self.selected = selected;
            }
            UiEvent::ServerSelected(index) => self.selected = Some(index),
            UiEvent::Username(name) => self.fields.username = name,
            UiEvent::ClearPassword => self.fields.password.clear(),
        }
    }

    /// Apply everything queued without blocking; returns how many events ran
    pub fn drain(&mut self, rx: &Receiver<UiEvent>) -> usize {
        let mut n = 0;
        while let Ok(event) = rx.try_recv() {
            self.apply(event);
            n += 1;
        }
        n
    }

    /// Name of the currently selected server, if any
    pub fn selected_server(&self) -> Option<&str> {
        self.selected
            .and_then(|i| self.servers.get(i))
            .map(String::as_str)
    }
}

impl Default for Presentation {
    fn default() -> Self {
        Self::new(DEFAULT_TITLE)
    }
}

/// `"<base> - rx: <n>, tx: <n>"`, or just `base` when nothing moved
pub fn transfer_title(base: &str, totals: TransferTotals) -> String {
    if totals.is_zero() {
        base.to_string()
    } else {
        format!("{} - rx: {}, tx: {}", base, format_bytes(totals.rx), format_bytes(totals.tx))
    }
}

/// Human-readable byte count in binary units with up to two decimals
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    let mut value = bytes as f64;
    let mut unit = UNITS[0];
    for u in UNITS {
        unit = u;
        if value < 1024.0 {
            break;
        }
        if u != UNITS[UNITS.len() - 1] {
            value /= 1024.0;
        }
    }

    let formatted = format!("{:.2}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, unit)
}
