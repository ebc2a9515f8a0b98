//! Line-oriented stand-in for the client window.
//!
//! Commands are read from stdin on a plain thread and dispatched to the
//! session as tasks, so a slow connect never blocks the prompt (or `quit`).
//! UI events are drained on a short tick and echoed.

use anyhow::{Result, anyhow, bail};
use azire_vpn::{Presentation, Session, SessionError, UiEvent};
use crossbeam_channel::Receiver;
use std::future::Future;
use std::io::BufRead;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

const HELP: &str = "\
Commands:
  login <username> <password>
  logout
  connect
  disconnect
  server <n>      select server n (see `servers`)
  servers
  log             print the whole log
  status
  help
  quit";

/// One parsed shell line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Login { username: String, password: String },
    Logout,
    Connect,
    Disconnect,
    Server(usize),
    Servers,
    Log,
    Status,
    Help,
    Quit,
}

impl FromStr for ShellCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let name = words.next().ok_or_else(|| anyhow!("Empty command"))?;
        let args: Vec<&str> = words.collect();

        let command = match (name, args.as_slice()) {
            ("login", [username, password]) => ShellCommand::Login {
                username: username.to_string(),
                password: password.to_string(),
            },
            ("login", _) => bail!("Usage: login <username> <password>"),
            ("logout", []) => ShellCommand::Logout,
            ("connect", []) => ShellCommand::Connect,
            ("disconnect", []) => ShellCommand::Disconnect,
            ("server", [n]) => ShellCommand::Server(
                n.parse().map_err(|_| anyhow!("Not a server number: {}", n))?,
            ),
            ("server", _) => bail!("Usage: server <n>"),
            ("servers", []) => ShellCommand::Servers,
            ("log", []) => ShellCommand::Log,
            ("status", []) => ShellCommand::Status,
            ("help" | "?", []) => ShellCommand::Help,
            ("quit" | "exit", []) => ShellCommand::Quit,
            _ => bail!("Unknown command: {} (try `help`)", line.trim()),
        };
        Ok(command)
    }
}

/// Run until `quit` or end of input
pub async fn run(session: Arc<Session>, ui_rx: Receiver<UiEvent>) {
    let (line_tx, mut line_rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut ui = Presentation::default();
    let mut echo = Echo::new(&ui);
    let mut tick = tokio::time::interval(Duration::from_millis(250));
    println!("{}", HELP);

    loop {
        tokio::select! {
            line = line_rx.recv() => {
                let Some(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<ShellCommand>() {
                    Ok(command) => {
                        ui.drain(&ui_rx);
                        if !dispatch(&session, &ui, command) {
                            break;
                        }
                    }
                    Err(e) => println!("{}", e),
                }
            }
            _ = tick.tick() => {}
        }

        ui.drain(&ui_rx);
        echo.show(&ui);
    }
}

/// Start `command`; false means quit
fn dispatch(session: &Arc<Session>, ui: &Presentation, command: ShellCommand) -> bool {
    let flags = session.flags();
    match command {
        ShellCommand::Login { username, password } => {
            if flags.is_logged_in() {
                println!("Already logged in");
            } else {
                let session = session.clone();
                spawn_command(async move { session.login_or_logout(&username, &password).await });
            }
        }
        ShellCommand::Logout => {
            if flags.is_logged_in() {
                let session = session.clone();
                spawn_command(async move { session.login_or_logout("", "").await });
            } else {
                println!("Not logged in");
            }
        }
        ShellCommand::Connect => toggle_towards(session, true),
        ShellCommand::Disconnect => toggle_towards(session, false),
        ShellCommand::Server(index) => {
            let session = session.clone();
            spawn_command(async move { session.select_server(index).await });
        }
        ShellCommand::Servers => {
            for (i, entry) in ui.servers.iter().enumerate() {
                let mark = if ui.selected == Some(i) { '*' } else { ' ' };
                println!("{} {:>3}  {}", mark, i, entry);
            }
        }
        ShellCommand::Log => {
            for line in &ui.log {
                println!("{}", line);
            }
        }
        ShellCommand::Status => {
            println!("{}", ui.title);
            println!("{:?}", ui.view.flags);
            println!(
                "[{}] [{}] server: {}",
                ui.view.login_label,
                ui.view.connect_label,
                ui.selected_server().unwrap_or("-")
            );
        }
        ShellCommand::Help => println!("{}", HELP),
        ShellCommand::Quit => return false,
    }
    true
}

fn toggle_towards(session: &Arc<Session>, connected: bool) {
    if session.flags().is_connected() == connected {
        println!("Already {}", if connected { "connected" } else { "disconnected" });
        return;
    }
    let session = session.clone();
    spawn_command(async move { session.toggle_connect().await });
}

fn spawn_command<F>(future: F)
where
    F: Future<Output = Result<(), SessionError>> + Send + 'static,
{
    tokio::spawn(async move {
        match future.await {
            Ok(()) => {}
            // Refusals never reach the log
            Err(e @ (SessionError::Unavailable(_)
            | SessionError::NoSuchServer(_)
            | SessionError::ShuttingDown)) => println!("{}", e),
            Err(e) => debug!("Command failed: {}", e),
        }
    });
}

/// Prints what changed since the last look
struct Echo {
    shown: usize,
    title: String,
}

impl Echo {
    fn new(ui: &Presentation) -> Self {
        Self {
            shown: ui.log.len(),
            title: ui.title.clone(),
        }
    }

    fn show(&mut self, ui: &Presentation) {
        for line in &ui.log[self.shown..] {
            println!("{}", line);
        }
        self.shown = ui.log.len();

        if ui.title != self.title {
            println!("== {} ==", ui.title);
            self.title = ui.title.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            "login alice s3cret".parse::<ShellCommand>().unwrap(),
            ShellCommand::Login { username: "alice".into(), password: "s3cret".into() }
        );
        assert_eq!("  connect ".parse::<ShellCommand>().unwrap(), ShellCommand::Connect);
        assert_eq!("server 3".parse::<ShellCommand>().unwrap(), ShellCommand::Server(3));
        assert_eq!("exit".parse::<ShellCommand>().unwrap(), ShellCommand::Quit);
    }

    #[test]
    fn test_parse_errors() {
        assert!("login alice".parse::<ShellCommand>().is_err());
        assert!("server x".parse::<ShellCommand>().is_err());
        assert!("logout now".parse::<ShellCommand>().is_err());
        assert!("fly".parse::<ShellCommand>().is_err());
    }

    #[test]
    fn test_echo_prints_once() {
        let mut ui = Presentation::default();
        let mut echo = Echo::new(&ui);

        ui.apply(UiEvent::LogLine("a".into()));
        echo.show(&ui);
        assert_eq!(echo.shown, 1);
        echo.show(&ui);
        assert_eq!(echo.shown, 1);
    }
}
