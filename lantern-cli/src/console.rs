//! Terminal presentation: parse typed lines into intents, print state changes and new entries.

use std::path::Path;

use lantern_core::{ChatEntry, ConnectionManager, ConnectionState, Event, Origin, Snapshot};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug)]
pub enum Command {
    Core(Event),
    /// `/send <path>`; resolved with [`load_file`].
    SendFile(String),
    History,
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  /connect <peer-id>   open a session to a peer
  /disconnect          close the session and forget the peer
  /send <path>         send a file
  /typing              tell the peer you are typing
  /clear               clear local history
  /dark on|off         dark mode preference
  /away, /back         mark the window hidden or visible (alerts)
  /offline, /online    report network loss or return
  /history, /status    show history or connection state
  /quit
anything else is sent as a message";

/// Parse one typed line. Returns `None` for empty input and for unknown commands.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(Command::Core(Event::SendText(line.to_string())));
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let command = match (name, arg) {
        ("connect", peer) if !peer.is_empty() => Command::Core(Event::Connect(peer.to_string())),
        ("disconnect", _) => Command::Core(Event::Disconnect),
        ("send", path) if !path.is_empty() => Command::SendFile(path.to_string()),
        ("typing", _) => Command::Core(Event::Typing(true)),
        ("clear", _) => Command::Core(Event::ClearHistory),
        ("dark", "on") => Command::Core(Event::SetDarkMode(true)),
        ("dark", "off") => Command::Core(Event::SetDarkMode(false)),
        ("away", _) => Command::Core(Event::SetVisible(false)),
        ("back", _) => Command::Core(Event::SetVisible(true)),
        ("offline", _) => Command::Core(Event::NetworkOffline),
        ("online", _) => Command::Core(Event::NetworkOnline),
        ("history", _) => Command::History,
        ("status", _) => Command::Status,
        ("help", _) => Command::Help,
        ("quit", _) | ("exit", _) => Command::Quit,
        _ => return None,
    };
    Some(command)
}

/// MIME type from the file extension; unknown types are sent as raw bytes.
pub fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("txt") | Some("md") => "text/plain",
        Some("html") | Some("htm") => "text/html",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("mp3") => "audio/mpeg",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

/// Read stdin until EOF or `/quit`, forwarding parsed commands.
pub async fn read_commands(tx: mpsc::UnboundedSender<Command>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "stdin closed");
                break;
            }
        };
        match parse_command(&line) {
            Some(Command::Quit) => break,
            Some(command) => {
                if tx.send(command).is_err() {
                    return;
                }
            }
            None if line.starts_with('/') => println!("! unknown command; /help lists them"),
            None => {}
        }
    }
    let _ = tx.send(Command::Quit);
}

/// Read a file for sending; name and MIME type come from the path.
pub async fn load_file(path: &str) -> std::io::Result<Event> {
    let path = Path::new(path);
    let bytes = tokio::fs::read(path).await?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    Ok(Event::SendFile {
        bytes,
        name,
        mime_type: mime_for(path).to_string(),
    })
}

/// System alert text. The host writes it to stderr, apart from the chat transcript.
pub fn alert_line(title: &str, body: &str) -> String {
    format!("[{title}] {body}")
}

/// Prints what changed since the previous render.
pub struct Renderer {
    last: Snapshot,
    shown: usize,
}

impl Renderer {
    pub fn new(core: &ConnectionManager) -> Self {
        Self {
            last: core.snapshot(),
            shown: core.history().len(),
        }
    }

    pub fn render(&mut self, core: &ConnectionManager) {
        let snap = core.snapshot();
        for line in describe_changes(&self.last, &snap) {
            println!("{line}");
        }
        let history = core.history();
        if history.len() < self.shown {
            self.shown = 0;
        }
        for entry in &history[self.shown..] {
            println!("{}", format_entry(core, entry));
        }
        self.shown = history.len();
        self.last = snap;
    }

    pub fn print_history(&self, core: &ConnectionManager) {
        if core.history().is_empty() {
            println!("* no messages yet");
        }
        for entry in core.history() {
            println!("{}", format_entry(core, entry));
        }
    }

    pub fn print_status(&self, core: &ConnectionManager) {
        let snap = core.snapshot();
        println!(
            "* you: {}",
            snap.local_identity.as_deref().unwrap_or("(connecting…)")
        );
        println!("* state: {}", state_line(&snap));
        if snap.dark_mode {
            println!("* dark mode on");
        }
    }
}

fn state_line(snap: &Snapshot) -> String {
    let peer = snap.remote_identity.as_deref().unwrap_or("-");
    match snap.state {
        ConnectionState::Connecting => format!("connecting to {peer}"),
        ConnectionState::Connected => format!("connected to {peer}"),
        ConnectionState::Disconnected if snap.pending_retry => format!(
            "disconnected; reconnecting to {peer} (attempt {})",
            snap.reconnect_attempts + 1
        ),
        ConnectionState::Disconnected => "disconnected".to_string(),
    }
}

fn describe_changes(before: &Snapshot, after: &Snapshot) -> Vec<String> {
    let mut out = Vec::new();
    if before.local_identity != after.local_identity {
        if let Some(id) = &after.local_identity {
            out.push(format!("* your peer id: {id}"));
        }
    }
    if before.state != after.state || before.pending_retry != after.pending_retry {
        out.push(format!("* {}", state_line(after)));
    }
    if !before.peer_typing && after.peer_typing {
        out.push("* peer is typing…".to_string());
    }
    if before.last_fault != after.last_fault {
        if let Some(fault) = &after.last_fault {
            out.push(format!("! {fault}"));
        }
    }
    if before.history_len > 0 && after.history_len == 0 {
        out.push("* history cleared".to_string());
    }
    out
}

fn format_entry(core: &ConnectionManager, entry: &ChatEntry) -> String {
    let who = match entry.origin {
        Origin::Local => "you",
        Origin::Peer => "peer",
    };
    let at = entry.sent_at.with_timezone(&chrono::Local).format("%H:%M:%S");
    let mut line = format!("[{at}] {who}: {}", entry.body);
    if let Some(attachment) = &entry.attachment {
        let size = core
            .blob(&attachment.locator)
            .map(|b| format!("{} bytes", b.len()))
            .unwrap_or_else(|| "unavailable".to_string());
        line.push_str(&format!(" ({}, {size})", attachment.mime_type));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_message() {
        assert!(matches!(
            parse_command("hello there"),
            Some(Command::Core(Event::SendText(t))) if t == "hello there"
        ));
        assert!(parse_command("   ").is_none());
    }

    #[test]
    fn commands() {
        assert!(matches!(
            parse_command("/connect 127.0.0.1:4500"),
            Some(Command::Core(Event::Connect(p))) if p == "127.0.0.1:4500"
        ));
        assert!(parse_command("/connect").is_none());
        assert!(matches!(
            parse_command("/send ./notes.txt"),
            Some(Command::SendFile(p)) if p == "./notes.txt"
        ));
        assert!(matches!(
            parse_command("/dark on"),
            Some(Command::Core(Event::SetDarkMode(true)))
        ));
        assert!(matches!(parse_command("/quit"), Some(Command::Quit)));
        assert!(parse_command("/frobnicate").is_none());
    }

    #[test]
    fn mime_from_extension() {
        assert_eq!(mime_for(Path::new("a.TXT")), "text/plain");
        assert_eq!(mime_for(Path::new("photo.jpeg")), "image/jpeg");
        assert_eq!(mime_for(Path::new("blob")), "application/octet-stream");
    }

    #[test]
    fn alert_names_title() {
        assert_eq!(
            alert_line("LANtern Message", "hi"),
            "[LANtern Message] hi"
        );
    }

    #[test]
    fn describes_state_transitions() {
        let mut core = ConnectionManager::new();
        let before = core.snapshot();
        core.handle(Event::IdentityAssigned("127.0.0.1:4500".into()));
        core.handle(Event::Connect("127.0.0.1:4600".into()));
        let lines = describe_changes(&before, &core.snapshot());
        assert_eq!(
            lines,
            vec![
                "* your peer id: 127.0.0.1:4500".to_string(),
                "* connecting to 127.0.0.1:4600".to_string()
            ]
        );
    }
}
