//! Line-oriented stand-in for the rendering layer.
//!
//! Prints a text rendering of each new snapshot and turns stdin lines into
//! the two session hooks (plus `song`, which has no UI affordance elsewhere).

use std::fmt::Write as _;

use chrono::Local;
use jukebox_client::{SessionHandle, SessionSnapshot};
use jukebox_proto::state::SessionPhase;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Select(String),
    Skip,
    Song(String),
    Status,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        match (word, rest) {
            ("", _) => ConsoleCommand::Empty,
            ("select" | "play", url) if !url.is_empty() => ConsoleCommand::Select(url.to_string()),
            ("skip" | "next", "") => ConsoleCommand::Skip,
            ("song", name) if !name.is_empty() => ConsoleCommand::Song(name.to_string()),
            ("status", "") => ConsoleCommand::Status,
            ("help" | "?", "") => ConsoleCommand::Help,
            ("quit" | "exit" | "q", "") => ConsoleCommand::Quit,
            _ => ConsoleCommand::Unknown(line.to_string()),
        }
    }
}

const HELP: &str = "commands: select <playlist-url> | skip | song <name> | status | help | quit";

pub async fn run(handle: SessionHandle) -> anyhow::Result<()> {
    let mut snapshots = handle.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last_render = String::new();

    println!("{}", HELP);

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    debug!("console: session gone");
                    break;
                }
                let text = render(&snapshots.borrow_and_update());
                if text != last_render {
                    println!("{}", text);
                    last_render = text;
                }
            }

            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let result = match ConsoleCommand::parse(&line) {
                    ConsoleCommand::Select(url) => handle.select_playlist(&url),
                    ConsoleCommand::Skip => handle.skip(),
                    ConsoleCommand::Song(name) => handle.set_song(&name),
                    ConsoleCommand::Status => {
                        println!("{}", render_status(&handle.snapshot()));
                        Ok(())
                    }
                    ConsoleCommand::Help => {
                        println!("{}", HELP);
                        Ok(())
                    }
                    ConsoleCommand::Quit => break,
                    ConsoleCommand::Empty => Ok(()),
                    ConsoleCommand::Unknown(line) => {
                        println!("unknown command: {}  ({})", line, HELP);
                        Ok(())
                    }
                };
                if let Err(e) = result {
                    warn!("console: command failed: {}", e);
                    println!("! {}", e);
                }
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

/// Full-screen-ish rendering of a snapshot.  Excludes timestamps so that two
/// renders of the same session state compare equal.
pub fn render(snapshot: &SessionSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "── jukebox [{}] ──", snapshot.phase.label());

    match &snapshot.phase {
        SessionPhase::Disconnected { attempt, retry_in } => {
            let _ = writeln!(
                out,
                "Disconnected from server ({}), retry {} in {:.1}s",
                snapshot.last_error.as_deref().unwrap_or("unknown error"),
                attempt,
                retry_in.as_secs_f32()
            );
        }
        SessionPhase::Closed => {
            let _ = writeln!(
                out,
                "Session closed{}",
                snapshot
                    .last_error
                    .as_deref()
                    .map(|e| format!(": {}", e))
                    .unwrap_or_default()
            );
        }
        _ => {}
    }

    if !snapshot.state.authenticated {
        if let Some(password) = snapshot.state.pending_password.as_deref() {
            let _ = writeln!(out, "Your password is: {}", password);
        }
        return out;
    }

    for group in snapshot.view.groups() {
        let _ = writeln!(out, "{}", group.name);
        for playlist in &group.playlists {
            let _ = writeln!(out, "  {}  <{}>", playlist.title, playlist.url);
        }
    }

    if snapshot.state.is_playing() {
        let playing = &snapshot.state.playing;
        let _ = writeln!(out, "♫ Now Playing: {} - {}", playing.name, playing.artist);
    }
    if !snapshot.state.current_queue.is_empty() {
        let _ = writeln!(out, "Queue:");
        for track in &snapshot.state.current_queue {
            let _ = writeln!(out, "  {} - {}", track.name, track.artist);
        }
    }
    out
}

fn render_status(snapshot: &SessionSnapshot) -> String {
    let age = snapshot
        .last_status_at
        .map(|at| {
            let ms = (Local::now() - at).num_milliseconds().max(0);
            format!("{} ms ago", ms)
        })
        .unwrap_or_else(|| "never".to_string());
    let state = serde_json::to_string_pretty(&snapshot.state)
        .unwrap_or_else(|e| format!("<unserializable state: {}>", e));
    format!(
        "phase: {}\nconnected: {}\nlast status: {}\n{}",
        snapshot.phase.label(),
        snapshot.connected(),
        age,
        state
    )
}
