//! Session state and the status reducer.
//!
//! `SessionState` only ever changes through [`reduce`], which the session core
//! calls from its inbound-message handler.  Everything else reads snapshots.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::protocol::{Message, Playlist, StatusCheckResponse, Track};

/// Local view of the remote session.
///
/// Invariant: `authenticated == false` implies `playlists` and
/// `current_queue` are empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub authenticated: bool,
    /// Password the user must hand to the bot out of band.  `None` once verified.
    pub pending_password: Option<String>,
    pub playlists: Vec<Playlist>,
    /// Empty track when nothing is playing.
    pub playing: Track,
    pub current_queue: Vec<Track>,
}

impl SessionState {
    pub fn is_playing(&self) -> bool {
        !self.playing.is_empty()
    }

    pub fn playlist_by_url(&self, url: &str) -> Option<&Playlist> {
        self.playlists.iter().find(|p| p.url == url)
    }
}

/// Next state after `message`.  Only `StatusCheckResponse` has an effect;
/// every other message returns `state` untouched.
pub fn reduce(state: SessionState, message: &Message) -> SessionState {
    match message {
        Message::StatusCheckResponse(resp) => apply_status(state, resp),
        Message::Unknown => {
            debug!("reducer: ignoring unknown message");
            state
        }
        other => {
            debug!("reducer: ignoring {}", other.kind());
            state
        }
    }
}

fn apply_status(state: SessionState, resp: &StatusCheckResponse) -> SessionState {
    if resp.is_verified() {
        // Full replacement, never a merge.
        return SessionState {
            authenticated: true,
            pending_password: None,
            playlists: resp.playlists.clone().unwrap_or_default(),
            playing: resp.playing.clone().unwrap_or_default(),
            current_queue: resp.current_queue.clone().unwrap_or_default(),
        };
    }

    let pending_password = Some(resp.password.clone().unwrap_or_default());
    if state.authenticated {
        // Revoked server-side: drop the catalog so the invariant holds.
        return SessionState {
            pending_password,
            ..SessionState::default()
        };
    }

    SessionState {
        pending_password,
        ..state
    }
}

/// Where the session is in its connection/authentication lifecycle.
///
/// ```text
///  Connecting -> AwaitingFirstStatus -> Unauthenticated <-> Authenticated
///       ^                                    |                  |
///       +------ Disconnected <---------------+------------------+
///                    |
///                    +-> Closed (attempts exhausted or shutdown)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Connecting,
    AwaitingFirstStatus,
    Unauthenticated,
    Authenticated,
    /// Connection lost; another attempt is scheduled.
    Disconnected { attempt: u32, retry_in: Duration },
    /// Terminal.
    Closed,
}

impl SessionPhase {
    /// Phase after the channel opened.
    pub fn on_open(&self) -> Self {
        match self {
            SessionPhase::Closed => SessionPhase::Closed,
            _ => SessionPhase::AwaitingFirstStatus,
        }
    }

    /// Phase after a state update produced by the reducer.
    pub fn on_state(&self, state: &SessionState) -> Self {
        match self {
            SessionPhase::AwaitingFirstStatus
            | SessionPhase::Unauthenticated
            | SessionPhase::Authenticated => {
                if state.authenticated {
                    SessionPhase::Authenticated
                } else {
                    SessionPhase::Unauthenticated
                }
            }
            other => other.clone(),
        }
    }

    /// Phase after the channel closed or errored.  `retry` carries the next
    /// attempt number and its delay, or `None` when we give up.
    pub fn on_lost(&self, retry: Option<(u32, Duration)>) -> Self {
        match (self, retry) {
            (SessionPhase::Closed, _) => SessionPhase::Closed,
            (_, Some((attempt, retry_in))) => SessionPhase::Disconnected { attempt, retry_in },
            (_, None) => SessionPhase::Closed,
        }
    }

    /// Phase when a scheduled reconnect starts.
    pub fn on_reconnect(&self) -> Self {
        match self {
            SessionPhase::Disconnected { .. } => SessionPhase::Connecting,
            other => other.clone(),
        }
    }

    /// True while a channel is open.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            SessionPhase::AwaitingFirstStatus
                | SessionPhase::Unauthenticated
                | SessionPhase::Authenticated
        )
    }

    /// Short label for status lines.
    pub fn label(&self) -> &'static str {
        match self {
            SessionPhase::Connecting => "connecting",
            SessionPhase::AwaitingFirstStatus => "waiting for status",
            SessionPhase::Unauthenticated => "unverified",
            SessionPhase::Authenticated => "verified",
            SessionPhase::Disconnected { .. } => "disconnected",
            SessionPhase::Closed => "closed",
        }
    }
}
