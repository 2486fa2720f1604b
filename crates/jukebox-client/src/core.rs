/// SessionCore — single-owner event loop for one jukebox session.
///
/// Owns the connection channel, the poller, `SessionState` and the derived
/// `GroupedView`.  Channel lifecycle events arrive on one `mpsc` queue and are
/// handled one at a time, so the reducer is the only writer of session state.
///
/// After every change the core publishes a `SessionSnapshot` on a `watch`
/// channel; the rendering layer reads snapshots and calls back through
/// `SessionHandle` (select playlist, skip).
///
/// The poller lives strictly inside its channel: it starts on `Open` and its
/// token is a child of the channel's, so closing the channel (close, error or
/// teardown) stops it.  Lost connections are retried with bounded backoff and
/// the poller only restarts once a new channel reports `Open`.
use std::time::Duration;

use chrono::{DateTime, Local};
use jukebox_proto::config::Config;
use jukebox_proto::protocol::{Message, ProtocolRevision};
use jukebox_proto::session::{connection_url, SessionToken};
use jukebox_proto::state::{reduce, SessionPhase, SessionState};
use jukebox_proto::view::GroupedView;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::backoff::ReconnectPolicy;
use crate::connection::{ChannelEvent, ChannelSender, ConnectionChannel};
use crate::dispatcher::{CommandDispatcher, DispatchError};
use crate::poller::SessionPoller;

// ── SessionEvent ──────────────────────────────────────────────────────────────

/// All inputs into the SessionCore loop.
#[derive(Debug)]
pub enum SessionEvent {
    /// Lifecycle event from the channel with the given generation.
    Channel { generation: u64, event: ChannelEvent },
    /// Tear the session down.
    Shutdown,
}

// ── SessionSnapshot ───────────────────────────────────────────────────────────

/// Read-only copy of everything the rendering layer needs.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub state: SessionState,
    pub view: GroupedView,
    /// When the last `StatusCheckResponse` arrived.
    pub last_status_at: Option<DateTime<Local>>,
    /// Why the last connection was lost, cleared on the next open.
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    pub fn connected(&self) -> bool {
        self.phase.is_connected()
    }
}

// ── SessionHandle ─────────────────────────────────────────────────────────────

/// What the rendering layer holds: snapshots plus the command hooks.
/// The session tears itself down once every handle is dropped.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    snapshot: watch::Receiver<SessionSnapshot>,
    dispatcher: CommandDispatcher,
    event_tx: mpsc::Sender<SessionEvent>,
}

impl SessionHandle {
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn select_playlist(&self, url: &str) -> Result<(), DispatchError> {
        self.dispatcher.select_playlist(url)
    }

    pub fn skip(&self) -> Result<(), DispatchError> {
        self.dispatcher.skip()
    }

    pub fn set_song(&self, name: &str) -> Result<(), DispatchError> {
        self.dispatcher.set_song(name)
    }

    pub async fn shutdown(&self) {
        let _ = self.event_tx.send(SessionEvent::Shutdown).await;
    }
}

// ── SessionCore ───────────────────────────────────────────────────────────────

pub struct SessionCore {
    url: Url,
    poll_period: Duration,
    connect_timeout: Duration,
    policy: ReconnectPolicy,
    state: SessionState,
    view: GroupedView,
    phase: SessionPhase,
    last_status_at: Option<DateTime<Local>>,
    last_error: Option<String>,
    /// Bumped for every channel we open; events from older channels are ignored.
    generation: u64,
    channel: Option<ConnectionChannel>,
    poller: Option<SessionPoller>,
    /// Consecutive failed connections since the last successful open.
    attempt: u32,
    reconnect_at: Option<Instant>,
    link_tx: watch::Sender<Option<ChannelSender>>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    /// Kept so new channels can report back into the loop.
    event_tx: mpsc::Sender<SessionEvent>,
    /// Parent of every channel token.
    scope: CancellationToken,
    revision: ProtocolRevision,
}

impl SessionCore {
    pub fn new(
        config: &Config,
        token: &SessionToken,
        event_tx: mpsc::Sender<SessionEvent>,
    ) -> anyhow::Result<Self> {
        let url = connection_url(&config.server.host, config.server.secure, token)?;
        // The core keeps no receivers: `snapshot_tx.closed()` tells us when
        // the last handle is gone.
        let (link_tx, _) = watch::channel(None);
        let (snapshot_tx, _) = watch::channel(SessionSnapshot::default());

        Ok(Self {
            url,
            poll_period: config.polling.interval(),
            connect_timeout: config.server.connect_timeout(),
            policy: ReconnectPolicy::from_config(&config.reconnect),
            state: SessionState::default(),
            view: GroupedView::default(),
            phase: SessionPhase::Connecting,
            last_status_at: None,
            last_error: None,
            generation: 0,
            channel: None,
            poller: None,
            attempt: 0,
            reconnect_at: None,
            link_tx,
            snapshot_tx,
            event_tx,
            scope: CancellationToken::new(),
            revision: config.protocol.revision,
        })
    }

    /// Build a core and run it on its own task.
    pub fn spawn(
        config: &Config,
        token: &SessionToken,
    ) -> anyhow::Result<(SessionHandle, JoinHandle<anyhow::Result<()>>)> {
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(256);
        let core = Self::new(config, token, event_tx)?;
        let handle = core.handle();
        let task = tokio::spawn(core.run(event_rx));
        Ok((handle, task))
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            snapshot: self.snapshot_tx.subscribe(),
            dispatcher: CommandDispatcher::new(self.link_tx.subscribe(), self.revision),
            event_tx: self.event_tx.clone(),
        }
    }

    /// Run the event loop.  Returns on `Shutdown`, or once every
    /// `SessionHandle` has been dropped.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<SessionEvent>) -> anyhow::Result<()> {
        info!(
            "SessionCore: starting, backend {}",
            self.url.host_str().unwrap_or("?")
        );
        self.connect();
        self.publish();

        loop {
            let reconnect_at = self.reconnect_at;
            tokio::select! {
                evt = event_rx.recv() => match evt {
                    None => {
                        info!("SessionCore: event channel closed, shutting down");
                        break;
                    }
                    Some(SessionEvent::Shutdown) => {
                        info!("SessionCore: shutdown requested");
                        break;
                    }
                    Some(SessionEvent::Channel { generation, event }) => {
                        if generation != self.generation {
                            debug!(
                                "SessionCore: ignoring {:?} from stale channel {}",
                                event, generation
                            );
                            continue;
                        }
                        self.handle_channel_event(event);
                    }
                },

                _ = wait_until(reconnect_at) => {
                    self.reconnect_at = None;
                    self.set_phase(self.phase.on_reconnect());
                    self.connect();
                    self.publish();
                }

                _ = self.snapshot_tx.closed() => {
                    info!("SessionCore: all handles dropped, shutting down");
                    break;
                }
            }
        }

        self.teardown();
        Ok(())
    }

    // ── channel events ────────────────────────────────────────────────────────

    fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Open => self.on_open(),
            ChannelEvent::Message(message) => self.on_message(message),
            ChannelEvent::Closed(reason) => {
                self.on_lost(reason.unwrap_or_else(|| "connection closed".to_string()))
            }
            ChannelEvent::Error(e) => self.on_lost(e),
        }
    }

    fn on_open(&mut self) {
        self.attempt = 0;
        self.last_error = None;
        self.set_phase(self.phase.on_open());

        if let Some(channel) = &self.channel {
            self.link_tx.send_replace(Some(channel.sender()));
            self.poller = Some(SessionPoller::start(
                channel.sender(),
                self.poll_period,
                channel.token(),
            ));
            debug!(
                "SessionCore: polling every {:?} on channel {}",
                self.poll_period,
                channel.generation()
            );
        }
        self.publish();
    }

    fn on_message(&mut self, message: Message) {
        let is_status = matches!(message, Message::StatusCheckResponse(_));
        let next = reduce(self.state.clone(), &message);

        if next.playlists != self.state.playlists {
            self.view = GroupedView::build(&next.playlists);
            debug!(
                "SessionCore: catalog now {} playlists in {} categories",
                self.view.playlist_count(),
                self.view.len()
            );
        }
        if next.playing != self.state.playing && next.is_playing() {
            info!(
                "SessionCore: now playing {} - {}",
                next.playing.name, next.playing.artist
            );
        }
        let changed = next != self.state;
        self.state = next;
        self.set_phase(self.phase.on_state(&self.state));

        if is_status {
            self.last_status_at = Some(Local::now());
            self.publish();
        } else if changed {
            self.publish();
        }
    }

    fn on_lost(&mut self, reason: String) {
        warn!("SessionCore: connection lost: {}", reason);
        self.drop_channel();
        self.last_error = Some(reason);

        self.attempt = self.attempt.saturating_add(1);
        let retry = self.policy.delay(self.attempt).map(|d| (self.attempt, d));
        match retry {
            Some((attempt, delay)) => {
                info!(
                    "SessionCore: reconnect attempt {} in {:?}",
                    attempt, delay
                );
                self.reconnect_at = Some(Instant::now() + delay);
            }
            None => {
                error!(
                    "SessionCore: giving up after {} failed connection(s)",
                    self.attempt
                );
                self.reconnect_at = None;
            }
        }
        self.set_phase(self.phase.on_lost(retry));
        self.publish();
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    fn connect(&mut self) {
        self.drop_channel();
        self.generation += 1;
        debug!("SessionCore: opening channel {}", self.generation);
        self.channel = Some(ConnectionChannel::open(
            self.url.clone(),
            self.generation,
            self.connect_timeout,
            self.event_tx.clone(),
            &self.scope,
        ));
    }

    /// Stop the poller before the channel it sends on, then unlink the
    /// dispatcher.
    fn drop_channel(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.stop();
        }
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        self.link_tx.send_replace(None);
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if phase != self.phase {
            info!(
                "SessionCore: phase {} -> {}",
                self.phase.label(),
                phase.label()
            );
            self.phase = phase;
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(SessionSnapshot {
            phase: self.phase.clone(),
            state: self.state.clone(),
            view: self.view.clone(),
            last_status_at: self.last_status_at,
            last_error: self.last_error.clone(),
        });
    }

    fn teardown(&mut self) {
        self.reconnect_at = None;
        self.drop_channel();
        self.scope.cancel();
        self.set_phase(SessionPhase::Closed);
        self.publish();
        info!("SessionCore: stopped");
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jukebox_proto::protocol::{Playlist, StatusCheckResponse};

    fn core() -> (SessionCore, mpsc::Receiver<SessionEvent>) {
        let mut config = Config::default();
        config.reconnect.jitter = false;
        let token = SessionToken::new("abc123").unwrap();
        let (event_tx, event_rx) = mpsc::channel(16);
        (SessionCore::new(&config, &token, event_tx).unwrap(), event_rx)
    }

    fn status(status: &str, password: Option<&str>, playlists: Vec<Playlist>) -> ChannelEvent {
        ChannelEvent::Message(Message::StatusCheckResponse(StatusCheckResponse {
            status: Some(status.to_string()),
            password: password.map(str::to_string),
            playlists: Some(playlists),
            ..Default::default()
        }))
    }

    fn playlist(url: &str, title: &str, category: &str) -> Playlist {
        Playlist {
            url: url.to_string(),
            title: title.to_string(),
            category: category.to_string(),
            album_art: None,
        }
    }

    #[test]
    fn test_connection_url_carries_token() {
        let (core, _rx) = core();
        assert_eq!(core.url.as_str(), "wss://sb.invalidsyn.tax/ws?s=abc123");
    }

    #[tokio::test]
    async fn test_events_drive_snapshot() {
        let (mut core, _rx) = core();
        let handle = core.handle();

        core.handle_channel_event(ChannelEvent::Open);
        assert_eq!(handle.snapshot().phase, SessionPhase::AwaitingFirstStatus);

        core.handle_channel_event(status("Unverified", Some("777"), vec![]));
        let snap = handle.snapshot();
        assert_eq!(snap.phase, SessionPhase::Unauthenticated);
        assert_eq!(snap.state.pending_password.as_deref(), Some("777"));
        assert!(snap.last_status_at.is_some());

        core.handle_channel_event(status(
            "Verified",
            None,
            vec![playlist("u1", "T1", "Rock"), playlist("u2", "T2", "Pop")],
        ));
        let snap = handle.snapshot();
        assert_eq!(snap.phase, SessionPhase::Authenticated);
        assert!(snap.state.authenticated);
        assert_eq!(snap.view.categories().collect::<Vec<_>>(), vec!["Rock", "Pop"]);

        // Unknown messages change nothing.
        core.handle_channel_event(ChannelEvent::Message(Message::Unknown));
        assert_eq!(handle.snapshot().state, snap.state);
    }

    #[tokio::test]
    async fn test_lost_connection_schedules_reconnect_then_gives_up() {
        let (mut core, _rx) = core();
        core.policy.max_attempts = 2;
        let handle = core.handle();

        core.handle_channel_event(ChannelEvent::Open);
        core.handle_channel_event(ChannelEvent::Error("reset".to_string()));
        let snap = handle.snapshot();
        assert!(!snap.connected());
        assert_eq!(
            snap.phase,
            SessionPhase::Disconnected {
                attempt: 1,
                retry_in: Duration::from_millis(500)
            }
        );
        assert_eq!(snap.last_error.as_deref(), Some("reset"));
        assert!(core.reconnect_at.is_some());
        assert!(handle.select_playlist("u1").is_err());

        core.handle_channel_event(ChannelEvent::Closed(None));
        assert!(matches!(
            handle.snapshot().phase,
            SessionPhase::Disconnected { attempt: 2, .. }
        ));

        core.handle_channel_event(ChannelEvent::Closed(Some("bye".to_string())));
        let snap = handle.snapshot();
        assert_eq!(snap.phase, SessionPhase::Closed);
        assert_eq!(snap.last_error.as_deref(), Some("bye"));
        assert!(core.reconnect_at.is_none());
    }

    #[tokio::test]
    async fn test_successful_open_resets_attempts() {
        let (mut core, _rx) = core();
        core.handle_channel_event(ChannelEvent::Error("refused".to_string()));
        core.handle_channel_event(ChannelEvent::Error("refused".to_string()));
        assert_eq!(core.attempt, 2);

        core.set_phase(core.phase.on_reconnect());
        core.handle_channel_event(ChannelEvent::Open);
        assert_eq!(core.attempt, 0);
        assert_eq!(core.last_error, None);
        assert_eq!(core.phase, SessionPhase::AwaitingFirstStatus);
    }
}
