//! Outbound playback commands.
//!
//! Fire-and-forget: one frame per call, no acknowledgement.  Local session
//! state is never touched here; the effect shows up in the next poll reply.

use jukebox_proto::protocol::{Message, ProtocolRevision};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::connection::{ChannelError, ChannelSender};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("not connected")]
    Disconnected,
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Sends commands through whichever channel is currently open.  The session
/// core swaps the linked sender on every (re)connect.
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    link: watch::Receiver<Option<ChannelSender>>,
    revision: ProtocolRevision,
}

impl CommandDispatcher {
    pub fn new(link: watch::Receiver<Option<ChannelSender>>, revision: ProtocolRevision) -> Self {
        Self { link, revision }
    }

    pub fn select_playlist(&self, url: &str) -> Result<(), DispatchError> {
        self.dispatch(Message::select_playlist(url))
    }

    /// Skip the current track, in the shape the configured revision expects.
    pub fn skip(&self) -> Result<(), DispatchError> {
        self.dispatch(Message::skip(self.revision))
    }

    /// Jump to a track by name.  No UI affordance uses this yet.
    pub fn set_song(&self, name: &str) -> Result<(), DispatchError> {
        self.dispatch(Message::set_song(name))
    }

    fn dispatch(&self, message: Message) -> Result<(), DispatchError> {
        let Some(sender) = self.link.borrow().clone() else {
            warn!("dispatch: dropping {}, not connected", message.kind());
            return Err(DispatchError::Disconnected);
        };
        info!("dispatch: {:?}", message);
        sender.send(&message)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    fn linked(
        revision: ProtocolRevision,
    ) -> (
        CommandDispatcher,
        watch::Sender<Option<ChannelSender>>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (link_tx, link_rx) = watch::channel(Some(ChannelSender::new(tx)));
        (CommandDispatcher::new(link_rx, revision), link_tx, rx)
    }

    fn frames(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(text) = rx.try_recv() {
            out.push(serde_json::from_str(&text).unwrap());
        }
        out
    }

    #[test]
    fn test_select_playlist_sends_exactly_one_frame() {
        let (dispatcher, _link, mut rx) = linked(ProtocolRevision::StatusString);
        dispatcher.select_playlist("u").unwrap();
        assert_eq!(
            frames(&mut rx),
            vec![json!({"message": "MusicSelect", "type": "Playlist", "playlist": "u"})]
        );
    }

    #[test]
    fn test_skip_follows_protocol_revision() {
        let (dispatcher, _link, mut rx) = linked(ProtocolRevision::StatusString);
        dispatcher.skip().unwrap();
        assert_eq!(
            frames(&mut rx),
            vec![json!({"message": "MusicSelect", "type": "SkipSong"})]
        );

        let (dispatcher, _link, mut rx) = linked(ProtocolRevision::AuthFlag);
        dispatcher.skip().unwrap();
        assert_eq!(frames(&mut rx), vec![json!({"message": "MusicSkip"})]);
    }

    #[test]
    fn test_set_song() {
        let (dispatcher, _link, mut rx) = linked(ProtocolRevision::StatusString);
        dispatcher.set_song("Living La Vida Loca").unwrap();
        assert_eq!(
            frames(&mut rx),
            vec![json!({"message": "MusicSelect", "type": "SetSong", "song": "Living La Vida Loca"})]
        );
    }

    #[test]
    fn test_disconnected_and_closed_channels() {
        let (dispatcher, link, rx) = linked(ProtocolRevision::StatusString);

        drop(rx);
        assert!(matches!(
            dispatcher.skip(),
            Err(DispatchError::Channel(ChannelError::Closed))
        ));

        link.send_replace(None);
        assert!(matches!(
            dispatcher.select_playlist("u"),
            Err(DispatchError::Disconnected)
        ));
    }
}
