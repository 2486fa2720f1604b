use serde::{Deserialize, Serialize};

/// Wire protocol revisions observed on the backend.  Inbound decoding accepts
/// both authentication shapes; the revision only decides which skip frame we
/// emit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProtocolRevision {
    /// `status: "Verified" | "Unverified"` and `MusicSelect { type: "SkipSong" }`.
    #[default]
    StatusString,
    /// `authenticated: bool` and a dedicated `MusicSkip` message.
    AuthFlag,
}

/// One frame on the websocket, discriminated by its `message` field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "message")]
pub enum Message {
    /// Poll request, sent by the client every poll period.
    StatusCheck,
    MusicSelect(MusicSelect),
    MusicSkip,
    StatusCheckResponse(StatusCheckResponse),
    /// Any discriminant this client does not know about.  Decodes fine and is
    /// ignored downstream.
    #[serde(other)]
    Unknown,
}

/// Playback selection, discriminated by its `type` field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum MusicSelect {
    Playlist { playlist: String },
    SkipSong,
    SetSong { song: String },
}

/// Server reply to `StatusCheck`.  Every field is optional on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatusCheckResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlists: Option<Vec<Playlist>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playing: Option<Track>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_queue: Option<Vec<Track>>,
}

pub const STATUS_VERIFIED: &str = "Verified";
pub const STATUS_UNVERIFIED: &str = "Unverified";

impl StatusCheckResponse {
    /// Whether this response grants access to the catalog.  The boolean flag
    /// takes precedence over the status string; a response with neither (or an
    /// unrecognised status) counts as unverified.
    pub fn is_verified(&self) -> bool {
        match (self.authenticated, self.status.as_deref()) {
            (Some(flag), _) => flag,
            (None, Some(STATUS_VERIFIED)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Track {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub artist: String,
}

impl Track {
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.artist.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Playlist {
    /// Omitted on the wire when empty.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub category: String,
    /// Older backends spell this `album_art`.
    #[serde(
        default,
        rename = "albumArt",
        alias = "album_art",
        skip_serializing_if = "Option::is_none"
    )]
    pub album_art: Option<String>,
}

impl Message {
    /// Encode as the text payload of one websocket frame.
    pub fn encode(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode the text payload of one websocket frame.  Unknown fields and
    /// unknown discriminants are accepted; anything that is not a JSON object
    /// with a string `message` field is an error.
    pub fn decode(text: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// The skip command in the shape the given protocol revision expects.
    pub fn skip(revision: ProtocolRevision) -> Self {
        match revision {
            ProtocolRevision::StatusString => Message::MusicSelect(MusicSelect::SkipSong),
            ProtocolRevision::AuthFlag => Message::MusicSkip,
        }
    }

    pub fn select_playlist(url: impl Into<String>) -> Self {
        Message::MusicSelect(MusicSelect::Playlist {
            playlist: url.into(),
        })
    }

    pub fn set_song(name: impl Into<String>) -> Self {
        Message::MusicSelect(MusicSelect::SetSong { song: name.into() })
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::StatusCheck => "StatusCheck",
            Message::MusicSelect(_) => "MusicSelect",
            Message::MusicSkip => "MusicSkip",
            Message::StatusCheckResponse(_) => "StatusCheckResponse",
            Message::Unknown => "Unknown",
        }
    }
}
