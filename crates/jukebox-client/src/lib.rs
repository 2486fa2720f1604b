//! Session/protocol synchronization core of the jukebox web client.
//!
//! `SessionCore` owns the websocket (`connection`), polls status
//! (`poller`), reduces replies into `SessionState` and publishes snapshots;
//! `SessionHandle` is what a rendering layer holds.

pub mod backoff;
pub mod connection;
pub mod core;
pub mod dispatcher;
pub mod poller;

pub use crate::core::{SessionCore, SessionEvent, SessionHandle, SessionSnapshot};
pub use crate::dispatcher::{CommandDispatcher, DispatchError};
