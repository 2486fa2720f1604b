//! Wire protocol, session state and derived views shared by the jukebox
//! client and its tests.

pub mod config;
pub mod platform;
pub mod protocol;
pub mod session;
pub mod state;
pub mod view;
