//! Fixed-cadence `StatusCheck` sender.
//!
//! The protocol is poll-driven: nothing refreshes session state except the
//! replies to these checks.  A poller is scoped to one channel; its token is
//! a child of the channel's, so closing the channel stops it.

use std::time::Duration;

use jukebox_proto::protocol::Message;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connection::ChannelSender;

pub struct SessionPoller {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SessionPoller {
    /// First check goes out one `period` after start.
    pub fn start(sender: ChannelSender, period: Duration, parent: &CancellationToken) -> Self {
        let cancel = parent.child_token();
        let task = tokio::spawn(poll_loop(sender, period, cancel.clone()));
        Self { cancel, task }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SessionPoller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn poll_loop(sender: ChannelSender, period: Duration, cancel: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("poller: cancelled");
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = sender.send(&Message::StatusCheck) {
                    debug!("poller: stopping, {}", e);
                    break;
                }
            }
        }
    }
}
