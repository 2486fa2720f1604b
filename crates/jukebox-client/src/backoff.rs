use std::time::Duration;

use jukebox_proto::config::ReconnectConfig;

/// Upper bound on any single reconnect delay, whatever the config says.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60 * 60);

/// Bounded exponential backoff for reconnect attempts.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
    pub jitter: bool,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        let base = Duration::from_millis(config.base_delay_ms).min(MAX_RECONNECT_DELAY);
        let max = Duration::from_millis(config.max_delay_ms).clamp(base, MAX_RECONNECT_DELAY);
        Self {
            enabled: config.enabled,
            base,
            max,
            max_attempts: config.max_attempts,
            jitter: config.jitter,
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based): `base * 2^(attempt-1)`
    /// capped at `max`.  `None` when reconnecting is disabled or the attempts
    /// are used up.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if !self.enabled || attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let multiplier = 2_u32.saturating_pow((attempt - 1).min(16));
        let delay = self.base.saturating_mul(multiplier).min(self.max);
        if self.jitter {
            Some(jittered(delay).min(self.max))
        } else {
            Some(delay)
        }
    }
}

/// Spread `base` by a random ±30 %.
fn jittered(base: Duration) -> Duration {
    let jitter_factor = rand::random::<f32>() * 0.6 - 0.3;
    let jitter = base.mul_f32(jitter_factor.abs());
    if jitter_factor >= 0.0 {
        base + jitter
    } else {
        base.saturating_sub(jitter)
    }
}
