//! Session bring-up policy
//!
//! Pure state machine deciding what the engine does after each registration
//! outcome. It never sleeps or touches the network; the engine schedules the
//! returned [`BringUpStep`].
//!
//! ```text
//! Unregistered -> Registering -> Online -> Reconnecting -> Online | Exhausted
//! ```

use std::time::Duration;

use galaxy_core::{LifecycleConfig, SessionStatus};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unregistered,
    Registering,
    Online,
    Reconnecting,
    Exhausted,
}

impl LifecycleState {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleState::Unregistered => "Unregistered",
            LifecycleState::Registering => "Registering",
            LifecycleState::Online => "Online",
            LifecycleState::Reconnecting => "Reconnecting",
            LifecycleState::Exhausted => "Exhausted",
        }
    }

    /// Status as shown on the event surface
    pub fn status(&self) -> SessionStatus {
        match self {
            LifecycleState::Unregistered | LifecycleState::Registering => {
                SessionStatus::Connecting
            }
            LifecycleState::Online => SessionStatus::Online,
            LifecycleState::Reconnecting => SessionStatus::Reconnecting,
            LifecycleState::Exhausted => SessionStatus::Offline,
        }
    }
}

/// What the engine should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringUpStep {
    /// Register the current identity now
    Register,
    /// Wait, then register the (freshly regenerated) identity
    RegisterAfter(Duration),
    /// Wait, then register the same identity again
    RetryAfter(Duration),
    /// Regenerate the identity, wait, then start a fresh round
    Regenerate { delay: Duration },
    /// Give up until an explicit restart
    Offline,
}

#[derive(Debug)]
pub struct LifecycleManager {
    config: LifecycleConfig,
    state: LifecycleState,
    /// Transport failures in the current round
    retries: u32,
    /// Regenerations since the last explicit start
    regenerations: u32,
    round_started: Option<Instant>,
}

impl LifecycleManager {
    pub fn new(config: LifecycleConfig) -> Self {
        Self {
            config,
            state: LifecycleState::Unregistered,
            retries: 0,
            regenerations: 0,
            round_started: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_online(&self) -> bool {
        self.state == LifecycleState::Online
    }

    /// Start (or explicitly restart) bring-up
    pub fn begin(&mut self, now: Instant) -> BringUpStep {
        self.state = LifecycleState::Registering;
        self.retries = 0;
        self.regenerations = 0;
        self.round_started = Some(now);
        BringUpStep::Register
    }

    pub fn on_registered(&mut self) {
        self.state = LifecycleState::Online;
        self.retries = 0;
        self.regenerations = 0;
        self.round_started = None;
    }

    /// Identity taken: the caller regenerates it, then registers again after
    /// a short pause
    ///
    /// Conflicts do not consume the retry budget, but they do run down the
    /// bring-up window.
    pub fn on_conflict(&mut self, now: Instant) -> BringUpStep {
        if self.state == LifecycleState::Exhausted {
            return BringUpStep::Offline;
        }
        if self.state != LifecycleState::Reconnecting {
            self.state = LifecycleState::Registering;
        }
        if self.window_spent(now) {
            return self.give_up_round(now);
        }
        BringUpStep::RegisterAfter(self.config.conflict_retry_delay)
    }

    /// Registration failed or timed out
    pub fn on_failure(&mut self, now: Instant) -> BringUpStep {
        if self.state == LifecycleState::Exhausted {
            return BringUpStep::Offline;
        }
        self.state = LifecycleState::Reconnecting;

        if self.window_spent(now) || self.retries >= self.config.max_retries {
            return self.give_up_round(now);
        }

        self.retries += 1;
        BringUpStep::RetryAfter(self.backoff_delay(self.retries))
    }

    fn window_spent(&mut self, now: Instant) -> bool {
        let started = *self.round_started.get_or_insert(now);
        now.saturating_duration_since(started) >= self.config.bring_up_window
    }

    /// Regenerate once per start, then go offline
    fn give_up_round(&mut self, now: Instant) -> BringUpStep {
        if self.regenerations < self.config.max_regenerations {
            self.regenerations += 1;
            self.retries = 0;
            self.round_started = Some(now + self.config.regeneration_delay);
            return BringUpStep::Regenerate {
                delay: self.config.regeneration_delay,
            };
        }
        self.state = LifecycleState::Exhausted;
        BringUpStep::Offline
    }

    /// Whether a scheduled registration is still wanted
    pub fn awaits_registration(&self) -> bool {
        matches!(
            self.state,
            LifecycleState::Registering | LifecycleState::Reconnecting
        )
    }

    /// An established registration was lost; start a fresh round
    pub fn on_liveness_lost(&mut self, now: Instant) -> BringUpStep {
        self.retries = 0;
        self.regenerations = 0;
        self.round_started = Some(now);
        self.on_failure(now)
    }

    /// Delay before retry number `attempt` (1-based), capped
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let factor = self.config.backoff_multiplier.max(1.0).powi(exponent);
        self.config
            .initial_retry_delay
            .mul_f32(factor)
            .min(self.config.max_retry_delay)
    }
}
