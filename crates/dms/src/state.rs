//! Fatigue timing state machine

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Fatigue phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FatiguePhase {
    /// Eyes seen in the latest processed frame
    #[default]
    EyesPresent,
    /// Eyes missing, threshold not reached yet
    EyesAbsentTiming,
    /// Eyes missing for at least the threshold
    FatigueActive,
}

/// Observable fatigue state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FatigueState {
    /// Start of the current absence; `None` iff eyes were seen last frame
    pub eyes_absent_since: Option<Instant>,
    /// Absence has lasted at least the threshold
    pub fatigue_active: bool,
}

/// Outcome of one update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FatigueVerdict {
    pub fatigue_now: bool,
    /// Entered fatigue on this frame
    pub rising_edge: bool,
    /// Left fatigue on this frame
    pub falling_edge: bool,
    /// Continuous absence so far, when eyes are missing
    pub eyes_absent_for: Option<Duration>,
}

/// Driver fatigue state (tracked over time)
#[derive(Debug, Clone)]
pub struct FatigueStateMachine {
    threshold: Duration,
    phase: FatiguePhase,
    state: FatigueState,
    episodes: u64,
}

impl FatigueStateMachine {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            phase: FatiguePhase::EyesPresent,
            state: FatigueState::default(),
            episodes: 0,
        }
    }

    /// Feed one processed frame
    pub fn update(&mut self, eyes_observed: bool, now: Instant) -> FatigueVerdict {
        if eyes_observed {
            let falling_edge = self.phase == FatiguePhase::FatigueActive;
            if falling_edge {
                info!("Eyes observed again, fatigue episode {} ended", self.episodes);
            }
            self.phase = FatiguePhase::EyesPresent;
            self.state = FatigueState::default();

            return FatigueVerdict {
                falling_edge,
                ..Default::default()
            };
        }

        let since = *self.state.eyes_absent_since.get_or_insert(now);
        if self.phase == FatiguePhase::EyesPresent {
            debug!("Eyes lost, absence timer started");
            self.phase = FatiguePhase::EyesAbsentTiming;
        }

        let elapsed = now.saturating_duration_since(since);
        let rising_edge = self.phase == FatiguePhase::EyesAbsentTiming && elapsed >= self.threshold;
        if rising_edge {
            self.phase = FatiguePhase::FatigueActive;
            self.state.fatigue_active = true;
            self.episodes += 1;
            warn!(
                "Fatigue detected: eyes absent for {:.1}s (episode {})",
                elapsed.as_secs_f64(),
                self.episodes
            );
        }

        FatigueVerdict {
            fatigue_now: self.state.fatigue_active,
            rising_edge,
            falling_edge: false,
            eyes_absent_for: Some(elapsed),
        }
    }

    pub fn phase(&self) -> FatiguePhase {
        self.phase
    }

    pub fn state(&self) -> FatigueState {
        self.state
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Fatigue episodes entered since start
    pub fn episodes(&self) -> u64 {
        self.episodes
    }
}
