//! Jamming alert evaluation with hysteresis.
//!
//! [`AlertTracker`] turns the jamming index stream into [`AlertState`]
//! transitions. An episode is raised when the index rises above the jam
//! threshold and only clears once it falls to the recovery threshold, so a
//! sustained (or hovering) condition yields a single alert.

use monitor_core::models::AlertState;

/// A change of alert level produced by [`AlertTracker::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertTransition {
    /// Normal → Jammed.
    Raised { jam_ind: u8, threshold: u8 },
    /// Jammed → Normal.
    Cleared { jam_ind: u8, peak: u8 },
}

#[derive(Debug, Clone)]
pub struct AlertTracker {
    jam_threshold: u8,
    recovery_threshold: u8,
    state: AlertState,
    /// Highest index seen during the current episode.
    peak: u8,
    episodes: u32,
}

impl AlertTracker {
    /// `recovery_threshold` is clamped to `jam_threshold`.
    pub fn new(jam_threshold: u8, recovery_threshold: u8) -> Self {
        Self {
            jam_threshold,
            recovery_threshold: recovery_threshold.min(jam_threshold),
            state: AlertState::Normal,
            peak: 0,
            episodes: 0,
        }
    }

    pub fn state(&self) -> AlertState {
        self.state
    }

    /// Number of episodes raised so far.
    pub fn episodes(&self) -> u32 {
        self.episodes
    }

    /// Feed one jamming index; returns the transition it caused, if any.
    pub fn observe(&mut self, jam_ind: u8) -> Option<AlertTransition> {
        match self.state {
            AlertState::Normal if jam_ind > self.jam_threshold => {
                self.state = AlertState::Jammed;
                self.peak = jam_ind;
                self.episodes += 1;
                Some(AlertTransition::Raised {
                    jam_ind,
                    threshold: self.jam_threshold,
                })
            }
            AlertState::Jammed if jam_ind <= self.recovery_threshold => {
                self.state = AlertState::Normal;
                Some(AlertTransition::Cleared {
                    jam_ind,
                    peak: std::mem::take(&mut self.peak),
                })
            }
            AlertState::Jammed => {
                self.peak = self.peak.max(jam_ind);
                None
            }
            AlertState::Normal => None,
        }
    }
}
