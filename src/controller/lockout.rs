//! Full-screen lockout state machine.
//!
//! `Armed` -> `Lockdown` after `persistence_frames` consecutive qualifying
//! frames. Every qualifying frame during lockdown pushes the expiry out again.
//! `Lockdown` -> `Armed` only once the object is gone (streak back at zero)
//! and the expiry has passed. An override suspends evaluation entirely until
//! its grace period ends.

use std::time::{Duration, Instant};

use super::IncidentSummary;
use crate::audit::{THREAT_INTRUSION, THREAT_OVERRIDDEN};
use crate::config::DetectionSettings;
use crate::detect::Verdict;
use crate::notify::LockoutNotice;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockoutState {
    Armed,
    Lockdown,
}

/// What one evaluation produced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Evaluation {
    /// Notice for the overlay; `None` while armed with nothing to report.
    pub notice: Option<LockoutNotice>,
    pub entered: bool,
    /// Set on the frame that leaves lockdown.
    pub exited: Option<IncidentSummary>,
    /// True when an override grace period skipped this frame.
    pub bypassed: bool,
}

#[derive(Debug, Default)]
pub struct LockoutMachine {
    consecutive: u32,
    active: bool,
    incident_start: Option<Instant>,
    max_confidence: f32,
    lockout_end: Option<Instant>,
    override_until: Option<Instant>,
}

impl LockoutMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LockoutState {
        if self.active {
            LockoutState::Lockdown
        } else {
            LockoutState::Armed
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn max_confidence(&self) -> f32 {
        self.max_confidence
    }

    pub fn lockout_end(&self) -> Option<Instant> {
        self.lockout_end
    }

    pub fn override_until(&self) -> Option<Instant> {
        self.override_until
    }

    pub fn in_grace(&self, now: Instant) -> bool {
        self.override_until.is_some_and(|until| now < until)
    }

    /// Whole seconds left before the lockout may expire, never negative.
    pub fn remaining_secs(&self, now: Instant) -> u32 {
        self.lockout_end
            .map(|end| end.saturating_duration_since(now).as_secs())
            .unwrap_or(0)
            .min(u32::MAX as u64) as u32
    }

    /// Feed one frame's verdict.
    pub fn evaluate(
        &mut self,
        verdict: Verdict,
        settings: &DetectionSettings,
        now: Instant,
    ) -> Evaluation {
        if self.in_grace(now) {
            return Evaluation {
                bypassed: true,
                ..Evaluation::default()
            };
        }

        let mut out = Evaluation::default();
        let qualifying = verdict.detected && verdict.confidence >= settings.confidence_threshold;

        if qualifying {
            self.consecutive += 1;
            self.max_confidence = self.max_confidence.max(verdict.confidence);
            if self.active {
                self.lockout_end = Some(now + settings.lockout_duration);
            }
        } else {
            self.consecutive = 0;
            if !self.active {
                // A broken streak is not an incident; its peak does not carry over.
                self.max_confidence = 0.0;
            }
        }

        if self.consecutive >= settings.persistence_frames.max(1) {
            if !self.active {
                self.active = true;
                self.incident_start = Some(now);
                self.lockout_end = Some(now + settings.lockout_duration);
                out.entered = true;
                log::info!(
                    "lockdown entered: confidence {:.2} after {} frames",
                    self.max_confidence,
                    self.consecutive
                );
            }
        } else if self.consecutive == 0 && self.active && self.expired(now) {
            let summary = self.summary(THREAT_INTRUSION, now);
            log::info!("lockdown exited after {:.2}s", summary.duration.as_secs_f64());
            self.reset();
            out.exited = Some(summary);
            out.notice = Some(LockoutNotice::cleared());
        }

        if self.active {
            out.notice = Some(LockoutNotice::active(self.remaining_secs(now)));
        }
        out
    }

    /// Suspend evaluation for `grace`. An active lockdown ends immediately and
    /// is returned as an overridden incident.
    pub fn request_override(&mut self, grace: Duration, now: Instant) -> Option<IncidentSummary> {
        let summary = self.active.then(|| self.summary(THREAT_OVERRIDDEN, now));
        if summary.is_some() {
            log::info!("lockdown overridden");
        }
        self.reset();
        self.override_until = Some(now + grace);
        summary
    }

    /// Back to initial values, including any override window.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn expired(&self, now: Instant) -> bool {
        self.lockout_end.map_or(true, |end| now > end)
    }

    fn summary(&self, threat_type: &'static str, now: Instant) -> IncidentSummary {
        IncidentSummary {
            threat_type,
            peak_confidence: self.max_confidence,
            duration: self
                .incident_start
                .map(|start| now.saturating_duration_since(start))
                .unwrap_or_default(),
        }
    }

    fn reset(&mut self) {
        self.consecutive = 0;
        self.active = false;
        self.incident_start = None;
        self.max_confidence = 0.0;
        self.lockout_end = None;
    }
}
