//! Censorship-mode output gate.
//!
//! A frame only reaches the virtual camera if its redaction finished within
//! the latency budget. Otherwise the last frame that did is repeated. Before
//! any frame has passed, a blocked frame stands in, so the sink never sees an
//! unredacted image on a slow first cycle.
//!
//! The gate also keeps a simple incident flag for the audit log, separate
//! from the lockout machine.

use std::time::{Duration, Instant};

use super::IncidentSummary;
use crate::audit::THREAT_REDACTED;
use crate::detect::TrackedFrame;
use crate::frame::Frame;
use crate::render;

/// Inference latency above which the fresh frame is withheld.
pub const LATENCY_BUDGET: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub struct GateOutput {
    /// Frame for the virtual camera.
    pub output: Frame,
    /// Annotated frame for the preview.
    pub preview: Frame,
    /// The fresh frame was withheld.
    pub slow: bool,
}

#[derive(Debug)]
struct Incident {
    started: Instant,
    peak: f32,
}

#[derive(Debug)]
pub struct RedactionGate {
    budget: Duration,
    last_safe: Option<Frame>,
    incident: Option<Incident>,
}

impl Default for RedactionGate {
    fn default() -> Self {
        Self::new(LATENCY_BUDGET)
    }
}

impl RedactionGate {
    pub fn new(budget: Duration) -> Self {
        Self {
            budget,
            last_safe: None,
            incident: None,
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn has_safe_frame(&self) -> bool {
        self.last_safe.is_some()
    }

    pub fn incident_active(&self) -> bool {
        self.incident.is_some()
    }

    /// Choose the virtual-camera frame for one tracked result.
    pub fn admit(&mut self, tracked: TrackedFrame, latency: Duration) -> GateOutput {
        let TrackedFrame { clean, preview, .. } = tracked;
        if latency > self.budget {
            log::debug!("redaction took {:?}; repeating last safe frame", latency);
            let output = match &self.last_safe {
                Some(frame) => frame.clone(),
                None => render::blocked_frame(clean.width(), clean.height(), clean.order()),
            };
            return GateOutput {
                output,
                preview,
                slow: true,
            };
        }
        self.last_safe = Some(clean.clone());
        GateOutput {
            output: clean,
            preview,
            slow: false,
        }
    }

    /// Update the incident flag. Returns the finished incident when the last
    /// tracked region disappears.
    pub fn observe(
        &mut self,
        detected: bool,
        confidence: f32,
        region_count: usize,
        now: Instant,
    ) -> Option<IncidentSummary> {
        if detected {
            let incident = self.incident.get_or_insert_with(|| {
                log::info!("redaction incident started");
                Incident {
                    started: now,
                    peak: 0.0,
                }
            });
            incident.peak = incident.peak.max(confidence);
        }
        if region_count > 0 {
            return None;
        }
        self.incident.take().map(|incident| {
            let summary = IncidentSummary {
                threat_type: THREAT_REDACTED,
                peak_confidence: incident.peak,
                duration: now.saturating_duration_since(incident.started),
            };
            log::info!(
                "redaction incident ended after {:.2}s",
                summary.duration.as_secs_f64()
            );
            summary
        })
    }

    /// Drop the safe-frame cache and any open incident.
    pub fn clear(&mut self) {
        self.last_safe = None;
        self.incident = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ChannelOrder;

    fn tracked(rgb: [u8; 3]) -> TrackedFrame {
        TrackedFrame {
            detected: false,
            confidence: 0.0,
            clean: Frame::solid(8, 8, rgb, ChannelOrder::Rgb),
            preview: Frame::solid(8, 8, rgb, ChannelOrder::Rgb),
            region_count: 0,
        }
    }

    #[test]
    fn fast_frames_pass_and_become_safe() {
        let mut gate = RedactionGate::default();
        let out = gate.admit(tracked([1, 1, 1]), Duration::from_millis(10));
        assert!(!out.slow);
        assert_eq!(out.output.rgb_at(0, 0), [1, 1, 1]);
        assert!(gate.has_safe_frame());
    }

    #[test]
    fn slow_frame_repeats_last_safe() {
        let mut gate = RedactionGate::default();
        gate.admit(tracked([1, 1, 1]), Duration::from_millis(10));
        let out = gate.admit(tracked([2, 2, 2]), Duration::from_millis(51));
        assert!(out.slow);
        assert_eq!(out.output.rgb_at(0, 0), [1, 1, 1]);
        // The preview still shows the fresh redacted frame.
        assert_eq!(out.preview.rgb_at(0, 0), [2, 2, 2]);

        // The withheld frame does not replace the cache.
        let again = gate.admit(tracked([3, 3, 3]), Duration::from_millis(60));
        assert_eq!(again.output.rgb_at(0, 0), [1, 1, 1]);
    }

    #[test]
    fn exactly_on_budget_passes() {
        let mut gate = RedactionGate::default();
        let out = gate.admit(tracked([4, 4, 4]), LATENCY_BUDGET);
        assert!(!out.slow);
    }

    #[test]
    fn slow_first_frame_is_blocked() {
        let mut gate = RedactionGate::default();
        let out = gate.admit(tracked([200, 200, 200]), Duration::from_millis(80));
        assert!(out.slow);
        assert_ne!(out.output.rgb_at(0, 0), [200, 200, 200]);
        assert!(!gate.has_safe_frame());
    }

    #[test]
    fn incident_ends_when_regions_clear() {
        let t0 = Instant::now();
        let mut gate = RedactionGate::default();
        assert!(gate.observe(true, 0.7, 1, t0).is_none());
        assert!(gate.observe(true, 0.9, 1, t0 + Duration::from_secs(1)).is_none());
        // Missed detection but the region is still cooling down.
        assert!(gate.observe(false, 0.0, 1, t0 + Duration::from_secs(2)).is_none());
        assert!(gate.incident_active());

        let summary = gate
            .observe(false, 0.0, 0, t0 + Duration::from_secs(3))
            .unwrap();
        assert_eq!(summary.threat_type, THREAT_REDACTED);
        assert_eq!(summary.peak_confidence, 0.9);
        assert_eq!(summary.duration, Duration::from_secs(3));
        assert!(!gate.incident_active());
        assert!(gate.observe(false, 0.0, 0, t0 + Duration::from_secs(4)).is_none());
    }

    #[test]
    fn clear_drops_cache_and_incident() {
        let mut gate = RedactionGate::default();
        gate.admit(tracked([1, 1, 1]), Duration::ZERO);
        gate.observe(true, 0.8, 1, Instant::now());
        gate.clear();
        assert!(!gate.has_safe_frame());
        assert!(!gate.incident_active());
    }
}
