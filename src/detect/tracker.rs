//! Temporal threat tracking.
//!
//! `ThreatMemory` turns noisy per-frame detections into stable regions. Each
//! region survives up to `COOLDOWN_LIMIT` consecutive unmatched frames, which
//! keeps a redaction in place through an occasional missed detection.
//!
//! Regions live in an arena of slots with a free list, so steady-state
//! tracking does not allocate per frame. Ids are monotonic and never reused
//! until the memory is cleared.

use crate::geometry::BBox;

/// A region is evicted once its cooldown exceeds this many frames.
pub const COOLDOWN_LIMIT: u32 = 10;

/// Minimum IoU for a detection to be considered the same object as a region.
pub const MATCH_IOU: f32 = 0.3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThreatRegion {
    pub id: u64,
    /// Box from the most recent match.
    pub bbox: BBox,
    /// Frames since the last match.
    pub cooldown: u32,
}

impl ThreatRegion {
    pub fn is_fading(&self) -> bool {
        self.cooldown > 0
    }
}

#[derive(Debug, Default)]
pub struct ThreatMemory {
    slots: Vec<Option<ThreatRegion>>,
    free: Vec<usize>,
    // Insertion sequence; iteration and tie-breaks follow this order.
    order: Vec<usize>,
    matched: Vec<bool>,
    next_id: u64,
}

impl ThreatMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Surviving regions in insertion order.
    pub fn regions(&self) -> impl Iterator<Item = &ThreatRegion> + '_ {
        self.order.iter().filter_map(|&slot| self.slots[slot].as_ref())
    }

    pub fn get(&self, id: u64) -> Option<&ThreatRegion> {
        self.regions().find(|r| r.id == id)
    }

    /// Drop every region and restart ids from zero.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.order.clear();
        self.matched.clear();
        self.next_id = 0;
    }

    /// Fold one frame of candidate boxes into memory.
    ///
    /// Each candidate goes to the existing region with the highest IoU above
    /// `MATCH_IOU` (earliest-inserted region wins ties); otherwise it opens a
    /// new region. Matched regions take the new box and reset their cooldown.
    /// Every other region ages by one frame and is evicted past
    /// `COOLDOWN_LIMIT`.
    pub fn update(&mut self, candidates: &[BBox]) {
        self.matched.clear();
        self.matched.resize(self.slots.len(), false);

        for candidate in candidates {
            let mut best: Option<(usize, f32)> = None;
            for &slot in &self.order {
                let Some(region) = self.slots[slot].as_ref() else {
                    continue;
                };
                let iou = candidate.iou(&region.bbox);
                let floor = best.map(|(_, v)| v).unwrap_or(MATCH_IOU);
                if iou > floor {
                    best = Some((slot, iou));
                }
            }

            match best {
                Some((slot, _)) => {
                    if let Some(region) = self.slots[slot].as_mut() {
                        region.bbox = *candidate;
                        region.cooldown = 0;
                    }
                    self.matched[slot] = true;
                }
                None => {
                    let slot = self.insert(*candidate);
                    self.matched[slot] = true;
                }
            }
        }

        let mut evicted = false;
        for &slot in &self.order {
            if self.matched.get(slot).copied().unwrap_or(false) {
                continue;
            }
            if let Some(region) = self.slots[slot].as_mut() {
                region.cooldown += 1;
                if region.cooldown > COOLDOWN_LIMIT {
                    self.slots[slot] = None;
                    self.free.push(slot);
                    evicted = true;
                }
            }
        }
        if evicted {
            let slots = &self.slots;
            self.order.retain(|&slot| slots[slot].is_some());
        }
    }

    fn insert(&mut self, bbox: BBox) -> usize {
        let region = ThreatRegion {
            id: self.next_id,
            bbox,
            cooldown: 0,
        };
        self.next_id += 1;
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(region);
                slot
            }
            None => {
                self.slots.push(Some(region));
                self.matched.push(false);
                self.slots.len() - 1
            }
        };
        self.order.push(slot);
        slot
    }
}
