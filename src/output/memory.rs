use anyhow::{bail, Result};
use std::sync::{Arc, Mutex};

use super::{FramePacer, VirtualCamera};
use crate::frame::Frame;

/// Shared view of the frames a `MemoryCamera` received.
#[derive(Clone, Default)]
pub struct SentFrames {
    inner: Arc<Mutex<SentInner>>,
}

#[derive(Default)]
struct SentInner {
    frames: Vec<Frame>,
    fail_next: usize,
}

impl SentFrames {
    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last(&self) -> Option<Frame> {
        self.lock().frames.last().cloned()
    }

    pub fn take(&self) -> Vec<Frame> {
        std::mem::take(&mut self.lock().frames)
    }

    /// Make the next `n` sends fail.
    pub fn fail_next(&self, n: usize) {
        self.lock().fail_next = n;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SentInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-process sink. Keeps every frame it receives, up to `capacity`, and
/// paces sends to `fps` like a real device.
pub struct MemoryCamera {
    width: u32,
    height: u32,
    fps: u32,
    capacity: usize,
    pacer: FramePacer,
    sent: SentFrames,
}

impl MemoryCamera {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            fps,
            capacity: 256,
            pacer: FramePacer::new(fps),
            sent: SentFrames::default(),
        }
    }

    pub fn sent(&self) -> SentFrames {
        self.sent.clone()
    }
}

impl VirtualCamera for MemoryCamera {
    fn describe(&self) -> String {
        format!("memory ({}x{})", self.width, self.height)
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn fps(&self) -> u32 {
        self.fps
    }

    fn send(&mut self, frame: &Frame) -> Result<()> {
        self.pacer.wait();
        let mut inner = self.sent.lock();
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            bail!("scripted send failure");
        }
        if frame.width() != self.width || frame.height() != self.height {
            bail!(
                "frame {}x{} does not match sink {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            );
        }
        if inner.frames.len() >= self.capacity {
            inner.frames.remove(0);
        }
        inner.frames.push(frame.clone());
        Ok(())
    }
}
