use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::{CaptureDevice, FrameSource};
use crate::error::LensError;
use crate::frame::{Frame, LatestFrame};

/// Bound on how long `stop` waits for the capture thread.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(1);

const IDLE_SLEEP: Duration = Duration::from_millis(10);

struct Worker {
    handle: JoinHandle<Box<dyn CaptureDevice>>,
    done: Receiver<()>,
}

/// Capture thread feeding a single-slot `LatestFrame`.
///
/// The device is moved into the thread on `start` and handed back when the
/// thread exits. If the thread does not finish within `STOP_TIMEOUT` it is
/// detached; it still releases the device once its current grab returns.
pub struct CameraStream {
    device: Option<Box<dyn CaptureDevice>>,
    label: String,
    latest: LatestFrame,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    worker: Option<Worker>,
    stop_timeout: Duration,
}

impl CameraStream {
    pub fn new(device: Box<dyn CaptureDevice>) -> Self {
        Self {
            label: device.describe(),
            device: Some(device),
            latest: LatestFrame::new(),
            running: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            worker: None,
            stop_timeout: STOP_TIMEOUT,
        }
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

impl FrameSource for CameraStream {
    fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let mut device = self.device.take().ok_or_else(|| {
            LensError::CameraUnavailable(format!("{}: device was not returned by a previous stop", self.label))
        })?;
        if let Err(err) = device.open() {
            let err = LensError::CameraUnavailable(format!("{}: {:#}", self.label, err));
            log::error!("{}", err);
            self.device = Some(device);
            return Err(err.into());
        }

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let paused = Arc::clone(&self.paused);
        let latest = self.latest.clone();
        let label = self.label.clone();
        let (done_tx, done_rx) = mpsc::channel();

        let handle = std::thread::Builder::new()
            .name("lensblock-capture".into())
            .spawn(move || {
                let mut failing = false;
                while running.load(Ordering::SeqCst) {
                    if paused.load(Ordering::SeqCst) {
                        std::thread::sleep(IDLE_SLEEP);
                        continue;
                    }
                    match device.grab() {
                        Ok(frame) => {
                            if failing {
                                log::info!("{}: capture recovered", label);
                                failing = false;
                            }
                            latest.store(frame);
                        }
                        Err(err) => {
                            if !failing {
                                log::warn!("{}: capture failed: {:#}", label, err);
                                failing = true;
                            }
                            std::thread::sleep(IDLE_SLEEP);
                        }
                    }
                }
                device.release();
                let _ = done_tx.send(());
                device
            })
            .map_err(|err| LensError::CameraUnavailable(format!("spawn capture thread: {}", err)))?;

        self.worker = Some(Worker {
            handle,
            done: done_rx,
        });
        log::info!("{}: capture started", self.label);
        Ok(())
    }

    fn read(&self) -> Option<Frame> {
        self.latest.read()
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.running.store(false, Ordering::SeqCst);
        match worker.done.recv_timeout(self.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => match worker.handle.join() {
                Ok(device) => self.device = Some(device),
                Err(_) => log::error!("{}: capture thread panicked", self.label),
            },
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "{}: capture thread did not stop within {:?}; detaching",
                    self.label,
                    self.stop_timeout
                );
            }
        }
        self.latest.clear();
        log::info!("{}: capture stopped", self.label);
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.stop();
    }
}
