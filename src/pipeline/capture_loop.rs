//! Frame acquisition loop: sensor -> display buffer, every Nth frame -> inference

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam::utils::CachePadded;
use thiserror::Error;
use tracing::{debug, error, info, instrument};

use crate::capture::{DeviceError, Frame, FrameSource};
use crate::display::{DisplayBuffer, SinkError};
use crate::inference::{Dispatcher, Submission};
use crate::pipeline::session::Session;
use crate::status::StatusText;

/// Frames between inference samples
pub const SAMPLE_INTERVAL: u64 = 30;

/// Errors that end the capture session
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("display write failed: {0}")]
    Sink(#[from] SinkError),
}

/// Frame counter deciding the sampling instants
#[derive(Debug, Clone)]
pub struct SampleCadence {
    count: u64,
    interval: u64,
}

impl SampleCadence {
    pub fn new(interval: u64) -> Self {
        Self {
            count: 0,
            interval: interval.max(1),
        }
    }

    /// Count one frame; true when this frame should be sampled.
    pub fn tick(&mut self) -> bool {
        self.count = self.count.wrapping_add(1);
        self.count % self.interval == 0
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

#[derive(Debug, Default)]
pub struct LoopStats {
    frames: AtomicU64,
    submitted: AtomicU64,
    skipped: AtomicU64,
}

impl LoopStats {
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    fn report(&self) -> LoopReport {
        LoopReport {
            frames: self.frames(),
            submitted: self.submitted(),
            skipped: self.skipped(),
        }
    }
}

/// Totals at the end of a clean shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopReport {
    pub frames: u64,
    pub submitted: u64,
    pub skipped: u64,
}

pub struct CaptureLoop<S: FrameSource> {
    source: S,
    display: Arc<DisplayBuffer>,
    dispatcher: Arc<Dispatcher>,
    status: Arc<StatusText>,
    session: Session,
    cadence: SampleCadence,
    stats: CachePadded<LoopStats>,
}

impl<S: FrameSource> CaptureLoop<S> {
    pub fn new(
        source: S,
        display: Arc<DisplayBuffer>,
        dispatcher: Arc<Dispatcher>,
        status: Arc<StatusText>,
        session: Session,
        sample_interval: u64,
    ) -> Self {
        Self {
            source,
            display,
            dispatcher,
            status,
            session,
            cadence: SampleCadence::new(sample_interval),
            stats: CachePadded::new(LoopStats::default()),
        }
    }

    /// Run until the session is asked to stop or the device fails.
    ///
    /// The frame source is closed exactly once on the way out, whichever way
    /// the loop ends.
    pub fn run(mut self) -> Result<LoopReport, CaptureError> {
        info!("Capture loop running");
        let outcome = self.drive();

        self.session.request_stop();
        self.source.close();
        self.session.mark_closed();

        match &outcome {
            Ok(report) => info!(
                frames = report.frames,
                submitted = report.submitted,
                skipped = report.skipped,
                "Capture loop closed"
            ),
            Err(e) => error!("Capture loop failed: {}", e),
        }
        outcome
    }

    /// Run the loop on a dedicated `moodcam-capture` thread.
    pub fn spawn(self) -> std::io::Result<CaptureThread>
    where
        S: 'static,
    {
        let session = self.session.clone();
        let handle = thread::Builder::new()
            .name("moodcam-capture".into())
            .spawn(move || self.run())?;
        Ok(CaptureThread {
            session,
            handle: Some(handle),
        })
    }

    fn drive(&mut self) -> Result<LoopReport, CaptureError> {
        while self.session.is_running() {
            // Device errors are fatal, no retry here
            let frame = self.source.next_frame()?;
            self.process(frame)?;
        }
        Ok(self.stats.report())
    }

    #[instrument(level = "trace", skip_all, fields(seq = frame.meta.sequence))]
    fn process(&mut self, frame: Frame) -> Result<(), CaptureError> {
        let started = Instant::now();
        let sample = self.cadence.tick();
        self.stats.frames.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_captured").increment(1);

        // An early return drops the frame, which returns it to the pool
        self.present(&frame)?;
        self.publish_latest();
        drop(frame);

        if sample {
            // The surface is only copied once the dispatcher has room for it
            let display = &self.display;
            match self.dispatcher.submit_with(|| display.snapshot()) {
                Submission::Accepted(seq) => {
                    self.stats.submitted.fetch_add(1, Ordering::Relaxed);
                    debug!(frame = self.cadence.count(), seq, "Sample submitted");
                }
                Submission::Skipped => {
                    self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        metrics::histogram!("frame_time_us").record(started.elapsed().as_micros() as f64);
        Ok(())
    }

    fn present(&self, frame: &Frame) -> Result<(), SinkError> {
        let mut token = self.display.begin_write();
        token.write_region(
            (0, 0),
            frame.width(),
            frame.height(),
            frame.pixels(),
            frame.stride(),
        )?;
        token.commit();
        Ok(())
    }

    fn publish_latest(&self) {
        if let Some(result) = self.dispatcher.slot().latest() {
            let (emotion, _) = result.scores.dominant();
            self.status.set(emotion.label());
        }
    }
}

/// Handle to a capture loop running on its own thread.
///
/// Dropping the handle without calling [`CaptureThread::stop`] still stops
/// the session and joins the thread, so the source gets closed on early
/// exits too.
pub struct CaptureThread {
    session: Session,
    handle: Option<thread::JoinHandle<Result<LoopReport, CaptureError>>>,
}

impl CaptureThread {
    /// Ask the loop to stop and wait for it to close the source.
    pub fn stop(mut self) -> thread::Result<Result<LoopReport, CaptureError>> {
        self.session.request_stop();
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(Ok(LoopReport::default())),
        }
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.session.request_stop();
            if handle.join().is_err() {
                error!("Capture thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_every_thirtieth_frame() {
        let mut cadence = SampleCadence::new(SAMPLE_INTERVAL);
        let sampled: Vec<u64> = (1..=95)
            .filter(|_| cadence.tick())
            .collect();
        assert_eq!(sampled, vec![30, 60, 90]);
        assert_eq!(cadence.count(), 95);
    }

    #[test]
    fn sample_count_is_floor_of_frames() {
        for frames in [0u64, 1, 29, 30, 31, 59, 61, 300, 301] {
            let mut cadence = SampleCadence::new(SAMPLE_INTERVAL);
            let samples = (0..frames).filter(|_| cadence.tick()).count() as u64;
            assert_eq!(samples, frames / SAMPLE_INTERVAL, "frames={frames}");
        }
    }

    #[test]
    fn zero_interval_samples_every_frame() {
        let mut cadence = SampleCadence::new(0);
        assert!(cadence.tick());
        assert!(cadence.tick());
    }
}
