//! Fire-and-forget inference submissions and the latest-result handoff

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use arc_swap::ArcSwapOption;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use super::client::{Classifier, FaceRectangle};
use super::emotion::EmotionScores;
use super::encode::encode_jpeg;
use crate::display::Snapshot;
use crate::status::StatusText;

/// One completed inference for a single face
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub scores: EmotionScores,
    pub face: Option<FaceRectangle>,
    /// Submission number that produced this result
    pub submission: u64,
}

/// Latest completed classification, swapped in atomically.
///
/// Readers get an immutable snapshot; the newest store wins regardless of
/// which submission produced it.
#[derive(Default)]
pub struct ResultSlot {
    latest: ArcSwapOption<Classification>,
}

impl ResultSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, result: Classification) {
        self.latest.store(Some(Arc::new(result)));
    }

    pub fn latest(&self) -> Option<Arc<Classification>> {
        self.latest.load_full()
    }
}

/// Outcome of a [`Dispatcher::submit`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Accepted(u64),
    /// The in-flight cap is reached; this sample is dropped
    Skipped,
}

/// Spawns one detached task per sampled frame.
pub struct Dispatcher {
    runtime: Handle,
    classifier: Arc<dyn Classifier>,
    slot: Arc<ResultSlot>,
    status: Arc<StatusText>,
    permits: Option<Arc<Semaphore>>,
    jpeg_quality: u8,
    submitted: AtomicU64,
    skipped: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// `max_in_flight == 0` lets submissions pile up without limit.
    pub fn new(
        runtime: Handle,
        classifier: Arc<dyn Classifier>,
        slot: Arc<ResultSlot>,
        status: Arc<StatusText>,
        max_in_flight: usize,
        jpeg_quality: u8,
    ) -> Self {
        let permits = (max_in_flight > 0).then(|| Arc::new(Semaphore::new(max_in_flight)));
        Self {
            runtime,
            classifier,
            slot,
            status,
            permits,
            jpeg_quality,
            submitted: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn slot(&self) -> &Arc<ResultSlot> {
        &self.slot
    }

    /// Start encoding and classifying `snapshot` in the background.
    pub fn submit(&self, snapshot: Snapshot) -> Submission {
        self.submit_with(|| snapshot)
    }

    /// Like [`Dispatcher::submit`], but only takes the snapshot once a
    /// permit is held. A skipped sample never calls `snapshot`.
    pub fn submit_with<F>(&self, snapshot: F) -> Submission
    where
        F: FnOnce() -> Snapshot,
    {
        let permit = match &self.permits {
            Some(sem) => match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    self.skipped.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("inference_skipped").increment(1);
                    debug!("Inference still in flight, skipping sample");
                    return Submission::Skipped;
                }
            },
            None => None,
        };

        let seq = self.submitted.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::counter!("inference_submissions").increment(1);

        let job = Job {
            seq,
            classifier: self.classifier.clone(),
            slot: self.slot.clone(),
            status: self.status.clone(),
            quality: self.jpeg_quality,
            _permit: permit,
        };
        let span = tracing::info_span!("inference", seq);
        let handle = self.runtime.spawn(job.run(snapshot()).instrument(span));

        let mut tasks = self.lock_tasks();
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);

        Submission::Accepted(seq)
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Tasks spawned and not yet finished
    pub fn outstanding(&self) -> usize {
        self.lock_tasks().iter().filter(|t| !t.is_finished()).count()
    }

    /// Wait for every outstanding submission to finish. Nothing is cancelled.
    pub async fn drain(&self) {
        let tasks = std::mem::take(&mut *self.lock_tasks());
        if tasks.is_empty() {
            return;
        }

        info!(count = tasks.len(), "Waiting for in-flight inference");
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Inference task ended abnormally: {}", e);
            }
        }
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct Job {
    seq: u64,
    classifier: Arc<dyn Classifier>,
    slot: Arc<ResultSlot>,
    status: Arc<StatusText>,
    quality: u8,
    // Released when the job finishes, whatever the outcome
    _permit: Option<OwnedSemaphorePermit>,
}

impl Job {
    async fn run(self, snapshot: Snapshot) {
        let started = Instant::now();
        let quality = self.quality;

        let encoded = tokio::task::spawn_blocking(move || encode_jpeg(&snapshot, quality)).await;
        let image = match encoded {
            Ok(Ok(image)) => image,
            Ok(Err(e)) => {
                warn!("Skipping sample, encoding failed: {}", e);
                return;
            }
            Err(e) => {
                warn!("Skipping sample, encoder task failed: {}", e);
                return;
            }
        };

        let outcome = self.classifier.detect(image).await;
        metrics::histogram!("inference_latency_ms").record(started.elapsed().as_millis() as f64);

        match outcome {
            // The most recently enumerated face wins
            Ok(faces) => match faces.into_iter().last() {
                Some(face) => {
                    debug!(dominant = %face.face_attributes.emotion.dominant().0, "Classification landed");
                    self.slot.publish(Classification {
                        scores: face.face_attributes.emotion,
                        face: face.face_rectangle,
                        submission: self.seq,
                    });
                }
                None => debug!("No faces detected, keeping previous result"),
            },
            Err(e) => {
                metrics::counter!("inference_failures").increment(1);
                warn!("Inference failed: {}", e);
                self.status.set(format!("Inference failed: {}", e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::client::{ClassifierError, DetectedFace, FaceAttributes};
    use crate::inference::emotion::Emotion;
    use async_trait::async_trait;
    use bytes::Bytes;

    fn snapshot() -> Snapshot {
        sized(8)
    }

    fn sized(width: u32) -> Snapshot {
        Snapshot {
            width,
            height: 8,
            stride: width * 4,
            pixels: Bytes::from(vec![0x40u8; (width * 4 * 8) as usize]),
        }
    }

    fn face(emotion: Emotion, score: f64) -> DetectedFace {
        DetectedFace {
            face_rectangle: None,
            face_attributes: FaceAttributes {
                emotion: [(emotion, score)].into_iter().collect(),
            },
        }
    }

    struct Fixed(Vec<DetectedFace>);

    #[async_trait]
    impl Classifier for Fixed {
        async fn detect(&self, image: Bytes) -> Result<Vec<DetectedFace>, ClassifierError> {
            assert_eq!(&image[..2], &[0xff, 0xd8]);
            Ok(self.0.clone())
        }
    }

    struct Failing;

    #[async_trait]
    impl Classifier for Failing {
        async fn detect(&self, _image: Bytes) -> Result<Vec<DetectedFace>, ClassifierError> {
            Err(ClassifierError::RateLimited)
        }
    }

    /// Holds each request until the test adds a permit
    struct Gated(Arc<Semaphore>);

    #[async_trait]
    impl Classifier for Gated {
        async fn detect(&self, _image: Bytes) -> Result<Vec<DetectedFace>, ClassifierError> {
            self.0
                .acquire()
                .await
                .map_err(|e| ClassifierError::Network(e.to_string()))?
                .forget();
            Ok(vec![face(Emotion::Fear, 0.7)])
        }
    }

    /// Holds each request until the gate for its image width opens, so
    /// completions can be released in any order
    struct GatedByWidth(Vec<(u32, Arc<Semaphore>)>);

    #[async_trait]
    impl Classifier for GatedByWidth {
        async fn detect(&self, image: Bytes) -> Result<Vec<DetectedFace>, ClassifierError> {
            let width = image::load_from_memory(&image)
                .map_err(|e| ClassifierError::MalformedResponse(e.to_string()))?
                .width();
            let (_, gate) = self
                .0
                .iter()
                .find(|(w, _)| *w == width)
                .ok_or_else(|| ClassifierError::MalformedResponse(format!("no gate for width {width}")))?;
            gate.acquire()
                .await
                .map_err(|e| ClassifierError::Network(e.to_string()))?
                .forget();
            Ok(vec![face(Emotion::Contempt, width as f64 / 100.0)])
        }
    }

    async fn wait_for_submission(slot: &ResultSlot, submission: u64) {
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while slot.latest().map(|r| r.submission) != Some(submission) {
                tokio::time::sleep(std::time::Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
    }

    fn dispatcher(classifier: Arc<dyn Classifier>, max_in_flight: usize) -> Dispatcher {
        Dispatcher::new(
            Handle::current(),
            classifier,
            Arc::new(ResultSlot::new()),
            Arc::new(StatusText::new()),
            max_in_flight,
            80,
        )
    }

    #[test]
    fn slot_starts_empty_and_keeps_latest() {
        let slot = ResultSlot::new();
        assert!(slot.latest().is_none());

        for submission in 1..=2 {
            slot.publish(Classification {
                scores: EmotionScores::default(),
                face: None,
                submission,
            });
        }
        assert_eq!(slot.latest().unwrap().submission, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn last_face_is_published() {
        let faces = vec![face(Emotion::Happiness, 0.9), face(Emotion::Sadness, 0.8)];
        let dispatcher = dispatcher(Arc::new(Fixed(faces)), 1);

        assert_eq!(dispatcher.submit(snapshot()), Submission::Accepted(1));
        dispatcher.drain().await;

        let latest = dispatcher.slot().latest().unwrap();
        assert_eq!(latest.scores.dominant().0, Emotion::Sadness);
        assert_eq!(latest.submission, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn no_faces_keeps_previous_result() {
        let dispatcher = dispatcher(Arc::new(Fixed(Vec::new())), 1);
        dispatcher.slot().publish(Classification {
            scores: [(Emotion::Neutral, 0.6)].into_iter().collect(),
            face: None,
            submission: 0,
        });

        dispatcher.submit(snapshot());
        dispatcher.drain().await;
        assert_eq!(dispatcher.slot().latest().unwrap().submission, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failure_is_shown_in_status() {
        let status = Arc::new(StatusText::new());
        let dispatcher = Dispatcher::new(
            Handle::current(),
            Arc::new(Failing),
            Arc::new(ResultSlot::new()),
            status.clone(),
            1,
            80,
        );

        dispatcher.submit(snapshot());
        dispatcher.drain().await;

        assert!(dispatcher.slot().latest().is_none());
        assert_eq!(
            status.get().as_deref(),
            Some("Inference failed: rate limited by the face service")
        );
        // A failure frees the permit for the next sample
        assert_eq!(dispatcher.submit(snapshot()), Submission::Accepted(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cap_skips_while_in_flight() {
        let gate = Arc::new(Semaphore::new(0));
        let dispatcher = dispatcher(Arc::new(Gated(gate.clone())), 1);

        assert_eq!(dispatcher.submit(snapshot()), Submission::Accepted(1));
        assert_eq!(dispatcher.submit(snapshot()), Submission::Skipped);
        assert_eq!(dispatcher.skipped(), 1);
        assert_eq!(dispatcher.outstanding(), 1);

        gate.add_permits(1);
        dispatcher.drain().await;
        assert_eq!(dispatcher.submit(snapshot()), Submission::Accepted(2));
        gate.add_permits(1);
        dispatcher.drain().await;
        assert_eq!(dispatcher.submitted(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unbounded_accepts_every_sample() {
        let gate = Arc::new(Semaphore::new(0));
        let dispatcher = dispatcher(Arc::new(Gated(gate.clone())), 0);

        for seq in 1..=3 {
            assert_eq!(dispatcher.submit(snapshot()), Submission::Accepted(seq));
        }
        assert_eq!(dispatcher.skipped(), 0);

        assert!(dispatcher.slot().latest().is_none());

        gate.add_permits(3);
        dispatcher.drain().await;
        assert_eq!(dispatcher.slot().latest().unwrap().scores.fear, 0.7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unbounded_slot_keeps_last_completion_not_last_submission() {
        let first = Arc::new(Semaphore::new(0));
        let second = Arc::new(Semaphore::new(0));
        let classifier = GatedByWidth(vec![(8, first.clone()), (16, second.clone())]);
        let dispatcher = dispatcher(Arc::new(classifier), 0);

        assert_eq!(dispatcher.submit(sized(8)), Submission::Accepted(1));
        assert_eq!(dispatcher.submit(sized(16)), Submission::Accepted(2));

        second.add_permits(1);
        wait_for_submission(dispatcher.slot(), 2).await;
        assert_eq!(dispatcher.slot().latest().unwrap().scores.contempt, 0.16);

        // The older request lands last and overwrites the newer result
        first.add_permits(1);
        dispatcher.drain().await;
        let latest = dispatcher.slot().latest().unwrap();
        assert_eq!(latest.submission, 1);
        assert_eq!(latest.scores.contempt, 0.08);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn skipped_sample_is_never_snapshotted() {
        let gate = Arc::new(Semaphore::new(0));
        let dispatcher = dispatcher(Arc::new(Gated(gate.clone())), 1);

        assert_eq!(dispatcher.submit(snapshot()), Submission::Accepted(1));
        let taken = std::sync::atomic::AtomicBool::new(false);
        let outcome = dispatcher.submit_with(|| {
            taken.store(true, Ordering::SeqCst);
            snapshot()
        });
        assert_eq!(outcome, Submission::Skipped);
        assert!(!taken.load(Ordering::SeqCst));

        gate.add_permits(1);
        dispatcher.drain().await;
    }
}
