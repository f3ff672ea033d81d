pub mod client;
pub mod dispatcher;
pub mod emotion;
pub mod encode;

pub use client::{Classifier, ClassifierError, DetectedFace, FaceApiClient};
pub use dispatcher::{Classification, Dispatcher, ResultSlot, Submission};
pub use emotion::{Emotion, EmotionScores};
pub use encode::{encode_jpeg, EncodeError};
