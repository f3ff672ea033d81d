pub mod capture_loop;
pub mod session;

pub use capture_loop::{CaptureError, CaptureLoop, CaptureThread, LoopReport, LoopStats, SampleCadence, SAMPLE_INTERVAL};
pub use session::{Session, SessionState};
