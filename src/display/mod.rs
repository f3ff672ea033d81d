pub mod buffer;
#[cfg(feature = "sdl-display")]
pub mod display;

pub use buffer::{DisplayBuffer, Region, SinkError, Snapshot, WriteToken};
#[cfg(feature = "sdl-display")]
pub use display::Sdl2Display;
