//! Backend abstraction layer
//!
//! Provides the common trait and types implemented by the wgpu backend and by
//! the headless recording backend used in tests.

pub mod recording;
pub mod traits;
pub mod types;
pub mod wgpu_backend;

pub use recording::{CommandLog, RecordedCommand, RecordingBackend};
pub use traits::*;
pub use types::*;
