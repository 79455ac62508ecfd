//! egui text overlay
//!
//! Draws frame timing and caller-provided status lines on top of the
//! finished frame through the wgpu backend.

mod wgpu;

pub use self::wgpu::{frame_stats_text, EguiOverlay};
