//! Deferred PBR - a render graph-based deferred renderer with image-based lighting
//!
//! # Features
//! - Render graph with declared resource accesses, topological ordering and barriers
//! - G-buffer (position/metallic, normal/roughness, albedo/ao) and full-screen
//!   Cook-Torrance lighting with up to four point lights
//! - Split-sum image-based lighting: irradiance convolution, specular
//!   prefiltering and a BRDF lookup table, baked on the GPU or on the CPU
//! - Skybox, G-buffer debug overlay and an egui text overlay on top of the
//!   deferred result
//! - A headless recording backend for testing pass ordering without a GPU

pub mod backend;
pub mod egui_integration;
pub mod error;
pub mod framebuffer;
pub mod ibl;
pub mod pipeline;
pub mod render_graph;
pub mod renderer;
pub mod resources;
pub mod scene;
pub mod window;

pub use backend::wgpu_backend::WgpuBackend;
pub use backend::RecordingBackend;
pub use egui_integration::EguiOverlay;
pub use error::{RendererError, RendererResult};
pub use pipeline::{DebugView, ForwardExtra, LightingSettings};
pub use renderer::{DeferredRenderer, FrameContext, FrameStatus, RendererConfig};
pub use window::Window;
