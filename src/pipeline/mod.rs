//! Deferred rendering pipeline
//!
//! One frame runs these passes through the render graph:
//! 1. G-buffer pass - geometry into position/metallic, normal/roughness and albedo/ao targets
//! 2. Lighting pass - full-screen Cook-Torrance plus image-based lighting into the swapchain
//! 3. Depth blit - G-buffer depth copied into the presentation depth buffer
//! 4. Skybox - environment cubemap behind everything at the far plane
//! 5. Debug overlay - optional view of one G-buffer attachment
//!
//! Anything else drawn on top (text) goes through [`ForwardExtra`].

pub mod debug_overlay;
pub mod depth_blit;
pub mod gbuffer_pass;
pub mod lighting_pass;
pub mod shading;
pub mod skybox_pass;

pub use debug_overlay::{DebugOverlayPass, DebugView};
pub use depth_blit::DepthBlitPass;
pub use gbuffer_pass::GBufferPass;
pub use lighting_pass::{LightingPass, LightingSettings, MAX_POINT_LIGHTS};
pub use skybox_pass::SkyboxPass;

use crate::backend::traits::{BackendResult, FrameTarget, GraphicsBackend};
use crate::render_graph::{RenderGraph, RenderGraphError, ResourceId};
use crate::renderer::FrameContext;

/// Fullscreen triangle; `uv` is `(0, 0)` at the top-left of the target
pub const FULLSCREEN_VERTEX_SHADER: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    var output: VertexOutput;

    // Generate fullscreen triangle (3 vertices)
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    output.position = vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
    output.uv = vec2<f32>(x, 1.0 - y);

    return output;
}
"#;

/// Graph resources of the deferred pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredResources {
    pub position: ResourceId,
    pub normal: ResourceId,
    pub albedo: ResourceId,
    pub gbuffer_depth: ResourceId,
    /// Depth buffer used by passes drawing into the swapchain
    pub scene_depth: ResourceId,
    pub swapchain: ResourceId,
}

impl DeferredResources {
    /// Register every resource with `graph`
    pub fn import<B: GraphicsBackend>(graph: &mut RenderGraph<B>) -> Result<Self, RenderGraphError> {
        Ok(Self {
            position: graph.import_texture("gbuffer_position")?,
            normal: graph.import_texture("gbuffer_normal")?,
            albedo: graph.import_texture("gbuffer_albedo")?,
            gbuffer_depth: graph.import_texture("gbuffer_depth")?,
            scene_depth: graph.import_texture("scene_depth")?,
            swapchain: graph.import_swapchain("swapchain")?,
        })
    }

    /// G-buffer colour attachments in shader binding order
    pub fn gbuffer_colors(&self) -> [ResourceId; 3] {
        [self.position, self.normal, self.albedo]
    }
}

/// Extra forward drawing on top of the finished frame, e.g. a text overlay
pub trait ForwardExtra<B: GraphicsBackend> {
    fn name(&self) -> &str;

    /// Draw into the swapchain; existing content must be kept
    fn draw(&mut self, backend: &mut B, target: &FrameTarget, frame: &FrameContext) -> BackendResult<()>;
}
