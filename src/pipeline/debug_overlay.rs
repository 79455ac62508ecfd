//! Picture-in-picture view of one G-buffer attachment

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::DeferredResources;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use crate::resources::{GpuMesh, Mesh};
use bytemuck::{Pod, Zeroable};
use glam::Vec2;
use std::any::Any;

/// Lower and upper NDC bound of the overlay square, on both axes
pub const OVERLAY_NDC_RANGE: (f32, f32) = (0.25, 0.9375);

/// Which attachment the overlay shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugView {
    #[default]
    Off,
    Position,
    Normal,
    Albedo,
}

impl DebugView {
    pub const ALL: [DebugView; 4] = [
        DebugView::Off,
        DebugView::Position,
        DebugView::Normal,
        DebugView::Albedo,
    ];

    /// Cycle to the next view, wrapping back to `Off`
    pub fn next(self) -> Self {
        let index = Self::ALL.iter().position(|&v| v == self).unwrap_or(0);
        Self::ALL[(index + 1) % Self::ALL.len()]
    }

    fn shader_mode(self) -> u32 {
        self as u32
    }
}

/// Where a full-screen quad corner lands inside the overlay square
pub fn overlay_position(corner: Vec2) -> Vec2 {
    let (lo, hi) = OVERLAY_NDC_RANGE;
    Vec2::splat(lo) + (corner * 0.5 + 0.5) * (hi - lo)
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct OverlayUniform {
    mode: u32,
    _pad: [u32; 3],
}

pub struct DebugOverlayPass {
    resources: DeferredResources,
    view: DebugView,
    pipeline: RenderPipelineHandle,
    quad: GpuMesh,
    layout: BindGroupLayoutHandle,
    sampler: SamplerHandle,
    uniform_buffer: BufferHandle,
    bind_group: Option<([TextureViewHandle; 3], BindGroupHandle)>,
}

impl DebugOverlayPass {
    pub fn new<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        resources: DeferredResources,
        target_format: TextureFormat,
    ) -> BackendResult<Self> {
        let quad = Mesh::quad().upload(backend)?;
        let layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry::uniform(0, ShaderStageFlags::FRAGMENT),
            BindGroupLayoutEntry::texture(1, TextureViewDimension::D2),
            BindGroupLayoutEntry::texture(2, TextureViewDimension::D2),
            BindGroupLayoutEntry::texture(3, TextureViewDimension::D2),
            BindGroupLayoutEntry::sampler(4),
        ])?;
        let sampler = backend.create_sampler(&SamplerDescriptor::nearest("Debug Overlay Sampler"))?;
        let uniform_buffer = backend.create_buffer(&BufferDescriptor {
            label: Some("Debug Overlay Uniform".into()),
            size: std::mem::size_of::<OverlayUniform>() as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            mapped_at_creation: false,
        })?;

        let mut desc = RenderPipelineDescriptor::new("Debug Overlay", DEBUG_OVERLAY_SHADER);
        desc.vertex_layouts = vec![Vertex::layout()];
        desc.bind_group_layouts = vec![layout];
        desc.color_targets = vec![ColorTargetState::opaque(target_format)];
        let pipeline = backend.create_render_pipeline(&desc)?;

        Ok(Self {
            resources,
            view: DebugView::Off,
            pipeline,
            quad,
            layout,
            sampler,
            uniform_buffer,
            bind_group: None,
        })
    }

    pub fn view(&self) -> DebugView {
        self.view
    }

    pub fn set_view(&mut self, view: DebugView) {
        if view != self.view {
            log::debug!("Debug overlay: {:?}", view);
        }
        self.view = view;
    }

    fn bind_group<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        views: [TextureViewHandle; 3],
    ) -> BackendResult<BindGroupHandle> {
        if let Some((cached, group)) = self.bind_group {
            if cached == views {
                return Ok(group);
            }
        }
        let group = backend.create_bind_group(
            self.layout,
            &[
                (
                    0,
                    BindGroupEntry::Buffer {
                        buffer: self.uniform_buffer,
                        offset: 0,
                        size: None,
                    },
                ),
                (1, BindGroupEntry::Texture(views[0])),
                (2, BindGroupEntry::Texture(views[1])),
                (3, BindGroupEntry::Texture(views[2])),
                (4, BindGroupEntry::Sampler(self.sampler)),
            ],
        )?;
        self.bind_group = Some((views, group));
        Ok(group)
    }
}

impl<B: GraphicsBackend> RenderPass<B> for DebugOverlayPass {
    fn name(&self) -> &str {
        "Debug Overlay"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        for source in self.resources.gbuffer_colors() {
            ctx.read(source, ResourceAccess::ShaderRead);
        }
        ctx.write(self.resources.swapchain, ResourceAccess::RenderTarget);
    }

    fn execute(&mut self, ctx: &mut PassExecuteContext<B>) -> BackendResult<()> {
        if self.view == DebugView::Off {
            return Ok(());
        }

        let [position, normal, albedo] = self.resources.gbuffer_colors();
        let views = [ctx.view(position)?, ctx.view(normal)?, ctx.view(albedo)?];
        let target = ctx.view(self.resources.swapchain)?;
        let group = self.bind_group(&mut *ctx.backend, views)?;

        let uniform = OverlayUniform {
            mode: self.view.shader_mode(),
            _pad: [0; 3],
        };
        ctx.backend
            .write_buffer(self.uniform_buffer, 0, bytemuck::bytes_of(&uniform));

        ctx.backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Debug Overlay".into()),
            color_attachments: vec![ColorAttachment {
                view: target,
                load_op: LoadOp::Load,
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: None,
        });
        ctx.backend
            .set_viewport(0.0, 0.0, ctx.frame.width as f32, ctx.frame.height as f32);
        ctx.backend.set_render_pipeline(self.pipeline);
        ctx.backend.set_bind_group(0, group);
        self.quad.draw(&mut *ctx.backend);
        ctx.backend.end_render_pass();
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub const DEBUG_OVERLAY_SHADER: &str = r#"
const RANGE_LO: f32 = 0.25;
const RANGE_HI: f32 = 0.9375;

struct OverlayUniform {
    mode: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@group(0) @binding(0) var<uniform> overlay: OverlayUniform;
@group(0) @binding(1) var gbuffer_position: texture_2d<f32>;
@group(0) @binding(2) var gbuffer_normal: texture_2d<f32>;
@group(0) @binding(3) var gbuffer_albedo: texture_2d<f32>;
@group(0) @binding(4) var gbuffer_sampler: sampler;

@vertex
fn vs_main(@location(0) position: vec3<f32>, @location(2) uv: vec2<f32>) -> VertexOutput {
    var output: VertexOutput;
    let corner = RANGE_LO + (position.xy * 0.5 + 0.5) * (RANGE_HI - RANGE_LO);
    output.clip_position = vec4<f32>(corner, 0.0, 1.0);
    output.uv = uv;
    return output;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    var color = vec3<f32>(0.0);
    switch overlay.mode {
        case 1u: {
            let p = textureSampleLevel(gbuffer_position, gbuffer_sampler, input.uv, 0.0).xyz;
            color = clamp(p * 0.5 + 0.5, vec3<f32>(0.0), vec3<f32>(1.0));
        }
        case 2u: {
            let n = textureSampleLevel(gbuffer_normal, gbuffer_sampler, input.uv, 0.0).xyz;
            color = n * 0.5 + 0.5;
        }
        case 3u: {
            color = textureSampleLevel(gbuffer_albedo, gbuffer_sampler, input.uv, 0.0).rgb;
        }
        default: {}
    }
    return vec4<f32>(color, 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::shader_validation::validate;

    #[test]
    fn test_debug_overlay_shader_validates() {
        validate(DEBUG_OVERLAY_SHADER);
    }

    #[test]
    fn test_quad_corners_map_to_overlay_square() {
        assert_eq!(overlay_position(Vec2::new(-1.0, -1.0)), Vec2::splat(0.25));
        assert_eq!(overlay_position(Vec2::new(1.0, 1.0)), Vec2::splat(0.9375));
    }

    #[test]
    fn test_view_cycle_wraps() {
        let mut view = DebugView::Off;
        for _ in 0..DebugView::ALL.len() {
            view = view.next();
        }
        assert_eq!(view, DebugView::Off);
        assert_eq!(DebugView::Off.next(), DebugView::Position);
    }
}
