//! Environment cubemap drawn behind the lit scene.
//!
//! The cube is projected with the camera's rotation only and its depth forced
//! to the far plane, so it only survives where the depth buffer is still clear.
//! Without an environment the pass draws nothing and the clear colour shows.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::ibl::BakedIbl;
use crate::pipeline::lighting_pass::LightingSettings;
use crate::pipeline::DeferredResources;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use crate::resources::Mesh;
use crate::scene::Camera;
use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4};
use std::any::Any;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct SkyboxUniform {
    view_proj: Mat4,
    exposure: f32,
    gamma: f32,
    lod: f32,
    _pad: f32,
}

/// View-projection with the translation stripped from the view
pub fn skybox_view_projection(camera: &Camera) -> Mat4 {
    let rotation = Mat4::from_mat3(Mat3::from_mat4(camera.view_matrix()));
    camera.projection_matrix() * rotation
}

pub struct SkyboxPass {
    resources: DeferredResources,
    settings: LightingSettings,
    /// Environment mip to show; 0 is the sharp panorama
    lod: f32,
    pipeline: RenderPipelineHandle,
    cube_buffer: BufferHandle,
    cube_vertex_count: u32,
    uniform_buffer: BufferHandle,
    bind_group: Option<BindGroupHandle>,
}

impl SkyboxPass {
    pub fn new<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        resources: DeferredResources,
        ibl: Option<&BakedIbl>,
        target_format: TextureFormat,
        depth_format: TextureFormat,
        settings: LightingSettings,
    ) -> BackendResult<Self> {
        let cube = Mesh::cube();
        let cube_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some("Skybox Cube".into()),
                size: cube.vertex_bytes().len() as u64,
                usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
                mapped_at_creation: false,
            },
            cube.vertex_bytes(),
        )?;

        let layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry::uniform(0, ShaderStageFlags::VERTEX_FRAGMENT),
            BindGroupLayoutEntry::texture(1, TextureViewDimension::Cube),
            BindGroupLayoutEntry::sampler(2),
        ])?;
        let uniform_buffer = backend.create_buffer(&BufferDescriptor {
            label: Some("Skybox Uniform".into()),
            size: std::mem::size_of::<SkyboxUniform>() as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            mapped_at_creation: false,
        })?;
        let bind_group = ibl
            .map(|ibl| {
                backend.create_bind_group(
                    layout,
                    &[
                        (
                            0,
                            BindGroupEntry::Buffer {
                                buffer: uniform_buffer,
                                offset: 0,
                                size: None,
                            },
                        ),
                        (1, BindGroupEntry::Texture(ibl.environment.view)),
                        (2, BindGroupEntry::Sampler(ibl.sampler)),
                    ],
                )
            })
            .transpose()?;

        let mut desc = RenderPipelineDescriptor::new("Skybox", SKYBOX_SHADER);
        desc.vertex_layouts = vec![Vertex::layout()];
        desc.bind_group_layouts = vec![layout];
        // Seen from inside
        desc.cull_mode = CullMode::None;
        desc.depth_stencil = Some(DepthStencilState {
            format: depth_format,
            depth_write_enabled: false,
            depth_compare: CompareFunction::LessEqual,
        });
        desc.color_targets = vec![ColorTargetState::opaque(target_format)];
        let pipeline = backend.create_render_pipeline(&desc)?;

        Ok(Self {
            resources,
            settings,
            lod: 0.0,
            pipeline,
            cube_buffer,
            cube_vertex_count: cube.vertex_count() as u32,
            uniform_buffer,
            bind_group,
        })
    }

    pub fn set_settings(&mut self, settings: LightingSettings) {
        self.settings = settings;
    }

    /// Show a blurrier environment mip behind the scene
    pub fn set_lod(&mut self, lod: f32) {
        self.lod = lod.max(0.0);
    }
}

impl<B: GraphicsBackend> RenderPass<B> for SkyboxPass {
    fn name(&self) -> &str {
        "Skybox"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.read(self.resources.scene_depth, ResourceAccess::DepthStencilRead);
        ctx.write(self.resources.swapchain, ResourceAccess::RenderTarget);
    }

    fn execute(&mut self, ctx: &mut PassExecuteContext<B>) -> BackendResult<()> {
        let Some(bind_group) = self.bind_group else {
            return Ok(());
        };
        let target = ctx.view(self.resources.swapchain)?;
        let depth = ctx.view(self.resources.scene_depth)?;

        let uniform = SkyboxUniform {
            view_proj: skybox_view_projection(&ctx.scene.camera),
            exposure: self.settings.exposure,
            gamma: self.settings.gamma,
            lod: self.lod,
            _pad: 0.0,
        };
        ctx.backend
            .write_buffer(self.uniform_buffer, 0, bytemuck::bytes_of(&uniform));

        ctx.backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Skybox".into()),
            color_attachments: vec![ColorAttachment {
                view: target,
                load_op: LoadOp::Load,
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: depth,
                depth_load_op: LoadOp::Load,
                depth_store_op: StoreOp::Store,
                depth_clear_value: 1.0,
            }),
        });
        ctx.backend
            .set_viewport(0.0, 0.0, ctx.frame.width as f32, ctx.frame.height as f32);
        ctx.backend.set_render_pipeline(self.pipeline);
        ctx.backend.set_bind_group(0, bind_group);
        ctx.backend.set_vertex_buffer(0, self.cube_buffer, 0);
        ctx.backend.draw(0..self.cube_vertex_count, 0..1);
        ctx.backend.end_render_pass();
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub const SKYBOX_SHADER: &str = r#"
struct SkyboxUniform {
    view_proj: mat4x4<f32>,
    exposure: f32,
    gamma: f32,
    lod: f32,
    _pad: f32,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) direction: vec3<f32>,
}

@group(0) @binding(0) var<uniform> skybox: SkyboxUniform;
@group(0) @binding(1) var environment_map: texture_cube<f32>;
@group(0) @binding(2) var environment_sampler: sampler;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> VertexOutput {
    var output: VertexOutput;
    output.direction = position;
    let clip = skybox.view_proj * vec4<f32>(position, 1.0);
    // z = w puts every fragment on the far plane
    output.clip_position = clip.xyww;
    return output;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    var color = textureSampleLevel(environment_map, environment_sampler, input.direction, skybox.lod).rgb;
    color = color * skybox.exposure;
    color = color / (color + vec3<f32>(1.0));
    color = pow(color, vec3<f32>(1.0 / skybox.gamma));
    return vec4<f32>(color, 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;
    use crate::ibl::{bake_cpu, upload_cpu_products, EquirectImage, IblConfig};
    use crate::pipeline::shader_validation::validate;
    use crate::render_graph::RenderGraph;
    use glam::{Vec3, Vec4};

    #[test]
    fn test_skybox_shader_validates() {
        validate(SKYBOX_SHADER);
    }

    #[test]
    fn test_uniform_size() {
        assert_eq!(std::mem::size_of::<SkyboxUniform>(), 80);
    }

    #[test]
    fn test_camera_translation_does_not_move_the_sky() {
        let mut near = Camera::new(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0));
        let mut far = Camera::new(Vec3::new(100.0, -20.0, 5.0), Vec3::new(100.0, -20.0, 4.0));
        near.aspect = 1.0;
        far.aspect = 1.0;

        let dir = Vec4::new(0.3, 0.2, -1.0, 1.0);
        let a = skybox_view_projection(&near) * dir;
        let b = skybox_view_projection(&far) * dir;
        assert!((a - b).abs().max_element() < 1e-4);
    }

    #[test]
    fn test_sky_depth_tests_against_blitted_depth_without_writing() {
        let mut backend = RecordingBackend::new(16, 16);
        let cpu = bake_cpu(&EquirectImage::from_fn(16, 8, |_| Vec3::ONE).unwrap(), &IblConfig::fast()).unwrap();
        let ibl = upload_cpu_products(&mut backend, &cpu).unwrap();
        let mut graph = RenderGraph::<RecordingBackend>::new();
        let resources = DeferredResources::import(&mut graph).unwrap();
        SkyboxPass::new(
            &mut backend,
            resources,
            Some(&ibl),
            TextureFormat::Bgra8UnormSrgb,
            TextureFormat::Depth32Float,
            LightingSettings::default(),
        )
        .unwrap();

        let pipeline = backend.pipeline_by_label("Skybox").unwrap();
        let depth = pipeline.depth_stencil.as_ref().unwrap();
        assert_eq!(depth.depth_compare, CompareFunction::LessEqual);
        assert!(!depth.depth_write_enabled);
        assert_eq!(depth.format, TextureFormat::Depth32Float);
    }
}
