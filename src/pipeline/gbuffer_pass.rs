//! G-Buffer generation pass for deferred rendering
//!
//! Renders every scene item to multiple render targets (MRT):
//! - World-space position, metallic in alpha
//! - Perturbed world-space normal, roughness in alpha
//! - Albedo, ambient occlusion in alpha
//! - Depth buffer

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::DeferredResources;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use crate::resources::PbrMaterial;
use std::any::Any;

/// G-buffer colour formats in attachment order
pub const GBUFFER_COLOR_FORMATS: [TextureFormat; 3] = [
    TextureFormat::Rgba16Float,
    TextureFormat::Rgba16Float,
    TextureFormat::Rgba8Unorm,
];
pub const GBUFFER_DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// Per-draw object uniform and its bind group
#[derive(Debug, Clone, Copy)]
struct ObjectSlot {
    buffer: BufferHandle,
    bind_group: BindGroupHandle,
}

/// G-Buffer generation pass for deferred rendering
pub struct GBufferPass {
    resources: DeferredResources,
    pipeline: RenderPipelineHandle,
    camera_buffer: BufferHandle,
    camera_bind_group: BindGroupHandle,
    object_layout: BindGroupLayoutHandle,
    material_layout: BindGroupLayoutHandle,
    /// Grown on demand; a uniform buffer is written once per submit, so
    /// every draw gets its own.
    objects: Vec<ObjectSlot>,
}

impl GBufferPass {
    pub fn new<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        resources: DeferredResources,
    ) -> BackendResult<Self> {
        let camera_layout = backend.create_bind_group_layout(&[BindGroupLayoutEntry::uniform(
            0,
            ShaderStageFlags::VERTEX_FRAGMENT,
        )])?;
        let object_layout = backend
            .create_bind_group_layout(&[BindGroupLayoutEntry::uniform(0, ShaderStageFlags::VERTEX)])?;
        let material_layout = backend.create_bind_group_layout(&PbrMaterial::bind_group_layout_entries())?;

        let camera_buffer = backend.create_buffer(&BufferDescriptor {
            label: Some("G-Buffer Camera".into()),
            size: std::mem::size_of::<CameraUniform>() as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            mapped_at_creation: false,
        })?;
        let camera_bind_group = backend.create_bind_group(
            camera_layout,
            &[(
                0,
                BindGroupEntry::Buffer {
                    buffer: camera_buffer,
                    offset: 0,
                    size: None,
                },
            )],
        )?;

        let mut desc = RenderPipelineDescriptor::new("G-Buffer", GBUFFER_SHADER);
        desc.vertex_layouts = vec![Vertex::layout()];
        desc.bind_group_layouts = vec![camera_layout, object_layout, material_layout];
        desc.cull_mode = CullMode::Back;
        desc.depth_stencil = Some(DepthStencilState {
            format: GBUFFER_DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: CompareFunction::Less,
        });
        desc.color_targets = GBUFFER_COLOR_FORMATS
            .iter()
            .map(|&format| ColorTargetState::opaque(format))
            .collect();
        let pipeline = backend.create_render_pipeline(&desc)?;

        Ok(Self {
            resources,
            pipeline,
            camera_buffer,
            camera_bind_group,
            object_layout,
            material_layout,
            objects: Vec::new(),
        })
    }

    /// Layout every [`PbrMaterial`] drawn by this pass must be created with
    pub fn material_layout(&self) -> BindGroupLayoutHandle {
        self.material_layout
    }

    /// Number of per-draw uniform slots allocated so far
    pub fn object_capacity(&self) -> usize {
        self.objects.len()
    }

    fn object_slot<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        index: usize,
    ) -> BackendResult<ObjectSlot> {
        while self.objects.len() <= index {
            let buffer = backend.create_buffer(&BufferDescriptor {
                label: Some(format!("G-Buffer Object {}", self.objects.len())),
                size: std::mem::size_of::<ObjectUniform>() as u64,
                usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
                mapped_at_creation: false,
            })?;
            let bind_group = backend.create_bind_group(
                self.object_layout,
                &[(
                    0,
                    BindGroupEntry::Buffer {
                        buffer,
                        offset: 0,
                        size: None,
                    },
                )],
            )?;
            self.objects.push(ObjectSlot { buffer, bind_group });
        }
        Ok(self.objects[index])
    }
}

impl<B: GraphicsBackend> RenderPass<B> for GBufferPass {
    fn name(&self) -> &str {
        "G-Buffer Pass"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        for target in self.resources.gbuffer_colors() {
            ctx.write(target, ResourceAccess::RenderTarget);
        }
        ctx.write(self.resources.gbuffer_depth, ResourceAccess::DepthStencilWrite);
    }

    fn execute(&mut self, ctx: &mut PassExecuteContext<B>) -> BackendResult<()> {
        let mut color_attachments = Vec::with_capacity(3);
        for target in self.resources.gbuffer_colors() {
            color_attachments.push(ColorAttachment {
                view: ctx.view(target)?,
                load_op: LoadOp::Clear([0.0, 0.0, 0.0, 0.0]),
                store_op: StoreOp::Store,
            });
        }
        let depth_view = ctx.view(self.resources.gbuffer_depth)?;

        let scene = ctx.scene;
        ctx.backend
            .write_buffer(self.camera_buffer, 0, bytemuck::bytes_of(&scene.camera.uniform()));

        // Uniforms first, all draws read them after submit
        let mut slots = Vec::with_capacity(scene.items.len());
        for (index, item) in scene.items.iter().enumerate() {
            let slot = self.object_slot(&mut *ctx.backend, index)?;
            ctx.backend
                .write_buffer(slot.buffer, 0, bytemuck::bytes_of(&ObjectUniform::new(item.model)));
            slots.push(slot);
        }

        ctx.backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("G-Buffer Pass".into()),
            color_attachments,
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: depth_view,
                depth_load_op: LoadOp::Clear([1.0, 0.0, 0.0, 0.0]),
                depth_store_op: StoreOp::Store,
                depth_clear_value: 1.0,
            }),
        });
        ctx.backend
            .set_viewport(0.0, 0.0, ctx.frame.width as f32, ctx.frame.height as f32);
        ctx.backend.set_render_pipeline(self.pipeline);
        ctx.backend.set_bind_group(0, self.camera_bind_group);

        for (item, slot) in scene.items.iter().zip(&slots) {
            ctx.backend.set_bind_group(1, slot.bind_group);
            ctx.backend.set_bind_group(2, item.material);
            item.mesh.draw(&mut *ctx.backend);
        }

        ctx.backend.end_render_pass();
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// G-Buffer generation shader
pub const GBUFFER_SHADER: &str = r#"
struct CameraUniform {
    view: mat4x4<f32>,
    proj: mat4x4<f32>,
    view_proj: mat4x4<f32>,
    inv_view_proj: mat4x4<f32>,
    position: vec4<f32>,
}

struct ObjectUniform {
    model: mat4x4<f32>,
    normal_matrix: mat4x4<f32>,
}

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) tangent: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) world_normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) world_tangent: vec4<f32>,
}

struct GBufferOutput {
    @location(0) position: vec4<f32>,
    @location(1) normal: vec4<f32>,
    @location(2) albedo: vec4<f32>,
}

@group(0) @binding(0) var<uniform> camera: CameraUniform;
@group(1) @binding(0) var<uniform> object: ObjectUniform;

@group(2) @binding(0) var albedo_map: texture_2d<f32>;
@group(2) @binding(1) var normal_map: texture_2d<f32>;
@group(2) @binding(2) var metallic_map: texture_2d<f32>;
@group(2) @binding(3) var roughness_map: texture_2d<f32>;
@group(2) @binding(4) var ao_map: texture_2d<f32>;
@group(2) @binding(5) var material_sampler: sampler;

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var output: VertexOutput;
    let world_pos = object.model * vec4<f32>(input.position, 1.0);
    output.world_position = world_pos.xyz;
    output.clip_position = camera.view_proj * world_pos;
    output.world_normal = (object.normal_matrix * vec4<f32>(input.normal, 0.0)).xyz;
    output.world_tangent = vec4<f32>((object.model * vec4<f32>(input.tangent.xyz, 0.0)).xyz, input.tangent.w);
    output.uv = input.uv;
    return output;
}

// Tangent-space normal map sample to world space
fn perturb_normal(input: VertexOutput, tangent_normal: vec3<f32>) -> vec3<f32> {
    let n = normalize(input.world_normal);
    let t_raw = input.world_tangent.xyz - n * dot(n, input.world_tangent.xyz);
    if dot(t_raw, t_raw) < 1e-8 {
        return n;
    }
    let t = normalize(t_raw);
    let b = cross(n, t) * input.world_tangent.w;
    return normalize(mat3x3<f32>(t, b, n) * tangent_normal);
}

@fragment
fn fs_main(input: VertexOutput) -> GBufferOutput {
    var output: GBufferOutput;

    let albedo = textureSample(albedo_map, material_sampler, input.uv).rgb;
    let metallic = textureSample(metallic_map, material_sampler, input.uv).r;
    let roughness = textureSample(roughness_map, material_sampler, input.uv).r;
    let ao = textureSample(ao_map, material_sampler, input.uv).r;
    let tangent_normal = textureSample(normal_map, material_sampler, input.uv).xyz * 2.0 - 1.0;
    let normal = perturb_normal(input, tangent_normal);

    output.position = vec4<f32>(input.world_position, metallic);
    output.normal = vec4<f32>(normal, roughness);
    output.albedo = vec4<f32>(albedo, ao);
    return output;
}
"#;
