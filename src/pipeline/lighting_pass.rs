//! Deferred lighting pass
//!
//! Full-screen triangle that reads the G-buffer texel under each pixel,
//! accumulates Cook-Torrance lighting from every point light plus the
//! split-sum IBL ambient term, then tone maps into the swapchain. Without IBL
//! products the ambient term is a flat fraction of the albedo.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::ibl::BakedIbl;
use crate::pipeline::{DeferredResources, FULLSCREEN_VERTEX_SHADER};
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use crate::scene::GpuPointLight;
use bytemuck::{Pod, Zeroable};
use glam::Vec4;
use std::any::Any;

/// Point lights the lighting uniform holds; extra scene lights are ignored
pub const MAX_POINT_LIGHTS: usize = 4;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct LightingUniform {
    camera_position: Vec4,
    lights: [GpuPointLight; MAX_POINT_LIGHTS],
    light_count: u32,
    max_reflection_lod: f32,
    exposure: f32,
    gamma: f32,
    /// Non-zero when real IBL products are bound
    ibl_enabled: u32,
    _pad: [u32; 3],
}

/// Output transform and background of the lighting pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightingSettings {
    pub exposure: f32,
    /// 1.0 when the target encodes sRGB itself
    pub gamma: f32,
    /// Colour left where no geometry was drawn
    pub clear_color: [f32; 4],
}

impl Default for LightingSettings {
    fn default() -> Self {
        Self {
            exposure: 1.0,
            gamma: 2.2,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl LightingSettings {
    /// Defaults with the gamma an output of `format` needs
    pub fn for_target(format: TextureFormat) -> Self {
        Self {
            gamma: if format.is_srgb() { 1.0 } else { 2.2 },
            ..Default::default()
        }
    }
}

/// Deferred lighting pass
pub struct LightingPass {
    resources: DeferredResources,
    settings: LightingSettings,
    /// `None` when the flat ambient stands in for IBL
    max_reflection_lod: Option<f32>,
    pipeline: RenderPipelineHandle,
    gbuffer_layout: BindGroupLayoutHandle,
    /// Rebuilt whenever the bound G-buffer views change (resize)
    gbuffer_group: Option<([TextureViewHandle; 3], BindGroupHandle)>,
    ibl_group: BindGroupHandle,
    uniform_buffer: BufferHandle,
    uniform_group: BindGroupHandle,
}

impl LightingPass {
    /// Without `ibl`, 1x1 placeholders fill the IBL bindings and the shader uses the flat ambient
    pub fn new<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        resources: DeferredResources,
        ibl: Option<&BakedIbl>,
        target_format: TextureFormat,
        settings: LightingSettings,
    ) -> BackendResult<Self> {
        let gbuffer_layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry::texture(0, TextureViewDimension::D2),
            BindGroupLayoutEntry::texture(1, TextureViewDimension::D2),
            BindGroupLayoutEntry::texture(2, TextureViewDimension::D2),
        ])?;
        let ibl_layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry::texture(0, TextureViewDimension::Cube),
            BindGroupLayoutEntry::texture(1, TextureViewDimension::Cube),
            BindGroupLayoutEntry::texture(2, TextureViewDimension::D2),
            BindGroupLayoutEntry::sampler(3),
        ])?;
        let uniform_layout = backend
            .create_bind_group_layout(&[BindGroupLayoutEntry::uniform(0, ShaderStageFlags::FRAGMENT)])?;

        let [irradiance, prefilter, brdf_lut, sampler] = match ibl {
            Some(ibl) => [
                BindGroupEntry::Texture(ibl.products.irradiance.view),
                BindGroupEntry::Texture(ibl.products.prefilter.view),
                BindGroupEntry::Texture(ibl.products.brdf_lut.view),
                BindGroupEntry::Sampler(ibl.sampler),
            ],
            None => {
                log::info!("No IBL products, lighting with a flat ambient term");
                placeholder_ibl_entries(backend)?
            }
        };
        let ibl_group = backend.create_bind_group(
            ibl_layout,
            &[(0, irradiance), (1, prefilter), (2, brdf_lut), (3, sampler)],
        )?;

        let uniform_buffer = backend.create_buffer(&BufferDescriptor {
            label: Some("Lighting Uniform".into()),
            size: std::mem::size_of::<LightingUniform>() as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            mapped_at_creation: false,
        })?;
        let uniform_group = backend.create_bind_group(
            uniform_layout,
            &[(
                0,
                BindGroupEntry::Buffer {
                    buffer: uniform_buffer,
                    offset: 0,
                    size: None,
                },
            )],
        )?;

        let shader = lighting_shader();
        let mut desc = RenderPipelineDescriptor::new("Deferred Lighting", &shader);
        desc.bind_group_layouts = vec![gbuffer_layout, ibl_layout, uniform_layout];
        desc.color_targets = vec![ColorTargetState::opaque(target_format)];
        let pipeline = backend.create_render_pipeline(&desc)?;

        Ok(Self {
            resources,
            settings,
            max_reflection_lod: ibl.map(|ibl| ibl.max_reflection_lod),
            pipeline,
            gbuffer_layout,
            gbuffer_group: None,
            ibl_group,
            uniform_buffer,
            uniform_group,
        })
    }

    pub fn settings(&self) -> &LightingSettings {
        &self.settings
    }

    pub fn has_ibl(&self) -> bool {
        self.max_reflection_lod.is_some()
    }

    pub fn set_settings(&mut self, settings: LightingSettings) {
        self.settings = settings;
    }

    fn gbuffer_group<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        views: [TextureViewHandle; 3],
    ) -> BackendResult<BindGroupHandle> {
        if let Some((cached, group)) = self.gbuffer_group {
            if cached == views {
                return Ok(group);
            }
        }
        log::debug!("Rebuilding lighting G-buffer bind group");
        let group = backend.create_bind_group(
            self.gbuffer_layout,
            &[
                (0, BindGroupEntry::Texture(views[0])),
                (1, BindGroupEntry::Texture(views[1])),
                (2, BindGroupEntry::Texture(views[2])),
            ],
        )?;
        self.gbuffer_group = Some((views, group));
        Ok(group)
    }
}

impl<B: GraphicsBackend> RenderPass<B> for LightingPass {
    fn name(&self) -> &str {
        "Deferred Lighting Pass"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        for source in self.resources.gbuffer_colors() {
            ctx.read(source, ResourceAccess::ShaderRead);
        }
        ctx.write(self.resources.swapchain, ResourceAccess::RenderTarget);
    }

    fn execute(&mut self, ctx: &mut PassExecuteContext<B>) -> BackendResult<()> {
        let [position, normal, albedo] = self.resources.gbuffer_colors();
        let views = [ctx.view(position)?, ctx.view(normal)?, ctx.view(albedo)?];
        let target = ctx.view(self.resources.swapchain)?;
        let gbuffer_group = self.gbuffer_group(&mut *ctx.backend, views)?;

        let scene = ctx.scene;
        if scene.lights.len() > MAX_POINT_LIGHTS {
            log::debug!(
                "Scene has {} point lights, shading the first {}",
                scene.lights.len(),
                MAX_POINT_LIGHTS
            );
        }
        let mut lights = [GpuPointLight::default(); MAX_POINT_LIGHTS];
        for (slot, light) in lights.iter_mut().zip(&scene.lights) {
            *slot = light.to_gpu_data();
        }
        let uniform = LightingUniform {
            camera_position: scene.camera.position.extend(1.0),
            lights,
            light_count: scene.lights.len().min(MAX_POINT_LIGHTS) as u32,
            max_reflection_lod: self.max_reflection_lod.unwrap_or(0.0),
            exposure: self.settings.exposure,
            gamma: self.settings.gamma,
            ibl_enabled: self.has_ibl() as u32,
            _pad: [0; 3],
        };
        ctx.backend
            .write_buffer(self.uniform_buffer, 0, bytemuck::bytes_of(&uniform));

        ctx.backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Deferred Lighting Pass".into()),
            color_attachments: vec![ColorAttachment {
                view: target,
                load_op: LoadOp::Clear(self.settings.clear_color),
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: None,
        });
        ctx.backend
            .set_viewport(0.0, 0.0, ctx.frame.width as f32, ctx.frame.height as f32);
        ctx.backend.set_render_pipeline(self.pipeline);
        ctx.backend.set_bind_group(0, gbuffer_group);
        ctx.backend.set_bind_group(1, self.ibl_group);
        ctx.backend.set_bind_group(2, self.uniform_group);
        ctx.backend.draw(0..3, 0..1);
        ctx.backend.end_render_pass();
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Black 1x1 cube and LUT bound in place of IBL products
fn placeholder_ibl_entries<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
) -> BackendResult<[BindGroupEntry; 4]> {
    let cube = backend.create_texture(&TextureDescriptor::cube(
        "IBL Placeholder Cube",
        1,
        1,
        TextureFormat::Rgba16Float,
        TextureUsage::TEXTURE_BINDING,
    ))?;
    let cube_view = backend.create_texture_view(cube, &TextureViewDescriptor::cube())?;
    let lut = backend.create_texture(&TextureDescriptor {
        label: Some("IBL Placeholder LUT".into()),
        format: TextureFormat::Rg16Float,
        usage: TextureUsage::TEXTURE_BINDING,
        ..Default::default()
    })?;
    let lut_view = backend.create_texture_view(lut, &TextureViewDescriptor::default())?;
    let sampler = backend.create_sampler(&SamplerDescriptor::linear("IBL Placeholder Sampler"))?;
    Ok([
        BindGroupEntry::Texture(cube_view),
        BindGroupEntry::Texture(cube_view),
        BindGroupEntry::Texture(lut_view),
        BindGroupEntry::Sampler(sampler),
    ])
}

/// Deferred lighting fragment stage
pub const LIGHTING_FRAGMENT: &str = r#"
const PI: f32 = 3.14159265359;
const MAX_POINT_LIGHTS: u32 = 4u;
const FALLBACK_AMBIENT: f32 = 0.03;

struct PointLight {
    position: vec4<f32>,
    color: vec4<f32>,
}

struct LightingUniform {
    camera_position: vec4<f32>,
    lights: array<PointLight, 4>,
    light_count: u32,
    max_reflection_lod: f32,
    exposure: f32,
    gamma: f32,
    ibl_enabled: u32,
}

@group(0) @binding(0) var gbuffer_position: texture_2d<f32>;
@group(0) @binding(1) var gbuffer_normal: texture_2d<f32>;
@group(0) @binding(2) var gbuffer_albedo: texture_2d<f32>;

@group(1) @binding(0) var irradiance_map: texture_cube<f32>;
@group(1) @binding(1) var prefilter_map: texture_cube<f32>;
@group(1) @binding(2) var brdf_lut: texture_2d<f32>;
@group(1) @binding(3) var ibl_sampler: sampler;

@group(2) @binding(0) var<uniform> lighting: LightingUniform;

fn distribution_ggx(n_dot_h: f32, roughness: f32) -> f32 {
    let a = roughness * roughness;
    let a2 = a * a;
    let denom = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
    return a2 / max(PI * denom * denom, 1e-7);
}

fn geometry_schlick_ggx(n_dot_x: f32, roughness: f32) -> f32 {
    let r = roughness + 1.0;
    let k = r * r / 8.0;
    return n_dot_x / (n_dot_x * (1.0 - k) + k);
}

fn geometry_smith(n_dot_v: f32, n_dot_l: f32, roughness: f32) -> f32 {
    return geometry_schlick_ggx(n_dot_v, roughness) * geometry_schlick_ggx(n_dot_l, roughness);
}

fn fresnel_schlick(cos_theta: f32, f0: vec3<f32>) -> vec3<f32> {
    return f0 + (1.0 - f0) * pow(clamp(1.0 - cos_theta, 0.0, 1.0), 5.0);
}

fn fresnel_schlick_roughness(cos_theta: f32, f0: vec3<f32>, roughness: f32) -> vec3<f32> {
    return f0 + (max(vec3<f32>(1.0 - roughness), f0) - f0) * pow(clamp(1.0 - cos_theta, 0.0, 1.0), 5.0);
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let coord = vec2<i32>(floor(input.position.xy));
    let position_metallic = textureLoad(gbuffer_position, coord, 0);
    let normal_roughness = textureLoad(gbuffer_normal, coord, 0);
    let albedo_ao = textureLoad(gbuffer_albedo, coord, 0);

    // Background keeps the clear colour
    if dot(normal_roughness.xyz, normal_roughness.xyz) < 1e-6 {
        discard;
    }

    let world_pos = position_metallic.xyz;
    let metallic = position_metallic.a;
    let roughness = normal_roughness.a;
    let albedo = albedo_ao.rgb;
    let ao = albedo_ao.a;

    let n = normalize(normal_roughness.xyz);
    let v = normalize(lighting.camera_position.xyz - world_pos);
    let n_dot_v = max(dot(n, v), 0.0);
    let f0 = mix(vec3<f32>(0.04), albedo, metallic);

    var lo = vec3<f32>(0.0);
    let count = min(lighting.light_count, MAX_POINT_LIGHTS);
    for (var i = 0u; i < count; i = i + 1u) {
        let light = lighting.lights[i];
        let to_light = light.position.xyz - world_pos;
        let dist = length(to_light);
        if dist <= 1e-6 {
            continue;
        }
        let l = to_light / dist;
        let n_dot_l = dot(n, l);
        if n_dot_l <= 0.0 {
            continue;
        }
        let h = normalize(v + l);
        let radiance = light.color.rgb / (dist * dist);

        let ndf = distribution_ggx(max(dot(n, h), 0.0), roughness);
        let g = geometry_smith(n_dot_v, n_dot_l, roughness);
        let f = fresnel_schlick(max(dot(h, v), 0.0), f0);

        let specular = ndf * g * f / (4.0 * n_dot_v * n_dot_l + 0.0001);
        let kd = (vec3<f32>(1.0) - f) * (1.0 - metallic);
        lo += (kd * albedo / PI + specular) * radiance * n_dot_l;
    }

    var ambient = vec3<f32>(FALLBACK_AMBIENT) * albedo * ao;
    if lighting.ibl_enabled != 0u {
        // Split-sum ambient
        let ks = fresnel_schlick_roughness(n_dot_v, f0, roughness);
        let kd = (vec3<f32>(1.0) - ks) * (1.0 - metallic);
        let irradiance = textureSampleLevel(irradiance_map, ibl_sampler, n, 0.0).rgb;
        let diffuse = irradiance * albedo;

        let r = reflect(-v, n);
        let prefiltered = textureSampleLevel(prefilter_map, ibl_sampler, r, roughness * lighting.max_reflection_lod).rgb;
        let brdf = textureSampleLevel(brdf_lut, ibl_sampler, vec2<f32>(n_dot_v, roughness), 0.0).rg;
        let specular = prefiltered * (ks * brdf.x + brdf.y);
        ambient = (kd * diffuse + specular) * ao;
    }

    var color = (lo + ambient) * lighting.exposure;
    color = color / (color + vec3<f32>(1.0));
    color = pow(color, vec3<f32>(1.0 / lighting.gamma));
    return vec4<f32>(color, 1.0);
}
"#;

pub fn lighting_shader() -> String {
    [FULLSCREEN_VERTEX_SHADER, LIGHTING_FRAGMENT].concat()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;
    use crate::ibl::{bake_cpu, upload_cpu_products, EquirectImage, IblConfig};
    use crate::pipeline::shader_validation::validate;
    use crate::render_graph::RenderGraph;
    use glam::Vec3;

    fn baked(backend: &mut RecordingBackend) -> BakedIbl {
        let image = EquirectImage::from_fn(16, 8, |_| Vec3::splat(0.5)).unwrap();
        let cpu = bake_cpu(&image, &IblConfig::fast()).unwrap();
        upload_cpu_products(backend, &cpu).unwrap()
    }

    #[test]
    fn test_lighting_shader_validates() {
        validate(&lighting_shader());
    }

    #[test]
    fn test_uniform_layout_matches_wgsl() {
        assert_eq!(std::mem::size_of::<GpuPointLight>(), 32);
        assert_eq!(std::mem::size_of::<LightingUniform>(), 16 + 32 * MAX_POINT_LIGHTS + 32);
    }

    #[test]
    fn test_srgb_target_skips_manual_gamma() {
        assert_eq!(LightingSettings::for_target(TextureFormat::Bgra8UnormSrgb).gamma, 1.0);
        assert_eq!(LightingSettings::for_target(TextureFormat::Bgra8Unorm).gamma, 2.2);
    }

    #[test]
    fn test_gbuffer_bind_group_follows_bound_views() {
        let mut backend = RecordingBackend::new(16, 16);
        let ibl = baked(&mut backend);
        let mut graph = RenderGraph::<RecordingBackend>::new();
        let resources = DeferredResources::import(&mut graph).unwrap();
        let mut pass = LightingPass::new(
            &mut backend,
            resources,
            Some(&ibl),
            TextureFormat::Bgra8UnormSrgb,
            LightingSettings::default(),
        )
        .unwrap();

        let mut views = Vec::new();
        for _ in 0..6 {
            let texture = backend.create_texture(&TextureDescriptor::default()).unwrap();
            views.push(
                backend
                    .create_texture_view(texture, &TextureViewDescriptor::default())
                    .unwrap(),
            );
        }
        let first = [views[0], views[1], views[2]];
        let resized = [views[3], views[4], views[5]];

        let a = pass.gbuffer_group(&mut backend, first).unwrap();
        let b = pass.gbuffer_group(&mut backend, first).unwrap();
        let c = pass.gbuffer_group(&mut backend, resized).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_lighting_pass_reads_gbuffer_without_depth() {
        let mut backend = RecordingBackend::new(16, 16);
        let ibl = baked(&mut backend);
        let mut graph = RenderGraph::<RecordingBackend>::new();
        let resources = DeferredResources::import(&mut graph).unwrap();
        let pass = LightingPass::new(
            &mut backend,
            resources,
            Some(&ibl),
            TextureFormat::Bgra8UnormSrgb,
            LightingSettings::default(),
        )
        .unwrap();
        let id = graph.add_pass(pass);
        let node = graph.get_pass_node(id).unwrap();
        assert_eq!(node.reads.len(), 3);
        assert!(node.writes_resource(resources.swapchain));

        let pipeline = backend.pipeline_by_label("Deferred Lighting").unwrap();
        assert!(pipeline.depth_stencil.is_none());
        assert!(pipeline.vertex_layouts.is_empty());
    }

    #[test]
    fn test_missing_ibl_binds_placeholders() {
        let mut backend = RecordingBackend::new(16, 16);
        let mut graph = RenderGraph::<RecordingBackend>::new();
        let resources = DeferredResources::import(&mut graph).unwrap();
        let pass = LightingPass::new(
            &mut backend,
            resources,
            None,
            TextureFormat::Bgra8UnormSrgb,
            LightingSettings::default(),
        )
        .unwrap();
        assert!(!pass.has_ibl());
        assert_eq!(backend.live_texture_count(), 2);
        assert!(LIGHTING_FRAGMENT.contains("vec3<f32>(FALLBACK_AMBIENT) * albedo * ao"));
        assert!(LIGHTING_FRAGMENT.contains(&format!("const FALLBACK_AMBIENT: f32 = {:?};", crate::pipeline::shading::FALLBACK_AMBIENT)));
    }
}
