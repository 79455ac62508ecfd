//! GPU bake of the IBL products and upload of CPU-baked ones.

use super::capture::CubeFaceCameras;
use super::irradiance::irradiance_source_lod;
use super::prefilter::mip_roughness;
use super::shaders;
use super::{CpuIbl, EquirectImage, IblConfig, IblError, IblProductSet};
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::framebuffer::{Framebuffer, FramebufferBuilder, SurfaceDescriptor};
use crate::render_graph::ResourceAccess;
use crate::resources::Mesh;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use half::f16;

/// Format of every baked cubemap
pub const CUBEMAP_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
/// Format of the BRDF lookup table
pub const BRDF_LUT_FORMAT: TextureFormat = TextureFormat::Rg16Float;
const CAPTURE_DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct FaceUniform {
    view_proj: Mat4,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
struct CaptureParams {
    roughness: f32,
    source_size: f32,
    sample_delta: f32,
    source_lod: f32,
    sample_count: u32,
    _pad: [u32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct BrdfParams {
    sample_count: u32,
    _pad: [u32; 3],
}

/// A cubemap on the GPU with a sampling view over all faces and mips
#[derive(Debug, Clone, Copy)]
pub struct GpuCubemap {
    pub texture: TextureHandle,
    pub view: TextureViewHandle,
    pub size: u32,
    pub mip_levels: u32,
}

/// A 2D texture on the GPU
#[derive(Debug, Clone, Copy)]
pub struct GpuTexture2d {
    pub texture: TextureHandle,
    pub view: TextureViewHandle,
    pub width: u32,
    pub height: u32,
}

pub type GpuIblProducts = IblProductSet<GpuCubemap, GpuTexture2d>;

/// Everything the renderer samples for image-based lighting
#[derive(Debug, Clone, Copy)]
pub struct BakedIbl {
    pub environment: GpuCubemap,
    pub products: GpuIblProducts,
    /// Trilinear clamp-to-edge sampler for all of the above
    pub sampler: SamplerHandle,
    pub max_reflection_lod: f32,
}

impl BakedIbl {
    pub fn destroy<B: GraphicsBackend + ?Sized>(self, backend: &mut B) {
        backend.destroy_texture(self.environment.texture);
        backend.destroy_texture(self.products.irradiance.texture);
        backend.destroy_texture(self.products.prefilter.texture);
        backend.destroy_texture(self.products.brdf_lut.texture);
    }
}

fn create_ibl_sampler<B: GraphicsBackend + ?Sized>(backend: &mut B) -> BackendResult<SamplerHandle> {
    backend.create_sampler(&SamplerDescriptor::linear("IBL Sampler"))
}

fn create_cubemap<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    label: &str,
    size: u32,
    mip_levels: u32,
    usage: TextureUsage,
) -> BackendResult<GpuCubemap> {
    let texture = backend.create_texture(&TextureDescriptor::cube(
        label,
        size,
        mip_levels,
        CUBEMAP_FORMAT,
        usage,
    ))?;
    let view = backend.create_texture_view(texture, &TextureViewDescriptor::cube())?;
    Ok(GpuCubemap {
        texture,
        view,
        size,
        mip_levels,
    })
}

/// Objects one bake needs only until its work is submitted
#[derive(Debug, Default)]
struct BakeScratch {
    textures: Vec<TextureHandle>,
    views: Vec<TextureViewHandle>,
    bind_groups: Vec<BindGroupHandle>,
    buffers: Vec<BufferHandle>,
}

impl BakeScratch {
    fn release<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) {
        for group in self.bind_groups.drain(..) {
            backend.destroy_bind_group(group);
        }
        for view in self.views.drain(..) {
            backend.destroy_texture_view(view);
        }
        for buffer in self.buffers.drain(..) {
            backend.destroy_buffer(buffer);
        }
        for texture in self.textures.drain(..) {
            backend.destroy_texture(texture);
        }
    }
}

/// Renders the precompute chain into GPU textures
pub struct IblBaker {
    config: IblConfig,
    cameras: CubeFaceCameras,
    capture: Framebuffer,
    cube_buffer: BufferHandle,
    cube_vertex_count: u32,
    sampler: SamplerHandle,

    equirect_layout: BindGroupLayoutHandle,
    cube_source_layout: BindGroupLayoutHandle,
    brdf_layout: BindGroupLayoutHandle,
    face_bind_groups: Vec<BindGroupHandle>,

    equirect_pipeline: RenderPipelineHandle,
    downsample_pipeline: RenderPipelineHandle,
    irradiance_pipeline: RenderPipelineHandle,
    prefilter_pipeline: RenderPipelineHandle,
    brdf_pipeline: RenderPipelineHandle,

    face_buffers: Vec<BufferHandle>,
    scratch: BakeScratch,
}

impl IblBaker {
    pub fn new<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        config: IblConfig,
    ) -> Result<Self, IblError> {
        config.validate()?;

        let capture = FramebufferBuilder::build(
            backend,
            &SurfaceDescriptor::capture(CAPTURE_DEPTH_FORMAT),
            config.environment_size,
            config.environment_size,
        )?;

        let cube = Mesh::cube();
        let cube_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some("Capture Cube".into()),
                size: (cube.vertices.len() * std::mem::size_of::<Vertex>()) as u64,
                usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
                mapped_at_creation: false,
            },
            bytemuck::cast_slice(&cube.vertices),
        )?;
        let sampler = create_ibl_sampler(backend)?;

        let face_layout =
            backend.create_bind_group_layout(&[BindGroupLayoutEntry::uniform(0, ShaderStageFlags::VERTEX)])?;
        let equirect_layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry::uniform(0, ShaderStageFlags::FRAGMENT),
            BindGroupLayoutEntry::texture(1, TextureViewDimension::D2),
            BindGroupLayoutEntry::sampler(2),
        ])?;
        let cube_source_layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry::uniform(0, ShaderStageFlags::FRAGMENT),
            BindGroupLayoutEntry::texture(1, TextureViewDimension::Cube),
            BindGroupLayoutEntry::sampler(2),
        ])?;
        let brdf_layout = backend
            .create_bind_group_layout(&[BindGroupLayoutEntry::uniform(0, ShaderStageFlags::FRAGMENT)])?;

        let cameras = CubeFaceCameras::new();
        let mut face_buffers = Vec::with_capacity(6);
        let mut face_bind_groups = Vec::with_capacity(6);
        for face in 0..6 {
            let uniform = FaceUniform {
                view_proj: cameras.view_projection(face),
            };
            let buffer = backend.create_buffer_init(
                &BufferDescriptor {
                    label: Some(format!("Capture Face {face}")),
                    size: std::mem::size_of::<FaceUniform>() as u64,
                    usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
                    mapped_at_creation: false,
                },
                bytemuck::bytes_of(&uniform),
            )?;
            face_buffers.push(buffer);
            face_bind_groups.push(backend.create_bind_group(
                face_layout,
                &[(
                    0,
                    BindGroupEntry::Buffer {
                        buffer,
                        offset: 0,
                        size: None,
                    },
                )],
            )?);
        }

        let capture_pipeline = |backend: &mut B,
                                label: &str,
                                shader: String,
                                source_layout: BindGroupLayoutHandle|
         -> BackendResult<RenderPipelineHandle> {
            let mut desc = RenderPipelineDescriptor::new(label, &shader);
            desc.vertex_layouts = vec![Vertex::layout()];
            desc.bind_group_layouts = vec![face_layout, source_layout];
            // The flipped projection reverses winding, so nothing is culled.
            desc.cull_mode = CullMode::None;
            desc.depth_stencil = Some(DepthStencilState {
                format: CAPTURE_DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: CompareFunction::LessEqual,
            });
            desc.color_targets = vec![ColorTargetState::opaque(CUBEMAP_FORMAT)];
            backend.create_render_pipeline(&desc)
        };

        let equirect_pipeline = capture_pipeline(
            backend,
            "IBL Equirect To Cube",
            shaders::capture_shader(shaders::EQUIRECT_FRAGMENT),
            equirect_layout,
        )?;
        let downsample_pipeline = capture_pipeline(
            backend,
            "IBL Environment Downsample",
            shaders::capture_shader(shaders::DOWNSAMPLE_FRAGMENT),
            cube_source_layout,
        )?;
        let irradiance_pipeline = capture_pipeline(
            backend,
            "IBL Irradiance",
            shaders::capture_shader(shaders::IRRADIANCE_FRAGMENT),
            cube_source_layout,
        )?;
        let prefilter_pipeline = capture_pipeline(
            backend,
            "IBL Prefilter",
            shaders::prefilter_shader(),
            cube_source_layout,
        )?;

        let mut brdf_desc = RenderPipelineDescriptor::new("IBL BRDF LUT", &shaders::brdf_shader());
        brdf_desc.bind_group_layouts = vec![brdf_layout];
        brdf_desc.color_targets = vec![ColorTargetState::opaque(BRDF_LUT_FORMAT)];
        let brdf_pipeline = backend.create_render_pipeline(&brdf_desc)?;

        Ok(Self {
            config,
            cameras,
            capture,
            cube_buffer,
            cube_vertex_count: cube.vertices.len() as u32,
            sampler,
            equirect_layout,
            cube_source_layout,
            brdf_layout,
            face_bind_groups,
            equirect_pipeline,
            downsample_pipeline,
            irradiance_pipeline,
            prefilter_pipeline,
            brdf_pipeline,
            face_buffers,
            scratch: BakeScratch::default(),
        })
    }

    pub fn config(&self) -> &IblConfig {
        &self.config
    }

    pub fn cameras(&self) -> &CubeFaceCameras {
        &self.cameras
    }

    /// Run conversion, mip generation, irradiance, prefilter and LUT passes and submit them
    pub fn bake<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        image: &EquirectImage,
    ) -> Result<BakedIbl, IblError> {
        let baked = self.record_bake(backend, image);
        backend.submit();
        self.scratch.release(backend);
        if baked.is_ok() {
            log::info!("IBL bake submitted");
        }
        baked
    }

    fn record_bake<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        image: &EquirectImage,
    ) -> Result<BakedIbl, IblError> {
        if image.texels().is_empty() {
            return Err(IblError::EmptyEnvironment);
        }
        let max = backend.max_texture_dimension();
        if image.width() > max || image.height() > max {
            return Err(IblError::InvalidConfig(format!(
                "{}x{} panorama exceeds the {max}px texture limit",
                image.width(),
                image.height()
            )));
        }

        let config = self.config;
        log::info!(
            "Baking IBL on GPU: {}x{} panorama -> {}px environment",
            image.width(),
            image.height(),
            config.environment_size
        );

        let panorama = self.upload_panorama(backend, image)?;
        self.scratch.textures.push(panorama.texture);

        // Environment cubemap
        let env_mips = config.environment_mip_levels();
        let environment = create_cubemap(
            backend,
            "IBL Environment",
            config.environment_size,
            env_mips,
            TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        )?;
        let equirect_group = self.source_group(
            backend,
            self.equirect_layout,
            panorama.view,
            CaptureParams::default(),
        )?;
        self.render_cube(
            backend,
            self.equirect_pipeline,
            equirect_group,
            environment.texture,
            0,
            config.environment_size,
        )?;

        log::debug!("Generating {} environment mips", env_mips);
        for mip in 1..env_mips {
            backend.transition_texture(
                environment.texture,
                ResourceAccess::RenderTarget,
                ResourceAccess::ShaderRead,
            );
            let source = backend.create_texture_view(
                environment.texture,
                &TextureViewDescriptor {
                    base_mip_level: mip - 1,
                    mip_level_count: Some(1),
                    ..TextureViewDescriptor::cube()
                },
            )?;
            self.scratch.views.push(source);
            let group = self.source_group(backend, self.cube_source_layout, source, CaptureParams::default())?;
            self.render_cube(
                backend,
                self.downsample_pipeline,
                group,
                environment.texture,
                mip,
                (config.environment_size >> mip).max(1),
            )?;
        }
        backend.transition_texture(
            environment.texture,
            ResourceAccess::RenderTarget,
            ResourceAccess::ShaderRead,
        );

        // Diffuse irradiance
        log::info!("Convolving irradiance cubemap ({}px)", config.irradiance_size);
        let irradiance = create_cubemap(
            backend,
            "IBL Irradiance",
            config.irradiance_size,
            1,
            TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
        )?;
        let irradiance_group = self.source_group(
            backend,
            self.cube_source_layout,
            environment.view,
            CaptureParams {
                source_size: config.environment_size as f32,
                sample_delta: config.irradiance_sample_delta,
                source_lod: irradiance_source_lod(
                    config.environment_size,
                    config.irradiance_sample_delta,
                ),
                ..Default::default()
            },
        )?;
        self.render_cube(
            backend,
            self.irradiance_pipeline,
            irradiance_group,
            irradiance.texture,
            0,
            config.irradiance_size,
        )?;

        // Specular prefilter, one roughness per mip
        log::info!(
            "Prefiltering specular cubemap ({}px, {} mips)",
            config.prefilter_size,
            config.prefilter_mip_levels
        );
        let prefilter = create_cubemap(
            backend,
            "IBL Prefilter",
            config.prefilter_size,
            config.prefilter_mip_levels,
            TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
        )?;
        for mip in 0..config.prefilter_mip_levels {
            let roughness = mip_roughness(mip, config.prefilter_mip_levels);
            let group = self.source_group(
                backend,
                self.cube_source_layout,
                environment.view,
                CaptureParams {
                    roughness,
                    source_size: config.environment_size as f32,
                    sample_count: config.prefilter_sample_count,
                    ..Default::default()
                },
            )?;
            self.render_cube(
                backend,
                self.prefilter_pipeline,
                group,
                prefilter.texture,
                mip,
                (config.prefilter_size >> mip).max(1),
            )?;
        }

        // BRDF lookup table
        log::info!("Integrating BRDF LUT ({}px)", config.brdf_lut_size);
        let brdf_lut = self.render_brdf_lut(backend)?;

        for texture in [irradiance.texture, prefilter.texture, brdf_lut.texture] {
            backend.transition_texture(texture, ResourceAccess::RenderTarget, ResourceAccess::ShaderRead);
        }

        Ok(BakedIbl {
            environment,
            products: IblProductSet {
                irradiance,
                prefilter,
                brdf_lut,
            },
            sampler: self.sampler,
            max_reflection_lod: config.max_reflection_lod(),
        })
    }

    /// Release the capture target, the per-face uniforms and the cube mesh
    pub fn destroy<B: GraphicsBackend + ?Sized>(mut self, backend: &mut B) {
        self.scratch.release(backend);
        self.capture.destroy(backend);
        backend.destroy_buffer(self.cube_buffer);
        for group in self.face_bind_groups {
            backend.destroy_bind_group(group);
        }
        for buffer in self.face_buffers {
            backend.destroy_buffer(buffer);
        }
    }

    fn upload_panorama<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        image: &EquirectImage,
    ) -> BackendResult<GpuTexture2d> {
        let texture = backend.create_texture(&TextureDescriptor {
            label: Some("IBL Panorama".into()),
            width: image.width(),
            height: image.height(),
            format: CUBEMAP_FORMAT,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
            ..Default::default()
        })?;
        let texels: Vec<[f16; 4]> = image
            .texels()
            .iter()
            .map(|c| [f16::from_f32(c.x), f16::from_f32(c.y), f16::from_f32(c.z), f16::ONE])
            .collect();
        backend.write_texture(
            texture,
            &TextureWrite {
                mip_level: 0,
                array_layer: 0,
                width: image.width(),
                height: image.height(),
                bytes_per_row: image.width() * CUBEMAP_FORMAT.bytes_per_pixel(),
            },
            bytemuck::cast_slice(&texels),
        );
        let view = backend.create_texture_view(texture, &TextureViewDescriptor::default())?;
        Ok(GpuTexture2d {
            texture,
            view,
            width: image.width(),
            height: image.height(),
        })
    }

    fn source_group<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        layout: BindGroupLayoutHandle,
        source: TextureViewHandle,
        params: CaptureParams,
    ) -> BackendResult<BindGroupHandle> {
        let buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some("Capture Params".into()),
                size: std::mem::size_of::<CaptureParams>() as u64,
                usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
                mapped_at_creation: false,
            },
            bytemuck::bytes_of(&params),
        )?;
        self.scratch.buffers.push(buffer);
        let group = backend.create_bind_group(
            layout,
            &[
                (
                    0,
                    BindGroupEntry::Buffer {
                        buffer,
                        offset: 0,
                        size: None,
                    },
                ),
                (1, BindGroupEntry::Texture(source)),
                (2, BindGroupEntry::Sampler(self.sampler)),
            ],
        )?;
        self.scratch.bind_groups.push(group);
        Ok(group)
    }

    /// Draw the capture cube once per face into `target` at `mip`
    fn render_cube<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        pipeline: RenderPipelineHandle,
        source_group: BindGroupHandle,
        target: TextureHandle,
        mip: u32,
        size: u32,
    ) -> Result<(), IblError> {
        if self.capture.size() != (size, size) {
            // Passes already recorded still use the old depth buffer
            backend.submit();
            self.capture.resize(backend, size, size)?;
        }
        let depth = self.capture.depth_attachment();

        for face in 0..6u32 {
            let view = backend.create_texture_view(target, &TextureViewDescriptor::cube_face(face, mip))?;
            self.scratch.views.push(view);
            backend.begin_render_pass(&RenderPassDescriptor {
                label: Some(format!("IBL Capture face {face} mip {mip}")),
                color_attachments: vec![ColorAttachment {
                    view,
                    load_op: LoadOp::Clear([0.0, 0.0, 0.0, 1.0]),
                    store_op: StoreOp::Store,
                }],
                depth_stencil_attachment: depth.clone(),
            });
            backend.set_viewport(0.0, 0.0, size as f32, size as f32);
            backend.set_render_pipeline(pipeline);
            backend.set_bind_group(0, self.face_bind_groups[face as usize]);
            backend.set_bind_group(1, source_group);
            backend.set_vertex_buffer(0, self.cube_buffer, 0);
            backend.draw(0..self.cube_vertex_count, 0..1);
            backend.end_render_pass();
        }
        Ok(())
    }

    fn render_brdf_lut<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
    ) -> BackendResult<GpuTexture2d> {
        let size = self.config.brdf_lut_size;
        let texture = backend.create_texture(&TextureDescriptor {
            label: Some("IBL BRDF LUT".into()),
            width: size,
            height: size,
            format: BRDF_LUT_FORMAT,
            usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
            ..Default::default()
        })?;
        let view = backend.create_texture_view(texture, &TextureViewDescriptor::default())?;

        let params = BrdfParams {
            sample_count: self.config.brdf_sample_count,
            _pad: [0; 3],
        };
        let buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some("BRDF Params".into()),
                size: std::mem::size_of::<BrdfParams>() as u64,
                usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
                mapped_at_creation: false,
            },
            bytemuck::bytes_of(&params),
        )?;
        self.scratch.buffers.push(buffer);
        let group = backend.create_bind_group(
            self.brdf_layout,
            &[(
                0,
                BindGroupEntry::Buffer {
                    buffer,
                    offset: 0,
                    size: None,
                },
            )],
        )?;
        self.scratch.bind_groups.push(group);

        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("IBL BRDF LUT".into()),
            color_attachments: vec![ColorAttachment {
                view,
                load_op: LoadOp::Clear([0.0; 4]),
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: None,
        });
        backend.set_viewport(0.0, 0.0, size as f32, size as f32);
        backend.set_render_pipeline(self.brdf_pipeline);
        backend.set_bind_group(0, group);
        backend.draw(0..3, 0..1);
        backend.end_render_pass();

        Ok(GpuTexture2d {
            texture,
            view,
            width: size,
            height: size,
        })
    }
}

fn upload_cube<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    label: &str,
    cube: &super::CpuCubemap,
) -> BackendResult<GpuCubemap> {
    let gpu = create_cubemap(
        backend,
        label,
        cube.size(),
        cube.mip_levels(),
        TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
    )?;
    for mip in 0..cube.mip_levels() {
        let size = cube.mip_size(mip);
        for face in 0..6 {
            backend.write_texture(
                gpu.texture,
                &TextureWrite {
                    mip_level: mip,
                    array_layer: face as u32,
                    width: size,
                    height: size,
                    bytes_per_row: size * CUBEMAP_FORMAT.bytes_per_pixel(),
                },
                &cube.face_rgba16f_bytes(face, mip),
            );
        }
    }
    Ok(gpu)
}

/// Upload products baked by [`super::bake_cpu`]
pub fn upload_cpu_products<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    ibl: &CpuIbl,
) -> Result<BakedIbl, IblError> {
    log::info!("Uploading CPU-baked IBL products");
    let environment = upload_cube(backend, "IBL Environment", &ibl.environment)?;
    let irradiance = upload_cube(backend, "IBL Irradiance", &ibl.products.irradiance)?;
    let prefilter = upload_cube(backend, "IBL Prefilter", &ibl.products.prefilter)?;

    let lut = &ibl.products.brdf_lut;
    let texture = backend.create_texture(&TextureDescriptor {
        label: Some("IBL BRDF LUT".into()),
        width: lut.size(),
        height: lut.size(),
        format: BRDF_LUT_FORMAT,
        usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        ..Default::default()
    })?;
    backend.write_texture(
        texture,
        &TextureWrite {
            mip_level: 0,
            array_layer: 0,
            width: lut.size(),
            height: lut.size(),
            bytes_per_row: lut.size() * BRDF_LUT_FORMAT.bytes_per_pixel(),
        },
        &lut.rg16f_bytes(),
    );
    let view = backend.create_texture_view(texture, &TextureViewDescriptor::default())?;

    Ok(BakedIbl {
        environment,
        products: IblProductSet {
            irradiance,
            prefilter,
            brdf_lut: GpuTexture2d {
                texture,
                view,
                width: lut.size(),
                height: lut.size(),
            },
        },
        sampler: create_ibl_sampler(backend)?,
        max_reflection_lod: (prefilter.mip_levels - 1) as f32,
    })
}
