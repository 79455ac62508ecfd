//! wgpu backend implementation

mod convert;
mod pass;
mod resources;

use crate::backend::traits::*;
use crate::backend::types::*;
use convert::ToWgpu;
use pass::{PassOp, RecordedPass};
use resources::{AcquiredFrame, Resources, StoredView};
use std::sync::Arc;
use wgpu::util::DeviceExt;

/// wgpu backend presenting to a winit window
pub struct WgpuBackend {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    format: TextureFormat,
    frame: Option<AcquiredFrame>,
    resources: Resources,
    // Created lazily so uploads and bakes can record work outside a frame
    encoder: Option<wgpu::CommandEncoder>,
    recording: Option<RecordedPass>,
}

fn new_encoder(device: &wgpu::Device) -> wgpu::CommandEncoder {
    device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Frame Encoder"),
    })
}

/// Scale `width`x`height` down uniformly until neither edge exceeds `max`
fn fit_to_limit(width: u32, height: u32, max: u32) -> (u32, u32) {
    let (width, height) = (width.max(1), height.max(1));
    if width <= max && height <= max {
        return (width, height);
    }
    let scale = (max as f32 / width as f32).min(max as f32 / height as f32);
    (
        ((width as f32 * scale) as u32).clamp(1, max),
        ((height as f32 * scale) as u32).clamp(1, max),
    )
}

impl WgpuBackend {
    /// Create a backend presenting to `window`
    pub fn new(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self> {
        pollster::block_on(Self::new_async(window, vsync))
    }

    pub async fn new_async(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::util::backend_bits_from_env().unwrap_or_else(wgpu::Backends::all),
            ..Default::default()
        });
        let surface = instance
            .create_surface(window)
            .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| BackendError::InitializationFailed("No suitable adapter found".into()))?;
        let info = adapter.get_info();
        log::info!("Selected GPU: {} ({:?} backend)", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Deferred PBR Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;
        device.on_uncaptured_error(Box::new(|error| {
            log::error!("wgpu error: {}", error);
        }));

        let caps = surface.get_capabilities(&adapter);
        // Prefer an sRGB format so the lighting pass can skip its own gamma curve
        let supported: Vec<(wgpu::TextureFormat, TextureFormat)> = caps
            .formats
            .iter()
            .filter_map(|&f| convert::surface_format(f).map(|ours| (f, ours)))
            .collect();
        let (wgpu_format, format) = supported
            .iter()
            .copied()
            .find(|(_, ours)| ours.is_srgb())
            .or_else(|| supported.first().copied())
            .ok_or_else(|| {
                BackendError::SurfaceCreationFailed(format!(
                    "no supported swapchain format among {:?}",
                    caps.formats
                ))
            })?;

        let max = device.limits().max_texture_dimension_2d;
        let (width, height) = fit_to_limit(size.width, size.height, max);
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: wgpu_format,
            width,
            height,
            present_mode: if vsync {
                wgpu::PresentMode::AutoVsync
            } else {
                wgpu::PresentMode::AutoNoVsync
            },
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        log::debug!("Surface configured: {}x{} {:?}", width, height, wgpu_format);

        Ok(Self {
            surface,
            device,
            queue,
            config,
            format,
            frame: None,
            resources: Resources::new(),
            encoder: None,
            recording: None,
        })
    }

    fn take_encoder(&mut self) -> wgpu::CommandEncoder {
        match self.encoder.take() {
            Some(encoder) => encoder,
            None => new_encoder(&self.device),
        }
    }

    fn record(&mut self, op: PassOp) {
        match &mut self.recording {
            Some(pass) => pass.ops.push(op),
            None => log::warn!("{:?} recorded outside of a render pass", op),
        }
    }
}

impl GraphicsBackend for WgpuBackend {
    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let (width, height) = fit_to_limit(width, height, self.max_texture_dimension());
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    fn begin_frame(&mut self) -> BackendResult<FrameTarget> {
        let texture = self.surface.get_current_texture().map_err(|e| match e {
            wgpu::SurfaceError::Lost => BackendError::SurfaceLost,
            wgpu::SurfaceError::OutOfMemory => BackendError::OutOfMemory,
            other => BackendError::AcquireImageFailed(other.to_string()),
        })?;
        let view = texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let view_id = self.resources.views.reserve();
        self.frame = Some(AcquiredFrame {
            view,
            texture,
            view_id,
        });

        Ok(FrameTarget {
            swapchain_view: TextureViewHandle(view_id),
            width: self.config.width,
            height: self.config.height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        self.submit();
        if let Some(AcquiredFrame { texture, view, .. }) = self.frame.take() {
            drop(view);
            texture.present();
        }
        Ok(())
    }

    fn discard_frame(&mut self) {
        self.recording = None;
        self.encoder = None;
        self.frame = None;
    }

    fn submit(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(Some(encoder.finish()));
        }
    }

    fn swapchain_format(&self) -> TextureFormat {
        self.format
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label.as_deref(),
            size: desc.size,
            usage: desc.usage.to_wgpu(),
            mapped_at_creation: desc.mapped_at_creation,
        });
        Ok(BufferHandle(self.resources.buffers.insert(buffer)))
    }

    fn create_buffer_init(&mut self, desc: &BufferDescriptor, data: &[u8]) -> BackendResult<BufferHandle> {
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: desc.label.as_deref(),
                contents: data,
                usage: desc.usage.to_wgpu(),
            });
        Ok(BufferHandle(self.resources.buffers.insert(buffer)))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        match self.resources.buffers.get(buffer.0) {
            Ok(target) => self.queue.write_buffer(target, offset, data),
            Err(err) => log::warn!("write_buffer: {}", err),
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let max = self.max_texture_dimension();
        let fits = |edge: u32| (1..=max).contains(&edge);
        if !fits(desc.width) || !fits(desc.height) {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: size {}x{} outside of 1..={}",
                desc.label, desc.width, desc.height, max
            )));
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.array_layers,
            },
            mip_level_count: desc.mip_levels,
            sample_count: 1,
            // Cubemaps are 2D arrays of six layers
            dimension: wgpu::TextureDimension::D2,
            format: desc.format.to_wgpu(),
            usage: desc.usage.to_wgpu(),
            view_formats: &[],
        });
        Ok(TextureHandle(self.resources.textures.insert(texture)))
    }

    fn create_texture_view(
        &mut self,
        texture: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle> {
        let view = self
            .resources
            .textures
            .get(texture.0)?
            .create_view(&wgpu::TextureViewDescriptor {
                dimension: Some(desc.dimension.to_wgpu()),
                base_mip_level: desc.base_mip_level,
                mip_level_count: desc.mip_level_count,
                base_array_layer: desc.base_array_layer,
                array_layer_count: desc.array_layer_count,
                ..Default::default()
            });
        let id = self.resources.views.insert(StoredView {
            texture: texture.0,
            view,
        });
        Ok(TextureViewHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, region: &TextureWrite, data: &[u8]) {
        let target = match self.resources.textures.get(texture.0) {
            Ok(target) => target,
            Err(err) => {
                log::warn!("write_texture: {}", err);
                return;
            }
        };
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: target,
                mip_level: region.mip_level,
                origin: wgpu::Origin3d {
                    x: 0,
                    y: 0,
                    z: region.array_layer,
                },
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(region.bytes_per_row),
                rows_per_image: Some(region.height),
            },
            wgpu::Extent3d {
                width: region.width,
                height: region.height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: desc.label.as_deref(),
            ..desc.to_wgpu()
        });
        Ok(SamplerHandle(self.resources.samplers.insert(sampler)))
    }

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        let entries: Vec<_> = entries.iter().map(ToWgpu::to_wgpu).collect();
        let layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: None,
                entries: &entries,
            });
        Ok(BindGroupLayoutHandle(self.resources.layouts.insert(layout)))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        let res = &self.resources;
        let entries = entries
            .iter()
            .map(|(binding, entry)| -> BackendResult<wgpu::BindGroupEntry> {
                let resource = match entry {
                    BindGroupEntry::Buffer { buffer, offset, size } => {
                        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: res.buffers.get(buffer.0)?,
                            offset: *offset,
                            size: size.and_then(wgpu::BufferSize::new),
                        })
                    }
                    BindGroupEntry::Texture(view) => {
                        wgpu::BindingResource::TextureView(&res.views.get(view.0)?.view)
                    }
                    BindGroupEntry::Sampler(sampler) => {
                        wgpu::BindingResource::Sampler(res.samplers.get(sampler.0)?)
                    }
                };
                Ok(wgpu::BindGroupEntry {
                    binding: *binding,
                    resource,
                })
            })
            .collect::<BackendResult<Vec<_>>>()?;

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: res.layouts.get(layout.0)?,
            entries: &entries,
        });
        Ok(BindGroupHandle(self.resources.bind_groups.insert(bind_group)))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        let layouts = desc
            .bind_group_layouts
            .iter()
            .map(|handle| self.resources.layouts.get(handle.0))
            .collect::<BackendResult<Vec<_>>>()?;
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: desc.label.as_deref(),
                bind_group_layouts: &layouts,
                push_constant_ranges: &[],
            });

        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: desc.label.as_deref(),
                source: wgpu::ShaderSource::Wgsl(desc.shader.as_str().into()),
            });

        // Attribute storage has to outlive the layouts that point into it
        let attributes: Vec<Vec<wgpu::VertexAttribute>> =
            desc.vertex_layouts.iter().map(ToWgpu::to_wgpu).collect();
        let buffers: Vec<wgpu::VertexBufferLayout> = desc
            .vertex_layouts
            .iter()
            .zip(&attributes)
            .map(|(layout, attributes)| wgpu::VertexBufferLayout {
                array_stride: layout.array_stride,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes,
            })
            .collect();
        let targets: Vec<_> = desc.color_targets.iter().map(ToWgpu::to_wgpu).collect();

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: desc.label.as_deref(),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: &desc.vertex_entry,
                    buffers: &buffers,
                    compilation_options: Default::default(),
                },
                fragment: desc
                    .fragment_entry
                    .as_deref()
                    .map(|entry_point| wgpu::FragmentState {
                        module: &module,
                        entry_point,
                        targets: &targets,
                        compilation_options: Default::default(),
                    }),
                primitive: wgpu::PrimitiveState {
                    cull_mode: desc.cull_mode.to_wgpu(),
                    ..Default::default()
                },
                depth_stencil: desc.depth_stencil.as_ref().map(ToWgpu::to_wgpu),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            });
        Ok(RenderPipelineHandle(self.resources.pipelines.insert(pipeline)))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        if let Some(open) = self.recording.replace(RecordedPass::new(desc)) {
            log::warn!("Render pass {:?} was never ended and is dropped", open.desc.label);
        }
    }

    fn end_render_pass(&mut self) {
        let Some(recorded) = self.recording.take() else {
            log::warn!("end_render_pass without a matching begin_render_pass");
            return;
        };
        let mut encoder = self.take_encoder();
        if let Err(err) = recorded.encode(&mut encoder, &self.resources, self.frame.as_ref()) {
            log::error!("Render pass {:?} skipped: {}", recorded.desc.label, err);
        }
        self.encoder = Some(encoder);
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.record(PassOp::Pipeline(pipeline));
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        self.record(PassOp::BindGroup(index, bind_group));
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        self.record(PassOp::VertexBuffer(slot, buffer, offset));
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64) {
        self.record(PassOp::IndexBuffer(buffer, offset));
    }

    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32) {
        self.record(PassOp::Viewport { x, y, width, height });
    }

    fn draw(&mut self, vertices: std::ops::Range<u32>, instances: std::ops::Range<u32>) {
        self.record(PassOp::Draw(vertices, instances));
    }

    fn draw_indexed(&mut self, indices: std::ops::Range<u32>, instances: std::ops::Range<u32>) {
        self.record(PassOp::DrawIndexed(indices, instances));
    }

    fn copy_texture_to_texture(&mut self, src: TextureHandle, dst: TextureHandle, width: u32, height: u32) {
        let textures = &self.resources.textures;
        let (src_texture, dst_texture) = match (textures.get(src.0), textures.get(dst.0)) {
            (Ok(src), Ok(dst)) => (src, dst),
            (Err(err), _) | (_, Err(err)) => {
                log::warn!("copy_texture_to_texture: {}", err);
                return;
            }
        };
        let whole = |texture| wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        };
        self.encoder
            .get_or_insert_with(|| new_encoder(&self.device))
            .copy_texture_to_texture(
                whole(src_texture),
                whole(dst_texture),
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            );
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(buffer) = self.resources.buffers.remove(buffer.0) {
            buffer.destroy();
        }
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(texture) = self.resources.remove_texture(texture) {
            texture.destroy();
        }
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        self.resources.views.remove(view.0);
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        self.resources.bind_groups.remove(bind_group.0);
    }
}

// Raw access for the egui text overlay
impl WgpuBackend {
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Swapchain format as the wgpu type egui-wgpu expects
    pub fn wgpu_surface_format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    /// Device, queue and the frame encoder borrowed together for egui texture uploads
    pub fn device_queue_encoder(&mut self) -> (&wgpu::Device, &wgpu::Queue, &mut wgpu::CommandEncoder) {
        let encoder = self
            .encoder
            .get_or_insert_with(|| new_encoder(&self.device));
        (&self.device, &self.queue, encoder)
    }

    /// Draw egui primitives over whatever `target` already holds
    pub fn render_egui(
        &mut self,
        renderer: &egui_wgpu::Renderer,
        paint_jobs: &[egui::ClippedPrimitive],
        screen_descriptor: &egui_wgpu::ScreenDescriptor,
        target: TextureViewHandle,
    ) {
        let mut encoder = self.take_encoder();
        match self.resources.view(self.frame.as_ref(), target) {
            Ok(view) => {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("egui Pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                renderer.render(&mut pass, paint_jobs, screen_descriptor);
            }
            Err(err) => log::warn!("egui overlay skipped: {}", err),
        }
        self.encoder = Some(encoder);
    }
}
