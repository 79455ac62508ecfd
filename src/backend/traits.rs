//! Backend interface: handles, descriptors and the [`GraphicsBackend`] trait

use crate::backend::types::*;
use crate::render_graph::ResourceAccess;
use bitflags::bitflags;
use thiserror::Error;

/// Errors raised by a [`GraphicsBackend`]
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("no usable GPU adapter: {0}")]
    InitializationFailed(String),
    #[error("cannot present to the window: {0}")]
    SurfaceCreationFailed(String),
    #[error("device request rejected: {0}")]
    DeviceCreationFailed(String),
    #[error("swapchain image unavailable: {0}")]
    AcquireImageFailed(String),
    #[error("buffer allocation failed: {0}")]
    BufferCreationFailed(String),
    #[error("texture allocation failed: {0}")]
    TextureCreationFailed(String),
    #[error("render pipeline rejected: {0}")]
    PipelineCreationFailed(String),
    #[error("{kind} handle {id} does not name a live object")]
    InvalidHandle { kind: &'static str, id: u64 },
    /// The surface must be reconfigured before the next frame
    #[error("surface lost")]
    SurfaceLost,
    #[error("GPU out of memory")]
    OutOfMemory,
}

pub type BackendResult<T> = Result<T, BackendError>;

macro_rules! handles {
    ($($(#[$doc:meta])* $name:ident;)*) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub struct $name(pub(crate) u64);
        )*
    };
}

// Opaque ids into a backend's object tables
handles! {
    BufferHandle;
    TextureHandle;
    /// A subresource range of a texture, or the current swapchain image
    TextureViewHandle;
    SamplerHandle;
    RenderPipelineHandle;
    BindGroupHandle;
    BindGroupLayoutHandle;
}

/// Resource bound at one binding index
#[derive(Debug, Clone)]
pub enum BindGroupEntry {
    Buffer {
        buffer: BufferHandle,
        offset: u64,
        size: Option<u64>,
    },
    Texture(TextureViewHandle),
    Sampler(SamplerHandle),
}

/// One binding slot of a bind group layout
#[derive(Debug, Clone)]
pub struct BindGroupLayoutEntry {
    pub binding: u32,
    pub visibility: ShaderStageFlags,
    pub ty: BindingType,
}

impl BindGroupLayoutEntry {
    pub fn uniform(binding: u32, visibility: ShaderStageFlags) -> Self {
        Self {
            binding,
            visibility,
            ty: BindingType::UniformBuffer,
        }
    }

    pub fn texture(binding: u32, view_dimension: TextureViewDimension) -> Self {
        Self {
            binding,
            visibility: ShaderStageFlags::FRAGMENT,
            ty: BindingType::Texture { view_dimension },
        }
    }

    pub fn sampler(binding: u32) -> Self {
        Self {
            binding,
            visibility: ShaderStageFlags::FRAGMENT,
            ty: BindingType::Sampler,
        }
    }
}

bitflags! {
    /// Shader stages a binding is visible to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStageFlags: u32 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
        const VERTEX_FRAGMENT = Self::VERTEX.bits() | Self::FRAGMENT.bits();
    }
}

/// Binding type. Textures are filterable float, samplers filtering.
#[derive(Debug, Clone)]
pub enum BindingType {
    UniformBuffer,
    Texture { view_dimension: TextureViewDimension },
    Sampler,
}

/// Vertex and fragment stages share one WGSL module. Primitives are
/// triangle lists with counter-clockwise front faces.
#[derive(Debug, Clone)]
pub struct RenderPipelineDescriptor {
    pub label: Option<String>,
    pub shader: String,
    pub vertex_entry: String,
    pub fragment_entry: Option<String>,
    pub vertex_layouts: Vec<VertexBufferLayout>,
    pub bind_group_layouts: Vec<BindGroupLayoutHandle>,
    pub cull_mode: CullMode,
    pub depth_stencil: Option<DepthStencilState>,
    pub color_targets: Vec<ColorTargetState>,
}

impl RenderPipelineDescriptor {
    /// Descriptor with `vs_main`/`fs_main` entry points and no depth state.
    pub fn new(label: &str, shader: &str) -> Self {
        Self {
            label: Some(label.to_string()),
            shader: shader.to_string(),
            vertex_entry: "vs_main".into(),
            fragment_entry: Some("fs_main".into()),
            vertex_layouts: Vec::new(),
            bind_group_layouts: Vec::new(),
            cull_mode: CullMode::None,
            depth_stencil: None,
            color_targets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DepthStencilState {
    pub format: TextureFormat,
    pub depth_write_enabled: bool,
    pub depth_compare: CompareFunction,
}

/// Colour target written without blending
#[derive(Debug, Clone)]
pub struct ColorTargetState {
    pub format: TextureFormat,
}

impl ColorTargetState {
    pub fn opaque(format: TextureFormat) -> Self {
        Self { format }
    }
}

/// Colour target of a render pass
#[derive(Debug, Clone)]
pub struct ColorAttachment {
    pub view: TextureViewHandle,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOp {
    Clear([f32; 4]),
    Load,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Store,
    Discard,
}

/// Depth target of a render pass; stencil is never used
#[derive(Debug, Clone)]
pub struct DepthStencilAttachment {
    pub view: TextureViewHandle,
    pub depth_load_op: LoadOp,
    pub depth_store_op: StoreOp,
    pub depth_clear_value: f32,
}

#[derive(Debug, Clone)]
pub struct RenderPassDescriptor {
    pub label: Option<String>,
    pub color_attachments: Vec<ColorAttachment>,
    pub depth_stencil_attachment: Option<DepthStencilAttachment>,
}

/// Subresource addressed by a texture upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureWrite {
    pub mip_level: u32,
    pub array_layer: u32,
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: u32,
}

/// Swapchain target returned when beginning a frame
#[derive(Debug, Clone, Copy)]
pub struct FrameTarget {
    pub swapchain_view: TextureViewHandle,
    pub width: u32,
    pub height: u32,
}

/// The GPU operations the renderer and the IBL baker are written against.
///
/// Implemented by [`WgpuBackend`](crate::backend::wgpu_backend::WgpuBackend)
/// and by [`RecordingBackend`](crate::backend::RecordingBackend), which logs
/// calls instead of executing them. Work is recorded into an implicit command
/// stream that `end_frame` or `submit` flushes.
pub trait GraphicsBackend {
    // Surface and frame lifecycle

    /// Reconfigure the swapchain; zero sizes are ignored
    fn resize(&mut self, width: u32, height: u32);

    /// Swapchain size after clamping to device limits
    fn surface_size(&self) -> (u32, u32);

    fn max_texture_dimension(&self) -> u32;

    /// Acquire the next swapchain image
    fn begin_frame(&mut self) -> BackendResult<FrameTarget>;

    /// Submit the frame's work and present
    fn end_frame(&mut self) -> BackendResult<()>;

    /// Throw away the frame's work and release the swapchain image without presenting
    fn discard_frame(&mut self);

    /// Flush work recorded outside a frame, such as uploads and IBL bakes
    fn submit(&mut self);

    fn swapchain_format(&self) -> TextureFormat;

    // Resources

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;

    fn create_buffer_init(&mut self, desc: &BufferDescriptor, data: &[u8])
        -> BackendResult<BufferHandle>;

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]);

    /// Fails when an edge is zero or above [`max_texture_dimension`](Self::max_texture_dimension)
    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    fn create_texture_view(
        &mut self,
        texture: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle>;

    /// Upload tightly described rows into one (mip, layer) of a texture
    fn write_texture(&mut self, texture: TextureHandle, region: &TextureWrite, data: &[u8]);

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle>;

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle>;

    /// Bind resources against `layout`, keyed by binding index
    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle>;

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle>;

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Views created from the texture become invalid with it. Passes that
    /// use the texture must be submitted first.
    fn destroy_texture(&mut self, texture: TextureHandle);

    fn destroy_texture_view(&mut self, view: TextureViewHandle);

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle);

    // Render passes. State set between begin and end applies to that pass only.

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor);

    fn end_render_pass(&mut self);

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle);

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle);

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64);

    /// Indices are always `u32`
    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64);

    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32);

    fn draw(&mut self, vertices: std::ops::Range<u32>, instances: std::ops::Range<u32>);

    fn draw_indexed(&mut self, indices: std::ops::Range<u32>, instances: std::ops::Range<u32>);

    // Transfers and synchronisation

    /// Copy mip 0 between two textures of the same format, outside any pass
    fn copy_texture_to_texture(
        &mut self,
        src: TextureHandle,
        dst: TextureHandle,
        width: u32,
        height: u32,
    );

    /// Declare that a texture moves from one kind of access to another.
    ///
    /// wgpu tracks hazards itself and ignores this.
    fn transition_texture(
        &mut self,
        _texture: TextureHandle,
        _from: ResourceAccess,
        _to: ResourceAccess,
    ) {
    }
}
