//! Descriptors, formats and uniform layouts shared by every backend

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};

/// Formats used by the G-buffer, the IBL textures, material maps and the swapchain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rg16Float,
    Rgba16Float,
    Depth32Float,
    Depth24Plus,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::Depth32Float | TextureFormat::Depth24Plus)
    }

    pub fn is_srgb(&self) -> bool {
        matches!(
            self,
            TextureFormat::Rgba8UnormSrgb | TextureFormat::Bgra8UnormSrgb
        )
    }

    /// Whether the format can be bound as a colour attachment.
    pub fn is_color_renderable(&self) -> bool {
        !self.is_depth()
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::Rg16Float
            | TextureFormat::Depth32Float
            | TextureFormat::Depth24Plus => 4,
            TextureFormat::Rgba16Float => 8,
        }
    }
}

bitflags! {
    /// How a texture may be used
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Source of a texture-to-texture copy (the G-buffer depth blit)
        const COPY_SRC = 1 << 0;
        /// Target of uploads and copies
        const COPY_DST = 1 << 1;
        /// Sampled from shaders
        const TEXTURE_BINDING = 1 << 2;
        /// Bound as a colour or depth attachment
        const RENDER_ATTACHMENT = 1 << 3;
    }
}

bitflags! {
    /// How a buffer may be used
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const COPY_DST = 1 << 0;
        const INDEX = 1 << 1;
        const VERTEX = 1 << 2;
        const UNIFORM = 1 << 3;
    }
}

/// Dimensionality of a texture allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureDimension {
    D2,
    /// Six array layers addressed as cube faces.
    Cube,
}

/// Texture allocation. Defaults to a sampled, uploadable 1x1 RGBA8 texture.
#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub array_layers: u32,
    pub mip_levels: u32,
    pub dimension: TextureDimension,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            width: 1,
            height: 1,
            array_layers: 1,
            mip_levels: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        }
    }
}

impl TextureDescriptor {
    /// A square cubemap with `mip_levels` levels.
    pub fn cube(
        label: &str,
        size: u32,
        mip_levels: u32,
        format: TextureFormat,
        usage: TextureUsage,
    ) -> Self {
        Self {
            label: Some(label.to_string()),
            width: size,
            height: size,
            array_layers: 6,
            mip_levels,
            dimension: TextureDimension::Cube,
            format,
            usage,
        }
    }

    /// Size of one mip level, never below one texel.
    pub fn mip_size(&self, level: u32) -> (u32, u32) {
        ((self.width >> level).max(1), (self.height >> level).max(1))
    }
}

/// How a texture view interprets its texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureViewDimension {
    D2,
    Cube,
}

/// Subresource range selected by a texture view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureViewDescriptor {
    pub dimension: TextureViewDimension,
    pub base_mip_level: u32,
    pub mip_level_count: Option<u32>,
    pub base_array_layer: u32,
    pub array_layer_count: Option<u32>,
}

impl Default for TextureViewDescriptor {
    fn default() -> Self {
        Self {
            dimension: TextureViewDimension::D2,
            base_mip_level: 0,
            mip_level_count: None,
            base_array_layer: 0,
            array_layer_count: None,
        }
    }
}

impl TextureViewDescriptor {
    /// All faces and mips of a cubemap, for sampling.
    pub fn cube() -> Self {
        Self {
            dimension: TextureViewDimension::Cube,
            array_layer_count: Some(6),
            ..Default::default()
        }
    }

    /// A single face at a single mip, usable as a render target.
    pub fn cube_face(face: u32, mip: u32) -> Self {
        Self {
            dimension: TextureViewDimension::D2,
            base_mip_level: mip,
            mip_level_count: Some(1),
            base_array_layer: face,
            array_layer_count: Some(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
    pub mapped_at_creation: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
}

impl VertexFormat {
    pub fn size(&self) -> u64 {
        match self {
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u64,
}

/// Per-vertex stream with attributes packed in location order
#[derive(Debug, Clone)]
pub struct VertexBufferLayout {
    pub array_stride: u64,
    pub attributes: Vec<VertexAttribute>,
}

/// Mesh vertex as laid out in vertex buffers and read by the G-buffer and IBL shaders
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    /// xyz tangent, w bitangent sign
    pub tangent: Vec4,
}

impl Vertex {
    /// Locations 0..=3 hold position, normal, uv and tangent
    pub fn layout() -> VertexBufferLayout {
        let formats = [
            VertexFormat::Float32x3,
            VertexFormat::Float32x3,
            VertexFormat::Float32x2,
            VertexFormat::Float32x4,
        ];
        let mut offset = 0;
        let attributes = formats
            .into_iter()
            .zip(0..)
            .map(|(format, location)| {
                let attribute = VertexAttribute {
                    location,
                    format,
                    offset,
                };
                offset += format.size();
                attribute
            })
            .collect();
        VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as u64,
            attributes,
        }
    }
}

/// Camera block shared by the G-buffer, skybox and lighting shaders
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraUniform {
    pub view: Mat4,
    pub proj: Mat4,
    pub view_proj: Mat4,
    pub inv_view_proj: Mat4,
    pub position: Vec4, // w unused
}

/// Per-draw transform block
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ObjectUniform {
    pub model: Mat4,
    pub normal_matrix: Mat4,
}

impl ObjectUniform {
    /// Builds the uniform with the inverse-transpose of the model's upper 3x3.
    pub fn new(model: Mat4) -> Self {
        let normal = Mat3::from_mat4(model).inverse().transpose();
        Self {
            model,
            normal_matrix: Mat4::from_mat3(normal),
        }
    }
}

/// Face culling for counter-clockwise front faces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    None,
    Back,
}

/// Compare function for depth tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareFunction {
    Less,
    LessEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    ClampToEdge,
    MirrorRepeat,
}

/// Sampler descriptor. The address mode applies to all three axes.
#[derive(Debug, Clone)]
pub struct SamplerDescriptor {
    pub label: Option<String>,
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub mipmap_filter: FilterMode,
    pub address_mode: AddressMode,
}

impl SamplerDescriptor {
    /// Trilinear filtering, clamped at the edges
    pub fn linear(label: &str) -> Self {
        Self {
            label: Some(label.to_string()),
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mipmap_filter: FilterMode::Linear,
            address_mode: AddressMode::ClampToEdge,
        }
    }

    /// Point sampling, clamped at the edges
    pub fn nearest(label: &str) -> Self {
        Self {
            mag_filter: FilterMode::Nearest,
            min_filter: FilterMode::Nearest,
            mipmap_filter: FilterMode::Nearest,
            ..Self::linear(label)
        }
    }

    /// Material map sampling: mirrored repeat, nearest magnification, trilinear minification.
    pub fn material() -> Self {
        Self {
            mag_filter: FilterMode::Nearest,
            address_mode: AddressMode::MirrorRepeat,
            ..Self::linear("Material Sampler")
        }
    }
}
