//! Mapping of backend descriptor types onto wgpu types

use crate::backend::traits::*;
use crate::backend::types::*;

pub(super) trait ToWgpu {
    type Target;

    fn to_wgpu(&self) -> Self::Target;
}

/// Collect the wgpu bits whose counterpart is set in `has`
fn flags<F: Copy, W: std::ops::BitOr<Output = W>>(
    table: &[(F, W)],
    has: impl Fn(F) -> bool,
    empty: W,
) -> W
where
    W: Copy,
{
    table
        .iter()
        .filter(|(ours, _)| has(*ours))
        .fold(empty, |acc, (_, theirs)| acc | *theirs)
}

impl ToWgpu for TextureFormat {
    type Target = wgpu::TextureFormat;

    fn to_wgpu(&self) -> wgpu::TextureFormat {
        use wgpu::TextureFormat as W;
        match self {
            TextureFormat::Rgba8Unorm => W::Rgba8Unorm,
            TextureFormat::Rgba8UnormSrgb => W::Rgba8UnormSrgb,
            TextureFormat::Bgra8Unorm => W::Bgra8Unorm,
            TextureFormat::Bgra8UnormSrgb => W::Bgra8UnormSrgb,
            TextureFormat::Rg16Float => W::Rg16Float,
            TextureFormat::Rgba16Float => W::Rgba16Float,
            TextureFormat::Depth32Float => W::Depth32Float,
            TextureFormat::Depth24Plus => W::Depth24Plus,
        }
    }
}

/// Swapchain formats the renderer can target
pub(super) fn surface_format(format: wgpu::TextureFormat) -> Option<TextureFormat> {
    [
        TextureFormat::Bgra8UnormSrgb,
        TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Bgra8Unorm,
        TextureFormat::Rgba8Unorm,
    ]
    .into_iter()
    .find(|ours| ours.to_wgpu() == format)
}

impl ToWgpu for BufferUsage {
    type Target = wgpu::BufferUsages;

    fn to_wgpu(&self) -> wgpu::BufferUsages {
        flags(
            &[
                (BufferUsage::COPY_DST, wgpu::BufferUsages::COPY_DST),
                (BufferUsage::INDEX, wgpu::BufferUsages::INDEX),
                (BufferUsage::VERTEX, wgpu::BufferUsages::VERTEX),
                (BufferUsage::UNIFORM, wgpu::BufferUsages::UNIFORM),
            ],
            |bit| self.contains(bit),
            wgpu::BufferUsages::empty(),
        )
    }
}

impl ToWgpu for TextureUsage {
    type Target = wgpu::TextureUsages;

    fn to_wgpu(&self) -> wgpu::TextureUsages {
        flags(
            &[
                (TextureUsage::COPY_SRC, wgpu::TextureUsages::COPY_SRC),
                (TextureUsage::COPY_DST, wgpu::TextureUsages::COPY_DST),
                (TextureUsage::TEXTURE_BINDING, wgpu::TextureUsages::TEXTURE_BINDING),
                (TextureUsage::RENDER_ATTACHMENT, wgpu::TextureUsages::RENDER_ATTACHMENT),
            ],
            |bit| self.contains(bit),
            wgpu::TextureUsages::empty(),
        )
    }
}

impl ToWgpu for ShaderStageFlags {
    type Target = wgpu::ShaderStages;

    fn to_wgpu(&self) -> wgpu::ShaderStages {
        flags(
            &[
                (ShaderStageFlags::VERTEX, wgpu::ShaderStages::VERTEX),
                (ShaderStageFlags::FRAGMENT, wgpu::ShaderStages::FRAGMENT),
            ],
            |bit| self.contains(bit),
            wgpu::ShaderStages::empty(),
        )
    }
}

impl ToWgpu for TextureViewDimension {
    type Target = wgpu::TextureViewDimension;

    fn to_wgpu(&self) -> wgpu::TextureViewDimension {
        match self {
            TextureViewDimension::D2 => wgpu::TextureViewDimension::D2,
            TextureViewDimension::Cube => wgpu::TextureViewDimension::Cube,
        }
    }
}

impl ToWgpu for BindingType {
    type Target = wgpu::BindingType;

    fn to_wgpu(&self) -> wgpu::BindingType {
        match self {
            BindingType::UniformBuffer => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            BindingType::Texture { view_dimension } => wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: view_dimension.to_wgpu(),
                multisampled: false,
            },
            BindingType::Sampler => wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        }
    }
}

impl ToWgpu for BindGroupLayoutEntry {
    type Target = wgpu::BindGroupLayoutEntry;

    fn to_wgpu(&self) -> wgpu::BindGroupLayoutEntry {
        wgpu::BindGroupLayoutEntry {
            binding: self.binding,
            visibility: self.visibility.to_wgpu(),
            ty: self.ty.to_wgpu(),
            count: None,
        }
    }
}

impl ToWgpu for VertexBufferLayout {
    type Target = Vec<wgpu::VertexAttribute>;

    /// Attributes only; the caller owns them while the layout borrows them.
    fn to_wgpu(&self) -> Vec<wgpu::VertexAttribute> {
        self.attributes
            .iter()
            .map(|attr| wgpu::VertexAttribute {
                format: match attr.format {
                    VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
                    VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
                    VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
                },
                offset: attr.offset,
                shader_location: attr.location,
            })
            .collect()
    }
}

impl ToWgpu for CullMode {
    type Target = Option<wgpu::Face>;

    fn to_wgpu(&self) -> Option<wgpu::Face> {
        match self {
            CullMode::None => None,
            CullMode::Back => Some(wgpu::Face::Back),
        }
    }
}

impl ToWgpu for DepthStencilState {
    type Target = wgpu::DepthStencilState;

    fn to_wgpu(&self) -> wgpu::DepthStencilState {
        wgpu::DepthStencilState {
            format: self.format.to_wgpu(),
            depth_write_enabled: self.depth_write_enabled,
            depth_compare: match self.depth_compare {
                CompareFunction::Less => wgpu::CompareFunction::Less,
                CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
            },
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }
    }
}

impl ToWgpu for ColorTargetState {
    type Target = Option<wgpu::ColorTargetState>;

    fn to_wgpu(&self) -> Option<wgpu::ColorTargetState> {
        Some(wgpu::ColorTargetState {
            format: self.format.to_wgpu(),
            blend: None,
            write_mask: wgpu::ColorWrites::ALL,
        })
    }
}

impl ToWgpu for SamplerDescriptor {
    type Target = wgpu::SamplerDescriptor<'static>;

    /// Label is left to the caller, which owns the string.
    fn to_wgpu(&self) -> wgpu::SamplerDescriptor<'static> {
        let filter = |mode: FilterMode| match mode {
            FilterMode::Nearest => wgpu::FilterMode::Nearest,
            FilterMode::Linear => wgpu::FilterMode::Linear,
        };
        let address = match self.address_mode {
            AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
            AddressMode::MirrorRepeat => wgpu::AddressMode::MirrorRepeat,
        };
        wgpu::SamplerDescriptor {
            label: None,
            address_mode_u: address,
            address_mode_v: address,
            address_mode_w: address,
            mag_filter: filter(self.mag_filter),
            min_filter: filter(self.min_filter),
            mipmap_filter: filter(self.mipmap_filter),
            ..Default::default()
        }
    }
}

impl ToWgpu for StoreOp {
    type Target = wgpu::StoreOp;

    fn to_wgpu(&self) -> wgpu::StoreOp {
        match self {
            StoreOp::Store => wgpu::StoreOp::Store,
            StoreOp::Discard => wgpu::StoreOp::Discard,
        }
    }
}

impl ToWgpu for ColorAttachment {
    type Target = wgpu::Operations<wgpu::Color>;

    fn to_wgpu(&self) -> wgpu::Operations<wgpu::Color> {
        let load = match self.load_op {
            LoadOp::Clear([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
                r: r as f64,
                g: g as f64,
                b: b as f64,
                a: a as f64,
            }),
            LoadOp::Load => wgpu::LoadOp::Load,
        };
        wgpu::Operations {
            load,
            store: self.store_op.to_wgpu(),
        }
    }
}

impl ToWgpu for DepthStencilAttachment {
    type Target = wgpu::Operations<f32>;

    /// Clears use `depth_clear_value`; the colour payload of the load op is ignored.
    fn to_wgpu(&self) -> wgpu::Operations<f32> {
        let load = match self.depth_load_op {
            LoadOp::Clear(_) => wgpu::LoadOp::Clear(self.depth_clear_value),
            LoadOp::Load => wgpu::LoadOp::Load,
        };
        wgpu::Operations {
            load,
            store: self.depth_store_op.to_wgpu(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_bits_map_one_to_one() {
        let usage = TextureUsage::TEXTURE_BINDING | TextureUsage::RENDER_ATTACHMENT;
        assert_eq!(
            usage.to_wgpu(),
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::RENDER_ATTACHMENT
        );
        assert_eq!(
            (BufferUsage::UNIFORM | BufferUsage::COPY_DST).to_wgpu(),
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST
        );
    }

    #[test]
    fn test_surface_format_round_trips_known_formats() {
        assert_eq!(
            surface_format(wgpu::TextureFormat::Bgra8UnormSrgb),
            Some(TextureFormat::Bgra8UnormSrgb)
        );
        assert_eq!(surface_format(wgpu::TextureFormat::Rgb10a2Unorm), None);
    }

    #[test]
    fn test_depth_clear_uses_clear_value() {
        let attachment = DepthStencilAttachment {
            view: TextureViewHandle(1),
            depth_load_op: LoadOp::Clear([0.0; 4]),
            depth_store_op: StoreOp::Store,
            depth_clear_value: 1.0,
        };
        assert_eq!(attachment.to_wgpu().load, wgpu::LoadOp::Clear(1.0));
    }
}
