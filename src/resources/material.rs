//! PBR materials: five texture channels discovered on disk or given explicitly

use super::texture::{GpuTexture, TextureData};
use super::MeshLoadFlags;
use crate::backend::traits::*;
use crate::backend::types::*;
use glam::Vec3;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Extensions tried by [`MaterialDescriptor::probe_directory`], in order
pub const DEFAULT_EXTENSIONS: &[&str] = &[".png", ".tga"];

/// Material errors
#[derive(Error, Debug)]
pub enum MaterialError {
    #[error("Material '{material}' has no {channel} texture")]
    MissingChannel {
        material: String,
        channel: MaterialChannel,
    },
    #[error("Failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("Failed to read material directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

/// One texture channel of a PBR material; the discriminant is its binding slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaterialChannel {
    Albedo = 0,
    Normal = 1,
    Metallic = 2,
    Roughness = 3,
    Ao = 4,
}

impl MaterialChannel {
    pub const ALL: [MaterialChannel; 5] = [
        MaterialChannel::Albedo,
        MaterialChannel::Normal,
        MaterialChannel::Metallic,
        MaterialChannel::Roughness,
        MaterialChannel::Ao,
    ];

    /// Conventional file stem inside a material directory
    pub fn file_stem(&self) -> &'static str {
        match self {
            MaterialChannel::Albedo => "albedo",
            MaterialChannel::Normal => "normal",
            MaterialChannel::Metallic => "metallic",
            MaterialChannel::Roughness => "roughness",
            MaterialChannel::Ao => "ao",
        }
    }

    pub fn binding(&self) -> u32 {
        *self as u32
    }

    /// Texel substituted when the channel is missing
    pub fn default_texel(&self) -> [u8; 4] {
        match self {
            MaterialChannel::Albedo => [255, 255, 255, 255],
            MaterialChannel::Normal => [128, 128, 255, 255],
            MaterialChannel::Metallic => [0, 0, 0, 255],
            MaterialChannel::Roughness => [255, 255, 255, 255],
            MaterialChannel::Ao => [255, 255, 255, 255],
        }
    }
}

impl fmt::Display for MaterialChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_stem())
    }
}

/// What to do when a channel has no file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingTexturePolicy {
    /// Fail with [`MaterialError::MissingChannel`]
    Error,
    /// Substitute [`MaterialChannel::default_texel`] and log a warning
    #[default]
    Default,
}

/// Which file backs each channel
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialDescriptor {
    pub name: String,
    pub channels: Vec<(MaterialChannel, Option<PathBuf>)>,
    /// Decode albedo as sRGB
    pub srgb_albedo: bool,
}

impl MaterialDescriptor {
    /// Descriptor with every channel absent
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            channels: MaterialChannel::ALL.iter().map(|&c| (c, None)).collect(),
            srgb_albedo: false,
        }
    }

    pub fn with_channel(mut self, channel: MaterialChannel, path: impl Into<PathBuf>) -> Self {
        if let Some(slot) = self.channels.iter_mut().find(|(c, _)| *c == channel) {
            slot.1 = Some(path.into());
        }
        self
    }

    pub fn with_flags(mut self, flags: MeshLoadFlags) -> Self {
        self.srgb_albedo = flags.contains(MeshLoadFlags::GAMMA_CORRECT);
        self
    }

    /// Find `<stem><ext>` for every channel; the first existing extension wins
    pub fn probe_directory(dir: impl AsRef<Path>, extensions: &[&str]) -> Result<Self, MaterialError> {
        let dir = dir.as_ref();
        std::fs::metadata(dir).map_err(|source| MaterialError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("material");
        let mut descriptor = Self::new(name);

        for (channel, path) in &mut descriptor.channels {
            *path = extensions
                .iter()
                .map(|ext| dir.join(format!("{}{}", channel.file_stem(), ext)))
                .find(|candidate| candidate.is_file());
            match path {
                Some(found) => log::debug!("{}: {} -> {}", name, channel, found.display()),
                None => log::debug!("{}: no {} texture", name, channel),
            }
        }

        Ok(descriptor)
    }

    pub fn path(&self, channel: MaterialChannel) -> Option<&Path> {
        self.channels
            .iter()
            .find(|(c, _)| *c == channel)
            .and_then(|(_, p)| p.as_deref())
    }

    /// Channels with no file
    pub fn missing_channels(&self) -> Vec<MaterialChannel> {
        self.channels
            .iter()
            .filter(|(_, p)| p.is_none())
            .map(|(c, _)| *c)
            .collect()
    }

    fn format(&self, channel: MaterialChannel) -> TextureFormat {
        if channel == MaterialChannel::Albedo && self.srgb_albedo {
            TextureFormat::Rgba8UnormSrgb
        } else {
            TextureFormat::Rgba8Unorm
        }
    }
}

/// A material's textures and bind group, ready for the geometry pass
#[derive(Debug, Clone)]
pub struct PbrMaterial {
    pub name: String,
    pub textures: Vec<GpuTexture>,
    pub sampler: SamplerHandle,
    pub bind_group: BindGroupHandle,
}

impl PbrMaterial {
    /// Bind group layout: the five textures at their channel bindings, sampler at 5
    pub fn bind_group_layout_entries() -> Vec<BindGroupLayoutEntry> {
        let mut entries: Vec<_> = MaterialChannel::ALL
            .iter()
            .map(|c| BindGroupLayoutEntry::texture(c.binding(), TextureViewDimension::D2))
            .collect();
        entries.push(BindGroupLayoutEntry::sampler(5));
        entries
    }

    /// Decode and upload every channel, handling absent ones per `policy`
    pub fn load<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        descriptor: &MaterialDescriptor,
        policy: MissingTexturePolicy,
        layout: BindGroupLayoutHandle,
    ) -> Result<Self, MaterialError> {
        let mut data = Vec::with_capacity(MaterialChannel::ALL.len());
        for channel in MaterialChannel::ALL {
            let format = descriptor.format(channel);
            let texture = match descriptor.path(channel) {
                Some(path) => TextureData::from_file(path, format).map_err(|source| {
                    MaterialError::Decode {
                        path: path.to_path_buf(),
                        source,
                    }
                })?,
                None if policy == MissingTexturePolicy::Error => {
                    return Err(MaterialError::MissingChannel {
                        material: descriptor.name.clone(),
                        channel,
                    });
                }
                None => {
                    log::warn!(
                        "Material '{}' has no {} texture, using default",
                        descriptor.name,
                        channel
                    );
                    TextureData::solid_color(
                        channel.default_texel(),
                        &format!("{} {}", descriptor.name, channel),
                        format,
                    )
                }
            };
            data.push(texture);
        }
        Self::create(backend, &descriptor.name, &data, layout)
    }

    /// Material made of 1x1 constant textures
    pub fn from_constants<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        name: &str,
        albedo: Vec3,
        metallic: f32,
        roughness: f32,
        ao: f32,
        layout: BindGroupLayoutHandle,
    ) -> Result<Self, MaterialError> {
        let unorm = |v: f32| (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
        let grey = |v: f32| [unorm(v), unorm(v), unorm(v), 255];
        let texels = [
            [unorm(albedo.x), unorm(albedo.y), unorm(albedo.z), 255],
            MaterialChannel::Normal.default_texel(),
            grey(metallic),
            grey(roughness),
            grey(ao),
        ];
        let data: Vec<_> = MaterialChannel::ALL
            .iter()
            .zip(texels)
            .map(|(channel, texel)| {
                TextureData::solid_color(
                    texel,
                    &format!("{} {}", name, channel),
                    TextureFormat::Rgba8Unorm,
                )
            })
            .collect();
        Self::create(backend, name, &data, layout)
    }

    fn create<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        name: &str,
        data: &[TextureData],
        layout: BindGroupLayoutHandle,
    ) -> Result<Self, MaterialError> {
        let textures = data
            .iter()
            .map(|d| GpuTexture::create(backend, d, true))
            .collect::<BackendResult<Vec<_>>>()?;
        let sampler = backend.create_sampler(&SamplerDescriptor::material())?;

        let mut entries: Vec<_> = textures
            .iter()
            .zip(MaterialChannel::ALL)
            .map(|(t, c)| (c.binding(), BindGroupEntry::Texture(t.view)))
            .collect();
        entries.push((5, BindGroupEntry::Sampler(sampler)));
        let bind_group = backend.create_bind_group(layout, &entries)?;

        Ok(Self {
            name: name.to_string(),
            textures,
            sampler,
            bind_group,
        })
    }

    pub fn texture(&self, channel: MaterialChannel) -> &GpuTexture {
        &self.textures[channel as usize]
    }

    pub fn destroy<B: GraphicsBackend + ?Sized>(self, backend: &mut B) {
        for texture in self.textures {
            backend.destroy_texture(texture.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;
    use std::fs;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("deferred-pbr-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_png(path: &Path, color: [u8; 4]) {
        image::RgbaImage::from_pixel(2, 2, image::Rgba(color))
            .save(path)
            .unwrap();
    }

    #[test]
    fn test_probe_prefers_earlier_extension() {
        let dir = scratch_dir("probe");
        write_png(&dir.join("albedo.png"), [255, 0, 0, 255]);
        fs::write(dir.join("albedo.tga"), b"not read").unwrap();
        fs::write(dir.join("roughness.tga"), b"tga").unwrap();

        let desc = MaterialDescriptor::probe_directory(&dir, DEFAULT_EXTENSIONS).unwrap();
        assert_eq!(desc.path(MaterialChannel::Albedo), Some(dir.join("albedo.png").as_path()));
        assert_eq!(
            desc.path(MaterialChannel::Roughness),
            Some(dir.join("roughness.tga").as_path())
        );
        assert_eq!(
            desc.missing_channels(),
            vec![MaterialChannel::Normal, MaterialChannel::Metallic, MaterialChannel::Ao]
        );
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_probe_missing_directory_is_io_error() {
        let result = MaterialDescriptor::probe_directory("/definitely/not/here", DEFAULT_EXTENSIONS);
        assert!(matches!(result, Err(MaterialError::Io { .. })));
    }

    #[test]
    fn test_missing_channel_policy() {
        let mut backend = RecordingBackend::new(4, 4);
        let layout = backend
            .create_bind_group_layout(&PbrMaterial::bind_group_layout_entries())
            .unwrap();
        let desc = MaterialDescriptor::new("empty");

        let err = PbrMaterial::load(&mut backend, &desc, MissingTexturePolicy::Error, layout);
        assert!(matches!(
            err,
            Err(MaterialError::MissingChannel {
                channel: MaterialChannel::Albedo,
                ..
            })
        ));

        let material =
            PbrMaterial::load(&mut backend, &desc, MissingTexturePolicy::Default, layout).unwrap();
        assert_eq!(material.textures.len(), 5);
    }

    #[test]
    fn test_load_decodes_files_and_applies_srgb_flag() {
        let dir = scratch_dir("load");
        for channel in MaterialChannel::ALL {
            write_png(&dir.join(format!("{}.png", channel.file_stem())), [90, 90, 90, 255]);
        }
        let desc = MaterialDescriptor::probe_directory(&dir, DEFAULT_EXTENSIONS)
            .unwrap()
            .with_flags(MeshLoadFlags::GAMMA_CORRECT | MeshLoadFlags::PBR);

        let mut backend = RecordingBackend::new(4, 4);
        let layout = backend
            .create_bind_group_layout(&PbrMaterial::bind_group_layout_entries())
            .unwrap();
        let material =
            PbrMaterial::load(&mut backend, &desc, MissingTexturePolicy::Error, layout).unwrap();
        assert_eq!(
            material.texture(MaterialChannel::Albedo).format,
            TextureFormat::Rgba8UnormSrgb
        );
        assert_eq!(
            material.texture(MaterialChannel::Normal).format,
            TextureFormat::Rgba8Unorm
        );
        fs::remove_dir_all(&dir).unwrap();
    }
}
