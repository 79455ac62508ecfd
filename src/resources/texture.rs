//! Texture decoding, CPU mip generation and upload

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::ibl::EquirectImage;
use glam::Vec3;
use image::{DynamicImage, GenericImageView, ImageError};
use std::path::Path;

/// Decoded 8-bit RGBA texture data
#[derive(Debug, Clone)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub data: Vec<u8>,
    pub name: String,
}

impl TextureData {
    /// Decode an image file; `format` picks linear or sRGB interpretation
    pub fn from_file<P: AsRef<Path>>(path: P, format: TextureFormat) -> Result<Self, ImageError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        log::info!("Loading image: {}", path.display());
        let img = image::open(path)?;
        Ok(Self::from_image(img, &name, format))
    }

    pub fn from_bytes(bytes: &[u8], name: &str, format: TextureFormat) -> Result<Self, ImageError> {
        let img = image::load_from_memory(bytes)?;
        Ok(Self::from_image(img, name, format))
    }

    fn from_image(img: DynamicImage, name: &str, format: TextureFormat) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            format,
            data: img.to_rgba8().into_raw(),
            name: name.to_string(),
        }
    }

    pub fn solid_color(color: [u8; 4], name: &str, format: TextureFormat) -> Self {
        Self {
            width: 1,
            height: 1,
            format,
            data: color.to_vec(),
            name: name.to_string(),
        }
    }

    /// Number of levels in a full chain down to 1x1
    pub fn mip_level_count(&self) -> u32 {
        self.width.max(self.height).max(1).ilog2() + 1
    }

    /// Every mip level, starting with the full image, built with a 2x2 box filter.
    ///
    /// sRGB data is averaged in linear space.
    pub fn mip_chain(&self) -> Vec<MipLevel> {
        let srgb = self.format.is_srgb();
        let mut levels = vec![MipLevel {
            width: self.width,
            height: self.height,
            data: self.data.clone(),
        }];

        while let Some(prev) = levels.last() {
            if prev.width == 1 && prev.height == 1 {
                break;
            }
            let width = (prev.width / 2).max(1);
            let height = (prev.height / 2).max(1);
            let mut data = Vec::with_capacity((width * height * 4) as usize);

            for y in 0..height {
                for x in 0..width {
                    let x0 = (x * 2).min(prev.width - 1);
                    let x1 = (x * 2 + 1).min(prev.width - 1);
                    let y0 = (y * 2).min(prev.height - 1);
                    let y1 = (y * 2 + 1).min(prev.height - 1);
                    for channel in 0..4 {
                        let decode = |px: u32, py: u32| {
                            let value = prev.data[((py * prev.width + px) * 4 + channel) as usize];
                            if srgb && channel < 3 {
                                srgb_to_linear(value)
                            } else {
                                value as f32 / 255.0
                            }
                        };
                        let avg = (decode(x0, y0) + decode(x1, y0) + decode(x0, y1) + decode(x1, y1))
                            * 0.25;
                        let encoded = if srgb && channel < 3 {
                            linear_to_srgb(avg)
                        } else {
                            avg
                        };
                        data.push((encoded * 255.0 + 0.5).clamp(0.0, 255.0) as u8);
                    }
                }
            }

            levels.push(MipLevel {
                width,
                height,
                data,
            });
        }

        levels
    }
}

/// One level of a CPU mip chain
#[derive(Debug, Clone)]
pub struct MipLevel {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

fn srgb_to_linear(value: u8) -> f32 {
    let c = value as f32 / 255.0;
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

/// Linear HDR image decoded from a Radiance `.hdr` file
#[derive(Debug, Clone)]
pub struct HdrImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<Vec3>,
}

impl HdrImage {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ImageError> {
        log::info!("Loading HDR environment: {}", path.as_ref().display());
        Ok(Self::from_image(image::open(path)?))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ImageError> {
        Ok(Self::from_image(image::load_from_memory(bytes)?))
    }

    fn from_image(img: DynamicImage) -> Self {
        let (width, height) = img.dimensions();
        let pixels = img
            .to_rgb32f()
            .pixels()
            .map(|p| Vec3::new(p.0[0], p.0[1], p.0[2]))
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Interpret the image as a latitude-longitude panorama
    pub fn into_equirect(self) -> Option<EquirectImage> {
        EquirectImage::new(self.width, self.height, self.pixels)
    }
}

/// GPU texture with its default view
#[derive(Debug, Clone, Copy)]
pub struct GpuTexture {
    pub handle: TextureHandle,
    pub view: TextureViewHandle,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

impl GpuTexture {
    /// Create and upload a texture, optionally with its full mip chain
    pub fn create<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        data: &TextureData,
        with_mips: bool,
    ) -> BackendResult<Self> {
        let levels = if with_mips {
            data.mip_chain()
        } else {
            vec![MipLevel {
                width: data.width,
                height: data.height,
                data: data.data.clone(),
            }]
        };

        let handle = backend.create_texture(&TextureDescriptor {
            label: Some(data.name.clone()),
            width: data.width,
            height: data.height,
            mip_levels: levels.len() as u32,
            format: data.format,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
            ..Default::default()
        })?;

        for (mip, level) in levels.iter().enumerate() {
            backend.write_texture(
                handle,
                &TextureWrite {
                    mip_level: mip as u32,
                    array_layer: 0,
                    width: level.width,
                    height: level.height,
                    bytes_per_row: level.width * 4,
                },
                &level.data,
            );
        }

        let view = backend.create_texture_view(handle, &TextureViewDescriptor::default())?;
        Ok(Self {
            handle,
            view,
            width: data.width,
            height: data.height,
            format: data.format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RecordedCommand, RecordingBackend};

    #[test]
    fn test_mip_chain_reaches_one_pixel() {
        let data = TextureData {
            width: 8,
            height: 2,
            format: TextureFormat::Rgba8Unorm,
            data: vec![200; 8 * 2 * 4],
            name: "strip".into(),
        };
        let chain = data.mip_chain();
        assert_eq!(chain.len() as u32, data.mip_level_count());
        let sizes: Vec<_> = chain.iter().map(|l| (l.width, l.height)).collect();
        assert_eq!(sizes, vec![(8, 2), (4, 1), (2, 1), (1, 1)]);
        assert!(chain.iter().all(|l| l.data.iter().all(|&v| v == 200)));
    }

    #[test]
    fn test_srgb_mips_average_in_linear_space() {
        let mut data = TextureData {
            width: 2,
            height: 1,
            format: TextureFormat::Rgba8UnormSrgb,
            data: vec![0, 0, 0, 255, 255, 255, 255, 255],
            name: "black-white".into(),
        };
        let srgb = data.mip_chain()[1].data[0];
        data.format = TextureFormat::Rgba8Unorm;
        let linear = data.mip_chain()[1].data[0];
        assert_eq!(linear, 128);
        // 50% linear grey is ~188 in sRGB
        assert!((186..=190).contains(&srgb), "{srgb}");
    }

    #[test]
    fn test_upload_writes_every_level() {
        let mut backend = RecordingBackend::new(4, 4);
        let data = TextureData::solid_color([255, 0, 0, 255], "red", TextureFormat::Rgba8UnormSrgb);
        let mut big = data.clone();
        big.width = 4;
        big.height = 4;
        big.data = data.data.repeat(16);

        let texture = GpuTexture::create(&mut backend, &big, true).unwrap();
        let writes = backend
            .command_log()
            .snapshot()
            .into_iter()
            .filter(|c| matches!(c, RecordedCommand::WriteTexture { .. }))
            .count();
        assert_eq!(writes, 3);
        assert_eq!(backend.texture_descriptor(texture.handle).unwrap().mip_levels, 3);
    }

    #[test]
    fn test_decode_png_bytes() {
        let mut png = Vec::new();
        image::RgbaImage::from_pixel(2, 2, image::Rgba([10, 20, 30, 255]))
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let data = TextureData::from_bytes(&png, "tiny", TextureFormat::Rgba8Unorm).unwrap();
        assert_eq!((data.width, data.height), (2, 2));
        assert_eq!(&data.data[..4], &[10, 20, 30, 255]);
    }
}
