//! Equirectangular panoramas and their conversion to cubemaps.

use super::cubemap::CpuCubemap;
use glam::{Vec2, Vec3};
use std::f32::consts::{FRAC_1_PI, PI};

/// Linear RGB latitude-longitude panorama, row 0 at the zenith
#[derive(Debug, Clone, PartialEq)]
pub struct EquirectImage {
    width: u32,
    height: u32,
    texels: Vec<Vec3>,
}

/// Panorama coordinates of `dir`, `v = 1` at the zenith
pub fn direction_to_equirect_uv(dir: Vec3) -> Vec2 {
    let inv_atan = Vec2::new(0.5 * FRAC_1_PI, FRAC_1_PI);
    Vec2::new(dir.z.atan2(dir.x), dir.y.clamp(-1.0, 1.0).asin()) * inv_atan + 0.5
}

impl EquirectImage {
    /// Returns `None` when `texels` does not hold `width * height` entries
    pub fn new(width: u32, height: u32, texels: Vec<Vec3>) -> Option<Self> {
        if width == 0 || height == 0 || texels.len() != (width * height) as usize {
            return None;
        }
        Some(Self {
            width,
            height,
            texels,
        })
    }

    /// Build from interleaved RGBA `f32` data, alpha ignored
    pub fn from_rgba_f32(width: u32, height: u32, rgba: &[f32]) -> Option<Self> {
        let texels = rgba
            .chunks_exact(4)
            .map(|c| Vec3::new(c[0], c[1], c[2]))
            .collect();
        Self::new(width, height, texels)
    }

    /// Panorama whose colour is `f(direction)` at every texel centre; `None` for a zero size
    pub fn from_fn(width: u32, height: u32, f: impl Fn(Vec3) -> Vec3) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        let mut texels = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            let elevation = (0.5 - (y as f32 + 0.5) / height as f32) * PI;
            for x in 0..width {
                let azimuth = ((x as f32 + 0.5) / width as f32 - 0.5) * 2.0 * PI;
                let dir = Vec3::new(
                    elevation.cos() * azimuth.cos(),
                    elevation.sin(),
                    elevation.cos() * azimuth.sin(),
                );
                texels.push(f(dir));
            }
        }
        Self::new(width, height, texels)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn texels(&self) -> &[Vec3] {
        &self.texels
    }

    /// Bilinear lookup, wrapping horizontally
    pub fn sample(&self, dir: Vec3) -> Vec3 {
        let uv = direction_to_equirect_uv(dir);
        let fx = uv.x * self.width as f32 - 0.5;
        let fy = ((1.0 - uv.y) * self.height as f32 - 0.5).clamp(0.0, (self.height - 1) as f32);

        let x0 = fx.floor();
        let tx = fx - x0;
        let wrap = |x: f32| (x as i64).rem_euclid(self.width as i64) as u32;
        let (x0, x1) = (wrap(x0), wrap(x0 + 1.0));
        let y0 = fy.floor() as u32;
        let y1 = (y0 + 1).min(self.height - 1);
        let ty = fy - y0 as f32;

        let at = |x: u32, y: u32| self.texels[(y * self.width + x) as usize];
        let top = at(x0, y0).lerp(at(x1, y0), tx);
        let bottom = at(x0, y1).lerp(at(x1, y1), tx);
        top.lerp(bottom, ty)
    }
}

/// Resample a panorama onto six `size`-square faces with a full mip chain
pub fn convert_equirect_to_cubemap(image: &EquirectImage, size: u32) -> CpuCubemap {
    let mut cube = CpuCubemap::from_fn(size, |dir| image.sample(dir));
    cube.generate_mips();
    cube
}
