//! Split-sum BRDF integration lookup table.

use super::sampling::{geometry_smith_ibl, hammersley, importance_sample_ggx};
use glam::{Vec2, Vec3};
use half::f16;

/// Scale and bias applied to F0 for one `(n·v, roughness)` pair
pub fn integrate_brdf(n_dot_v: f32, roughness: f32, sample_count: u32) -> Vec2 {
    let n_dot_v = n_dot_v.clamp(1e-4, 1.0);
    let v = Vec3::new((1.0 - n_dot_v * n_dot_v).sqrt(), 0.0, n_dot_v);
    let n = Vec3::Z;

    let mut scale = 0.0;
    let mut bias = 0.0;
    for i in 0..sample_count {
        let xi = hammersley(i, sample_count);
        let h = importance_sample_ggx(xi, n, roughness);
        let l = (2.0 * v.dot(h) * h - v).normalize();

        let n_dot_l = l.z.max(0.0);
        let n_dot_h = h.z.max(0.0);
        let v_dot_h = v.dot(h).max(0.0);

        if n_dot_l > 0.0 {
            let g = geometry_smith_ibl(n_dot_v, n_dot_l, roughness);
            let g_vis = g * v_dot_h / (n_dot_h * n_dot_v).max(1e-6);
            let fc = (1.0 - v_dot_h).powi(5);
            scale += (1.0 - fc) * g_vis;
            bias += fc * g_vis;
        }
    }

    let n = sample_count.max(1) as f32;
    Vec2::new(scale / n, bias / n)
}

/// `(n·v, roughness)` lookup table; x is n·v, row y is roughness
#[derive(Debug, Clone, PartialEq)]
pub struct BrdfLut {
    size: u32,
    texels: Vec<Vec2>,
}

impl BrdfLut {
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn texel(&self, x: u32, y: u32) -> Vec2 {
        self.texels[(y * self.size + x) as usize]
    }

    /// Bilinear lookup at normalised coordinates, clamped to the edge texels
    pub fn sample(&self, n_dot_v: f32, roughness: f32) -> Vec2 {
        let max = (self.size - 1) as f32;
        let fx = (n_dot_v * self.size as f32 - 0.5).clamp(0.0, max);
        let fy = (roughness * self.size as f32 - 0.5).clamp(0.0, max);
        let x0 = fx.floor() as u32;
        let y0 = fy.floor() as u32;
        let x1 = (x0 + 1).min(self.size - 1);
        let y1 = (y0 + 1).min(self.size - 1);
        let tx = fx - x0 as f32;
        let ty = fy - y0 as f32;
        let top = self.texel(x0, y0).lerp(self.texel(x1, y0), tx);
        let bottom = self.texel(x0, y1).lerp(self.texel(x1, y1), tx);
        top.lerp(bottom, ty)
    }

    /// Rg16Float upload bytes
    pub fn rg16f_bytes(&self) -> Vec<u8> {
        let texels: Vec<[f16; 2]> = self
            .texels
            .iter()
            .map(|t| [f16::from_f32(t.x), f16::from_f32(t.y)])
            .collect();
        bytemuck::cast_slice(&texels).to_vec()
    }
}

/// Evaluate [`integrate_brdf`] at every texel centre of a `size` table
pub fn bake_brdf_lut(size: u32, sample_count: u32) -> BrdfLut {
    let size = size.max(1);
    let mut texels = Vec::with_capacity((size * size) as usize);
    for y in 0..size {
        let roughness = (y as f32 + 0.5) / size as f32;
        for x in 0..size {
            let n_dot_v = (x as f32 + 0.5) / size as f32;
            texels.push(integrate_brdf(n_dot_v, roughness, sample_count));
        }
    }
    BrdfLut { size, texels }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smooth_head_on_keeps_energy() {
        let v = integrate_brdf(0.99, 0.01, 64);
        assert!(v.x > 0.95, "scale {}", v.x);
        assert!(v.y < 0.05, "bias {}", v.y);
    }

    #[test]
    fn test_grazing_rough_loses_energy() {
        let v = integrate_brdf(0.05, 0.95, 64);
        assert!(v.x + v.y < 0.8);
    }

    #[test]
    fn test_lut_values_are_finite_and_bounded() {
        let lut = bake_brdf_lut(16, 32);
        for y in 0..16 {
            for x in 0..16 {
                let t = lut.texel(x, y);
                assert!(t.is_finite());
                assert!(t.x >= 0.0 && t.y >= 0.0 && t.x + t.y <= 1.05, "({x}, {y}) {t}");
            }
        }
        assert_eq!(lut.rg16f_bytes().len(), 16 * 16 * 4);
    }
}
