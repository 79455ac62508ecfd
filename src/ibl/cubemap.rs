//! CPU cubemaps with mip chains.
//!
//! Face order and texel orientation follow the GPU convention: faces are
//! +X, -X, +Y, -Y, +Z, -Z and texel row 0 is the top of each face.

use glam::Vec3;
use half::f16;

/// Face index to direction for texel-centre coordinates `u`, `v` in [-1, 1].
pub fn face_direction(face: usize, u: f32, v: f32) -> Vec3 {
    let dir = match face {
        0 => Vec3::new(1.0, -v, -u),
        1 => Vec3::new(-1.0, -v, u),
        2 => Vec3::new(u, 1.0, v),
        3 => Vec3::new(u, -1.0, -v),
        4 => Vec3::new(u, -v, 1.0),
        _ => Vec3::new(-u, -v, -1.0),
    };
    dir.normalize()
}

/// Inverse of [`face_direction`]: which face `dir` hits and where.
pub fn direction_to_face(dir: Vec3) -> (usize, f32, f32) {
    let abs = dir.abs();
    if abs.x >= abs.y && abs.x >= abs.z {
        let m = abs.x.max(f32::MIN_POSITIVE);
        if dir.x > 0.0 {
            (0, -dir.z / m, -dir.y / m)
        } else {
            (1, dir.z / m, -dir.y / m)
        }
    } else if abs.y >= abs.z {
        let m = abs.y;
        if dir.y > 0.0 {
            (2, dir.x / m, dir.z / m)
        } else {
            (3, dir.x / m, -dir.z / m)
        }
    } else {
        let m = abs.z;
        if dir.z > 0.0 {
            (4, dir.x / m, -dir.y / m)
        } else {
            (5, -dir.x / m, -dir.y / m)
        }
    }
}

/// Texel-centre coordinate in [-1, 1] for texel `i` of `size`.
pub fn texel_center(i: u32, size: u32) -> f32 {
    (i as f32 + 0.5) / size as f32 * 2.0 - 1.0
}

/// Six square faces of linear RGB texels at each mip level
#[derive(Debug, Clone, PartialEq)]
pub struct CpuCubemap {
    size: u32,
    /// `levels[mip]` holds the six faces back to back, rows top to bottom
    levels: Vec<Vec<Vec3>>,
}

impl CpuCubemap {
    /// Black cubemap of `size` with `mip_levels` levels
    pub fn new(size: u32, mip_levels: u32) -> Self {
        let size = size.max(1);
        let levels = (0..mip_levels.max(1))
            .map(|mip| {
                let s = (size >> mip).max(1) as usize;
                vec![Vec3::ZERO; 6 * s * s]
            })
            .collect();
        Self { size, levels }
    }

    /// Single-level cubemap evaluating `f` at every texel direction
    pub fn from_fn(size: u32, f: impl Fn(Vec3) -> Vec3) -> Self {
        let mut cube = Self::new(size, 1);
        cube.fill_level(0, f);
        cube
    }

    /// Overwrite one level by evaluating `f` at its texel directions
    pub fn fill_level(&mut self, mip: u32, f: impl Fn(Vec3) -> Vec3) {
        let size = self.mip_size(mip);
        let Some(level) = self.levels.get_mut(mip as usize) else {
            return;
        };
        for face in 0..6 {
            for y in 0..size {
                let v = texel_center(y, size);
                for x in 0..size {
                    let u = texel_center(x, size);
                    let idx = (face * size as usize + y as usize) * size as usize + x as usize;
                    level[idx] = f(face_direction(face, u, v));
                }
            }
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn mip_levels(&self) -> u32 {
        self.levels.len() as u32
    }

    pub fn mip_size(&self, mip: u32) -> u32 {
        (self.size >> mip).max(1)
    }

    /// Texels of one face at one mip, row-major
    pub fn face(&self, face: usize, mip: u32) -> &[Vec3] {
        let size = self.mip_size(mip) as usize;
        let start = face * size * size;
        &self.levels[mip as usize][start..start + size * size]
    }

    pub fn texel(&self, face: usize, mip: u32, x: u32, y: u32) -> Vec3 {
        let size = self.mip_size(mip);
        self.face(face, mip)[(y * size + x) as usize]
    }

    /// Bilinear lookup within a single level
    pub fn sample_level(&self, dir: Vec3, mip: u32) -> Vec3 {
        let mip = mip.min(self.mip_levels() - 1);
        let size = self.mip_size(mip);
        let (face, u, v) = direction_to_face(dir);

        let fx = ((u + 1.0) * 0.5 * size as f32 - 0.5).clamp(0.0, (size - 1) as f32);
        let fy = ((v + 1.0) * 0.5 * size as f32 - 0.5).clamp(0.0, (size - 1) as f32);
        let x0 = fx.floor() as u32;
        let y0 = fy.floor() as u32;
        let x1 = (x0 + 1).min(size - 1);
        let y1 = (y0 + 1).min(size - 1);
        let tx = fx - x0 as f32;
        let ty = fy - y0 as f32;

        let texels = self.face(face, mip);
        let at = |x: u32, y: u32| texels[(y * size + x) as usize];
        let top = at(x0, y0).lerp(at(x1, y0), tx);
        let bottom = at(x0, y1).lerp(at(x1, y1), tx);
        top.lerp(bottom, ty)
    }

    /// Trilinear lookup at a fractional level of detail
    pub fn sample(&self, dir: Vec3, lod: f32) -> Vec3 {
        let max_lod = (self.mip_levels() - 1) as f32;
        let lod = lod.clamp(0.0, max_lod);
        let lower = lod.floor();
        let t = lod - lower;
        let a = self.sample_level(dir, lower as u32);
        if t <= f32::EPSILON {
            return a;
        }
        a.lerp(self.sample_level(dir, lower as u32 + 1), t)
    }

    /// Rebuild the full mip chain from level 0 with a 2x2 box filter
    pub fn generate_mips(&mut self) {
        let count = self.size.ilog2() + 1;
        self.levels.truncate(1);
        for mip in 1..count {
            let src_size = self.mip_size(mip - 1) as usize;
            let dst_size = self.mip_size(mip) as usize;
            let src = &self.levels[mip as usize - 1];
            let mut dst = vec![Vec3::ZERO; 6 * dst_size * dst_size];
            for face in 0..6 {
                let src_face = &src[face * src_size * src_size..(face + 1) * src_size * src_size];
                for y in 0..dst_size {
                    for x in 0..dst_size {
                        let sx = (x * 2).min(src_size - 1);
                        let sy = (y * 2).min(src_size - 1);
                        let sx1 = (sx + 1).min(src_size - 1);
                        let sy1 = (sy + 1).min(src_size - 1);
                        let sum = src_face[sy * src_size + sx]
                            + src_face[sy * src_size + sx1]
                            + src_face[sy1 * src_size + sx]
                            + src_face[sy1 * src_size + sx1];
                        dst[(face * dst_size + y) * dst_size + x] = sum * 0.25;
                    }
                }
            }
            self.levels.push(dst);
        }
    }

    /// One face at one mip as Rgba16Float bytes, alpha 1
    pub fn face_rgba16f_bytes(&self, face: usize, mip: u32) -> Vec<u8> {
        let texels: Vec<[f16; 4]> = self
            .face(face, mip)
            .iter()
            .map(|c| {
                [
                    f16::from_f32(c.x),
                    f16::from_f32(c.y),
                    f16::from_f32(c.z),
                    f16::ONE,
                ]
            })
            .collect();
        bytemuck::cast_slice(&texels).to_vec()
    }

    pub fn is_finite(&self) -> bool {
        self.levels.iter().flatten().all(|c| c.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_direction_roundtrips() {
        for face in 0..6 {
            for &(u, v) in &[(-0.9, -0.9), (0.0, 0.0), (0.5, -0.25), (0.9, 0.7)] {
                let dir = face_direction(face, u, v);
                let (f, u2, v2) = direction_to_face(dir);
                assert_eq!(f, face);
                assert!((u - u2).abs() < 1e-5 && (v - v2).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_row_zero_is_up_on_side_faces() {
        for face in [0, 1, 4, 5] {
            assert!(face_direction(face, 0.0, -1.0).y > 0.5);
        }
    }

    #[test]
    fn test_mips_of_constant_stay_constant() {
        let mut cube = CpuCubemap::from_fn(16, |_| Vec3::splat(2.0));
        cube.generate_mips();
        assert_eq!(cube.mip_levels(), 5);
        assert_eq!(cube.mip_size(4), 1);
        for mip in 0..5 {
            let c = cube.sample(Vec3::new(0.2, -0.7, 0.4), mip as f32 + 0.5);
            assert!((c - Vec3::splat(2.0)).abs().max_element() < 1e-5);
        }
    }

    #[test]
    fn test_sample_reads_the_right_face() {
        let cube = CpuCubemap::from_fn(4, |d| {
            if d.x > 0.5 {
                Vec3::X
            } else {
                Vec3::ZERO
            }
        });
        assert_eq!(cube.sample_level(Vec3::X, 0), Vec3::X);
        assert_eq!(cube.sample_level(-Vec3::X, 0), Vec3::ZERO);
    }

    #[test]
    fn test_rgba16f_bytes_size() {
        let cube = CpuCubemap::new(8, 2);
        assert_eq!(cube.face_rgba16f_bytes(3, 1).len(), 4 * 4 * 8);
    }
}
