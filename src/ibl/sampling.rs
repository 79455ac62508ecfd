//! Low-discrepancy and GGX sampling helpers shared by the IBL kernels.

use glam::{Vec2, Vec3};
use std::f32::consts::PI;

/// Van der Corput radical inverse in base 2.
pub fn radical_inverse_vdc(bits: u32) -> f32 {
    bits.reverse_bits() as f32 * 2.328_306_4e-10
}

/// `i`-th point of an `n`-point Hammersley set on the unit square.
pub fn hammersley(i: u32, n: u32) -> Vec2 {
    Vec2::new(i as f32 / n.max(1) as f32, radical_inverse_vdc(i))
}

/// Orthonormal tangent and bitangent around `n`.
///
/// `preferred_up` is replaced by a perpendicular axis when it is nearly
/// parallel to `n`, so the cross products never collapse to zero.
pub fn tangent_basis(n: Vec3, preferred_up: Vec3) -> (Vec3, Vec3) {
    let up = if n.dot(preferred_up).abs() < 0.999 {
        preferred_up
    } else if preferred_up.x.abs() < 0.5 {
        Vec3::X
    } else {
        Vec3::Y
    };
    let tangent = up.cross(n).normalize();
    let bitangent = n.cross(tangent);
    (tangent, bitangent)
}

/// GGX importance sample of a half vector around `n` (`a = roughness²`).
pub fn importance_sample_ggx(xi: Vec2, n: Vec3, roughness: f32) -> Vec3 {
    let a = roughness * roughness;

    let phi = 2.0 * PI * xi.x;
    let cos_theta = ((1.0 - xi.y) / (1.0 + (a * a - 1.0) * xi.y)).sqrt();
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();

    let h = Vec3::new(phi.cos() * sin_theta, phi.sin() * sin_theta, cos_theta);

    let (tangent, bitangent) = tangent_basis(n, Vec3::Z);
    (tangent * h.x + bitangent * h.y + n * h.z).normalize()
}

/// Trowbridge-Reitz GGX normal distribution.
pub fn distribution_ggx(n_dot_h: f32, roughness: f32) -> f32 {
    let a = roughness * roughness;
    let a2 = a * a;
    let denom = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
    a2 / (PI * denom * denom).max(1e-7)
}

/// Schlick-GGX term with the image-based `k = roughness² / 2`.
pub fn geometry_schlick_ggx_ibl(n_dot_x: f32, roughness: f32) -> f32 {
    let k = roughness * roughness / 2.0;
    n_dot_x / (n_dot_x * (1.0 - k) + k)
}

/// Smith geometry term for image-based lighting.
pub fn geometry_smith_ibl(n_dot_v: f32, n_dot_l: f32, roughness: f32) -> f32 {
    geometry_schlick_ggx_ibl(n_dot_v, roughness) * geometry_schlick_ggx_ibl(n_dot_l, roughness)
}
