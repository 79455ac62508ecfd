//! Diffuse irradiance convolution.

use super::cubemap::CpuCubemap;
use super::sampling::tangent_basis;
use glam::Vec3;
use std::f32::consts::{FRAC_PI_2, PI};

/// Source level of detail whose texel spacing matches the angular step.
///
/// Sampling finer levels than the step resolves only adds aliasing.
pub fn irradiance_source_lod(source_size: u32, sample_delta: f32) -> f32 {
    (source_size as f32 * sample_delta / FRAC_PI_2).log2().max(0.0)
}

/// Cosine-weighted hemisphere integral of `env` around `normal`.
pub fn irradiance_at(env: &CpuCubemap, normal: Vec3, sample_delta: f32, lod: f32) -> Vec3 {
    let (right, up) = tangent_basis(normal, Vec3::Y);

    let mut irradiance = Vec3::ZERO;
    let mut sample_count = 0u32;

    let mut phi = 0.0f32;
    while phi < 2.0 * PI {
        let mut theta = 0.0f32;
        while theta < FRAC_PI_2 {
            let tangent_sample = Vec3::new(
                theta.sin() * phi.cos(),
                theta.sin() * phi.sin(),
                theta.cos(),
            );
            let sample_vec =
                tangent_sample.x * right + tangent_sample.y * up + tangent_sample.z * normal;

            irradiance += env.sample(sample_vec, lod) * theta.cos() * theta.sin();
            sample_count += 1;

            theta += sample_delta;
        }
        phi += sample_delta;
    }

    PI * irradiance / sample_count.max(1) as f32
}

/// Convolve `env` (which must carry its mip chain) into a `size` irradiance cubemap
pub fn convolve_irradiance(env: &CpuCubemap, size: u32, sample_delta: f32) -> CpuCubemap {
    let lod = irradiance_source_lod(env.size(), sample_delta);
    log::debug!(
        "Convolving irradiance: {}px faces, step {:.3} rad, source lod {:.2}",
        size,
        sample_delta,
        lod
    );
    CpuCubemap::from_fn(size, |normal| irradiance_at(env, normal, sample_delta, lod))
}
