//! Specular prefiltering of an environment cubemap.

use super::cubemap::CpuCubemap;
use super::sampling::{distribution_ggx, hammersley, importance_sample_ggx};
use glam::Vec3;
use std::f32::consts::PI;

/// Roughness encoded by `mip` of an `mip_levels`-level prefiltered map
pub fn mip_roughness(mip: u32, mip_levels: u32) -> f32 {
    if mip_levels <= 1 {
        0.0
    } else {
        mip as f32 / (mip_levels - 1) as f32
    }
}

/// Source level of detail for one GGX sample, from its pdf and the texel solid angle.
pub fn sample_lod(n_dot_h: f32, h_dot_v: f32, roughness: f32, sample_count: u32, source_size: u32) -> f32 {
    if roughness <= 0.0 {
        return 0.0;
    }
    let d = distribution_ggx(n_dot_h, roughness);
    let pdf = d * n_dot_h / (4.0 * h_dot_v) + 0.0001;
    let sa_texel = 4.0 * PI / (6.0 * source_size as f32 * source_size as f32);
    let sa_sample = 1.0 / (sample_count as f32 * pdf + 0.0001);
    (0.5 * (sa_sample / sa_texel).log2()).max(0.0)
}

/// Prefiltered radiance around `n` for `roughness`, with `V = R = N`.
///
/// Samples reflecting below the surface add nothing to the radiance sum or to
/// the weight sum.
pub fn prefilter_at(env: &CpuCubemap, n: Vec3, roughness: f32, sample_count: u32) -> Vec3 {
    let v = n;
    let mut prefiltered = Vec3::ZERO;
    let mut total_weight = 0.0;

    for i in 0..sample_count {
        let xi = hammersley(i, sample_count);
        let h = importance_sample_ggx(xi, n, roughness);
        let l = (2.0 * v.dot(h) * h - v).normalize();

        let n_dot_l = n.dot(l);
        if n_dot_l > 0.0 {
            let n_dot_h = n.dot(h).max(0.0);
            let h_dot_v = h.dot(v).max(0.0);
            let lod = sample_lod(n_dot_h, h_dot_v, roughness, sample_count, env.size());
            prefiltered += env.sample(l, lod) * n_dot_l;
            total_weight += n_dot_l;
        }
    }

    prefiltered / total_weight.max(0.001)
}

/// Prefilter `env` into a `size` cubemap whose mip `m` holds roughness `m / (mip_levels - 1)`
pub fn prefilter_specular(
    env: &CpuCubemap,
    size: u32,
    mip_levels: u32,
    sample_count: u32,
) -> CpuCubemap {
    let mut out = CpuCubemap::new(size, mip_levels);
    for mip in 0..out.mip_levels() {
        let roughness = mip_roughness(mip, mip_levels);
        log::debug!(
            "Prefiltering mip {} ({}px) at roughness {:.2}",
            mip,
            out.mip_size(mip),
            roughness
        );
        out.fill_level(mip, |n| prefilter_at(env, n, roughness, sample_count));
    }
    out
}
