//! CPU evaluation of the lighting shader.
//!
//! Mirrors `LIGHTING_FRAGMENT` term for term so shading can be checked without
//! a GPU, one G-buffer texel at a time.

use crate::ibl::sampling::distribution_ggx;
use crate::ibl::CpuIblProducts;
use crate::scene::PointLight;
use glam::Vec3;
use std::f32::consts::PI;

/// Flat ambient term used when no IBL products are bound
pub const FALLBACK_AMBIENT: f32 = 0.03;

/// Everything one G-buffer texel holds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GBufferSample {
    pub position: Vec3,
    pub normal: Vec3,
    pub albedo: Vec3,
    pub metallic: f32,
    pub roughness: f32,
    pub ao: f32,
}

/// Schlick-GGX with the direct-lighting remap `k = (r + 1)² / 8`
pub fn geometry_schlick_ggx(n_dot_x: f32, roughness: f32) -> f32 {
    let r = roughness + 1.0;
    let k = r * r / 8.0;
    n_dot_x / (n_dot_x * (1.0 - k) + k)
}

pub fn geometry_smith(n_dot_v: f32, n_dot_l: f32, roughness: f32) -> f32 {
    geometry_schlick_ggx(n_dot_v, roughness) * geometry_schlick_ggx(n_dot_l, roughness)
}

pub fn fresnel_schlick(cos_theta: f32, f0: Vec3) -> Vec3 {
    f0 + (Vec3::ONE - f0) * (1.0 - cos_theta).clamp(0.0, 1.0).powi(5)
}

/// Fresnel for the ambient term; rough surfaces reflect less at grazing angles
pub fn fresnel_schlick_roughness(cos_theta: f32, f0: Vec3, roughness: f32) -> Vec3 {
    let max = Vec3::splat(1.0 - roughness).max(f0);
    f0 + (max - f0) * (1.0 - cos_theta).clamp(0.0, 1.0).powi(5)
}

/// Reflectance at normal incidence: 4% for dielectrics, albedo for metals
pub fn base_reflectance(albedo: Vec3, metallic: f32) -> Vec3 {
    Vec3::splat(0.04).lerp(albedo, metallic)
}

/// Outgoing radiance from every point light
pub fn direct_lighting(sample: &GBufferSample, view_pos: Vec3, lights: &[PointLight]) -> Vec3 {
    let n = sample.normal.normalize();
    let v = (view_pos - sample.position).normalize();
    let f0 = base_reflectance(sample.albedo, sample.metallic);
    let n_dot_v = n.dot(v).max(0.0);

    let mut lo = Vec3::ZERO;
    for light in lights {
        let to_light = light.position - sample.position;
        let distance = to_light.length();
        if distance <= f32::EPSILON {
            continue;
        }
        let l = to_light / distance;
        let n_dot_l = n.dot(l);
        if n_dot_l <= 0.0 {
            continue;
        }
        let h = (v + l).normalize_or_zero();
        let radiance = light.color / (distance * distance);

        let ndf = distribution_ggx(n.dot(h).max(0.0), sample.roughness);
        let g = geometry_smith(n_dot_v, n_dot_l, sample.roughness);
        let f = fresnel_schlick(h.dot(v).max(0.0), f0);

        let specular = ndf * g * f / (4.0 * n_dot_v * n_dot_l + 0.0001);
        let kd = (Vec3::ONE - f) * (1.0 - sample.metallic);
        lo += (kd * sample.albedo / PI + specular) * radiance * n_dot_l;
    }
    lo
}

/// Split-sum ambient term, or a flat ambient without IBL
pub fn ambient_lighting(sample: &GBufferSample, view_pos: Vec3, ibl: Option<&CpuIblProducts>) -> Vec3 {
    let Some(ibl) = ibl else {
        return Vec3::splat(FALLBACK_AMBIENT) * sample.albedo * sample.ao;
    };

    let n = sample.normal.normalize();
    let v = (view_pos - sample.position).normalize();
    let r = 2.0 * n.dot(v) * n - v;
    let n_dot_v = n.dot(v).max(0.0);
    let f0 = base_reflectance(sample.albedo, sample.metallic);

    let ks = fresnel_schlick_roughness(n_dot_v, f0, sample.roughness);
    let kd = (Vec3::ONE - ks) * (1.0 - sample.metallic);
    let diffuse = ibl.irradiance.sample(n, 0.0) * sample.albedo;

    let max_lod = (ibl.prefilter.mip_levels() - 1) as f32;
    let prefiltered = ibl.prefilter.sample(r, sample.roughness * max_lod);
    let brdf = ibl.brdf_lut.sample(n_dot_v, sample.roughness);
    let specular = prefiltered * (ks * brdf.x + brdf.y);

    (kd * diffuse + specular) * sample.ao
}

/// Linear HDR radiance of one texel, before tone mapping
pub fn shade_pixel(
    sample: &GBufferSample,
    view_pos: Vec3,
    lights: &[PointLight],
    ibl: Option<&CpuIblProducts>,
) -> Vec3 {
    direct_lighting(sample, view_pos, lights) + ambient_lighting(sample, view_pos, ibl)
}

pub fn tonemap_reinhard(color: Vec3, exposure: f32) -> Vec3 {
    let c = color * exposure;
    c / (c + Vec3::ONE)
}

pub fn gamma_correct(color: Vec3, gamma: f32) -> Vec3 {
    color.powf(1.0 / gamma)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ibl::{bake_cpu, EquirectImage, IblConfig};

    fn red_sample() -> GBufferSample {
        GBufferSample {
            position: Vec3::ZERO,
            normal: Vec3::Z,
            albedo: Vec3::new(1.0, 0.0, 0.0),
            metallic: 0.0,
            roughness: 1.0,
            ao: 1.0,
        }
    }

    #[test]
    fn test_head_on_light_on_rough_dielectric() {
        let lights = [PointLight::new(Vec3::Z, Vec3::ONE)];
        let color = direct_lighting(&red_sample(), Vec3::Z * 3.0, &lights);

        // 0.96 / pi diffuse plus a 4% GGX lobe of D = 1 / pi over 4
        let specular = 0.04 / PI / 4.0001;
        assert!((color.x - (0.96 / PI + specular)).abs() < 1e-4, "{color}");
        assert!((color.y - specular).abs() < 1e-4);
        assert!((color.z - specular).abs() < 1e-4);
    }

    #[test]
    fn test_light_behind_surface_contributes_nothing() {
        let lights = [PointLight::new(-Vec3::Z, Vec3::splat(10.0))];
        let color = direct_lighting(&red_sample(), Vec3::Z, &lights);
        assert_eq!(color, Vec3::ZERO);
    }

    #[test]
    fn test_inverse_square_attenuation() {
        let near = direct_lighting(&red_sample(), Vec3::Z, &[PointLight::new(Vec3::Z, Vec3::ONE)]);
        let far = direct_lighting(&red_sample(), Vec3::Z, &[PointLight::new(Vec3::Z * 2.0, Vec3::ONE)]);
        assert!((near.x / far.x - 4.0).abs() < 1e-3);
    }

    #[test]
    fn test_fresnel_limits() {
        let f0 = Vec3::splat(0.04);
        assert_eq!(fresnel_schlick(1.0, f0), f0);
        assert!((fresnel_schlick(0.0, f0) - Vec3::ONE).abs().max_element() < 1e-6);
        // Fully rough surfaces never exceed their own reflectance ceiling
        assert!((fresnel_schlick_roughness(0.0, f0, 1.0) - f0).abs().max_element() < 1e-6);
    }

    #[test]
    fn test_uniform_white_environment_reflects_white_on_mirror_metal() {
        let config = IblConfig::fast();
        let ibl = bake_cpu(&EquirectImage::from_fn(32, 16, |_| Vec3::ONE).unwrap(), &config).unwrap();
        let sample = GBufferSample {
            albedo: Vec3::ONE,
            metallic: 1.0,
            roughness: 0.0,
            ..red_sample()
        };

        let color = ambient_lighting(&sample, Vec3::Z * 2.0, Some(&ibl.products));
        assert!((color - Vec3::ONE).abs().max_element() < 0.05, "{color}");
    }

    #[test]
    fn test_ambient_without_ibl_is_flat() {
        let color = ambient_lighting(&red_sample(), Vec3::Z, None);
        assert_eq!(color, Vec3::new(FALLBACK_AMBIENT, 0.0, 0.0));
    }

    #[test]
    fn test_tonemap_and_gamma_stay_in_unit_range() {
        let mapped = tonemap_reinhard(Vec3::new(0.0, 1.0, 1000.0), 1.0);
        assert_eq!(mapped.x, 0.0);
        assert!((mapped.y - 0.5).abs() < 1e-6);
        assert!(mapped.z < 1.0);
        let corrected = gamma_correct(Vec3::splat(0.5), 2.2);
        assert!((corrected.x - 0.5f32.powf(1.0 / 2.2)).abs() < 1e-6);
    }
}
