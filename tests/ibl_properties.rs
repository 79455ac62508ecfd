//! Integration tests for the IBL precompute chain and the shading it feeds.
//!
//! The CPU kernels are checked against closed-form results (uniform
//! environments, energy bounds); both bake paths are checked to produce
//! textures of the same shape.

mod common;

use rstest::rstest;

use common::{bake, BakeMode};
use deferred_pbr::backend::RecordingBackend;
use deferred_pbr::ibl::cubemap::{face_direction, texel_center};
use deferred_pbr::ibl::{
    bake_cpu, convert_equirect_to_cubemap, integrate_brdf, EquirectImage, IblConfig, IblError,
};
use deferred_pbr::pipeline::shading::{ambient_lighting, shade_pixel, GBufferSample};
use deferred_pbr::scene::PointLight;
use glam::Vec3;

fn uniform_environment(radiance: f32) -> EquirectImage {
    EquirectImage::from_fn(32, 16, |_| Vec3::splat(radiance)).expect("panorama")
}

fn sample(metallic: f32, roughness: f32) -> GBufferSample {
    GBufferSample {
        position: Vec3::ZERO,
        normal: Vec3::Y,
        albedo: Vec3::new(0.9, 0.6, 0.3),
        metallic,
        roughness,
        ao: 1.0,
    }
}

// ============================================================================
// Uniform Environments
// ============================================================================

/// A constant environment convolves to itself at every irradiance texel and prefilter mip
#[rstest]
#[case::dim(0.25)]
#[case::unit(1.0)]
#[case::bright(4.0)]
fn test_uniform_environment_is_preserved(#[case] radiance: f32) {
    let config = IblConfig::fast();
    let ibl = bake_cpu(&uniform_environment(radiance), &config).unwrap();
    let tolerance = radiance * 0.05;

    for dir in [Vec3::X, Vec3::NEG_Y, Vec3::new(0.3, 0.8, -0.5).normalize()] {
        let irradiance = ibl.products.irradiance.sample(dir, 0.0);
        assert!((irradiance - Vec3::splat(radiance)).abs().max_element() < tolerance, "{irradiance}");

        for mip in 0..ibl.products.prefilter.mip_levels() {
            let prefiltered = ibl.products.prefilter.sample_level(dir, mip);
            assert!(
                (prefiltered - Vec3::splat(radiance)).abs().max_element() < tolerance,
                "mip {mip}: {prefiltered}"
            );
        }
    }
    assert!(ibl.products.irradiance.is_finite());
    assert!(ibl.products.prefilter.is_finite());
}

/// Ambient light scales linearly with the environment
#[rstest]
#[case::smooth_metal(1.0, 0.1)]
#[case::rough_metal(1.0, 0.9)]
#[case::plastic(0.0, 0.5)]
fn test_ambient_scales_with_environment(#[case] metallic: f32, #[case] roughness: f32) {
    let config = IblConfig::fast();
    let dim = bake_cpu(&uniform_environment(0.5), &config).unwrap();
    let bright = bake_cpu(&uniform_environment(1.0), &config).unwrap();
    let view = Vec3::new(0.0, 2.0, 2.0);

    let a = ambient_lighting(&sample(metallic, roughness), view, Some(&dim.products));
    let b = ambient_lighting(&sample(metallic, roughness), view, Some(&bright.products));
    assert!((b - a * 2.0).abs().max_element() < 0.02, "{a} vs {b}");
}

/// Occlusion darkens the ambient term but leaves direct light alone
#[rstest]
fn test_ao_only_affects_ambient() {
    let config = IblConfig::fast();
    let ibl = bake_cpu(&uniform_environment(1.0), &config).unwrap();
    let view = Vec3::new(0.0, 3.0, 0.0);
    let lights = [PointLight::new(Vec3::new(0.0, 2.0, 0.0), Vec3::splat(4.0))];

    let open = sample(0.0, 0.5);
    let occluded = GBufferSample { ao: 0.0, ..open };

    let ambient_open = ambient_lighting(&open, view, Some(&ibl.products));
    assert!(ambient_open.max_element() > 0.0);
    assert_eq!(ambient_lighting(&occluded, view, Some(&ibl.products)), Vec3::ZERO);

    let lit = shade_pixel(&occluded, view, &lights, Some(&ibl.products));
    assert!(lit.max_element() > 0.0);
}

// ============================================================================
// Cube Conversion and Prefilter
// ============================================================================

/// Texels on either side of every face edge agree for a smooth panorama
#[rstest]
fn test_cube_faces_meet_without_seams() {
    let f = |d: Vec3| d * 0.5 + Vec3::splat(0.5);
    let cube = convert_equirect_to_cubemap(&EquirectImage::from_fn(256, 128, f).unwrap(), 16);
    let size = cube.size();
    let inside = texel_center(size - 1, size);
    let outside = 1.0 + 1.0 / size as f32;

    for face in 0..6 {
        for i in 0..size {
            let t = texel_center(i, size);
            for (edge, across) in [
                ((inside, t), (outside, t)),
                ((-inside, t), (-outside, t)),
                ((t, inside), (t, outside)),
                ((t, -inside), (t, -outside)),
            ] {
                let a = cube.sample_level(face_direction(face, edge.0, edge.1), 0);
                let b = cube.sample_level(face_direction(face, across.0, across.1), 0);
                assert!(
                    (a - b).abs().max_element() < 0.15,
                    "face {face} texel {i}: {a} vs {b}"
                );
            }
        }
    }
}

#[rstest]
fn test_cpu_bake_is_reproducible() {
    let config = IblConfig::fast();
    let image = common::test_panorama();
    let first = bake_cpu(&image, &config).unwrap();
    let second = bake_cpu(&image, &config).unwrap();

    assert_eq!(first.environment, second.environment);
    assert_eq!(first.products.irradiance, second.products.irradiance);
    assert_eq!(first.products.prefilter, second.products.prefilter);
    assert_eq!(first.products.brdf_lut, second.products.brdf_lut);
}

/// A bright polar cap loses its peak as roughness (mip index) grows
#[rstest]
fn test_prefilter_blur_grows_with_mip() {
    let config = IblConfig {
        prefilter_mip_levels: 4,
        ..IblConfig::fast()
    };
    let cap = EquirectImage::from_fn(64, 32, |d| {
        if d.y > 0.9 {
            Vec3::splat(10.0)
        } else {
            Vec3::ZERO
        }
    })
    .unwrap();
    let ibl = bake_cpu(&cap, &config).unwrap();
    let prefilter = &ibl.products.prefilter;

    let peaks: Vec<f32> = (0..prefilter.mip_levels())
        .map(|mip| prefilter.sample_level(Vec3::Y, mip).x)
        .collect();
    for pair in peaks.windows(2) {
        assert!(pair[1] <= pair[0] + 1e-3, "{peaks:?}");
    }
    assert!(peaks[peaks.len() - 1] < peaks[0] * 0.5, "{peaks:?}");
}

// ============================================================================
// BRDF Lookup Table
// ============================================================================

/// Split-sum scale and bias never add energy
#[rstest]
#[case(0.05, 0.05)]
#[case(0.5, 0.5)]
#[case(1.0, 0.0)]
#[case(0.1, 1.0)]
#[case(1.0, 1.0)]
fn test_brdf_integral_is_bounded(#[case] n_dot_v: f32, #[case] roughness: f32) {
    let brdf = integrate_brdf(n_dot_v, roughness, 256);
    assert!(brdf.x >= 0.0 && brdf.y >= 0.0, "{brdf}");
    assert!(brdf.x + brdf.y <= 1.02, "{brdf}");
}

/// The baked table agrees with direct integration at its texel centres
#[rstest]
fn test_baked_lut_matches_integration() {
    let config = IblConfig::fast();
    let ibl = bake_cpu(&uniform_environment(1.0), &config).unwrap();
    let lut = &ibl.products.brdf_lut;

    let size = lut.size();
    for (x, y) in [(0, 0), (size / 2, size / 3), (size - 1, size - 1)] {
        let n_dot_v = (x as f32 + 0.5) / size as f32;
        let roughness = (y as f32 + 0.5) / size as f32;
        let expected = integrate_brdf(n_dot_v, roughness, config.brdf_sample_count);
        assert!((lut.texel(x, y) - expected).abs().max_element() < 1e-3);
    }
}

// ============================================================================
// Bake Paths
// ============================================================================

/// CPU and GPU bakes hand the renderer textures of the same shape
#[rstest]
#[case::cpu(BakeMode::Cpu)]
#[case::gpu(BakeMode::Gpu)]
fn test_bake_product_shapes(#[case] mode: BakeMode) {
    let mut backend = RecordingBackend::new(64, 64);
    let config = IblConfig::fast();
    let ibl = bake(&mut backend, config, mode);

    assert_eq!(ibl.products.irradiance.size, config.irradiance_size);
    assert_eq!(ibl.products.prefilter.size, config.prefilter_size);
    assert_eq!(ibl.products.prefilter.mip_levels, config.prefilter_mip_levels);
    assert_eq!(ibl.environment.size, config.environment_size);
    assert_eq!(ibl.environment.mip_levels, config.environment_mip_levels());
    assert_eq!(ibl.max_reflection_lod, config.max_reflection_lod());

    let lut = backend.texture_descriptor(ibl.products.brdf_lut.texture).unwrap();
    assert_eq!((lut.width, lut.height), (config.brdf_lut_size, config.brdf_lut_size));
    let prefilter = backend.texture_descriptor(ibl.products.prefilter.texture).unwrap();
    assert_eq!(prefilter.mip_levels, config.prefilter_mip_levels);
}

#[rstest]
#[case::zero_irradiance(IblConfig { irradiance_size: 0, ..IblConfig::fast() })]
#[case::no_prefilter_mips(IblConfig { prefilter_mip_levels: 0, ..IblConfig::fast() })]
#[case::no_samples(IblConfig { brdf_sample_count: 0, ..IblConfig::fast() })]
fn test_invalid_config_is_rejected(#[case] config: IblConfig) {
    assert!(matches!(
        bake_cpu(&uniform_environment(1.0), &config),
        Err(IblError::InvalidConfig(_))
    ));
}
