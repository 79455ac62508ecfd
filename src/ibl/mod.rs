//! Image-based lighting precompute
//!
//! One equirectangular HDR panorama is turned into the products the lighting
//! pass samples:
//! - an environment cubemap with mips (also drawn as the skybox)
//! - a diffuse irradiance cubemap
//! - a specular prefiltered cubemap whose mip `m` encodes roughness `m / (M - 1)`
//! - a BRDF lookup table of `(n·v, roughness) -> (scale, bias)`
//!
//! The chain runs on the GPU through [`IblBaker`] or on the CPU through
//! [`bake_cpu`]; both follow the same kernels.

pub mod baker;
pub mod brdf_lut;
pub mod capture;
pub mod cubemap;
pub mod equirect;
pub mod irradiance;
pub mod prefilter;
pub mod sampling;
pub mod shaders;

pub use baker::{upload_cpu_products, BakedIbl, GpuCubemap, GpuIblProducts, GpuTexture2d, IblBaker};
pub use brdf_lut::{bake_brdf_lut, integrate_brdf, BrdfLut};
pub use capture::CubeFaceCameras;
pub use cubemap::CpuCubemap;
pub use equirect::{convert_equirect_to_cubemap, EquirectImage};
pub use irradiance::convolve_irradiance;
pub use prefilter::{mip_roughness, prefilter_specular};

use crate::backend::BackendError;
use crate::framebuffer::FramebufferError;
use std::f32::consts::FRAC_PI_2;
use thiserror::Error;

/// IBL errors
#[derive(Error, Debug)]
pub enum IblError {
    #[error("Invalid IBL configuration: {0}")]
    InvalidConfig(String),
    #[error("Environment image is empty")]
    EmptyEnvironment,
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("Capture framebuffer error: {0}")]
    Framebuffer(#[from] FramebufferError),
}

/// Resolutions and sample counts of the precompute chain
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IblConfig {
    /// Edge of the environment cubemap faces
    pub environment_size: u32,
    /// Edge of the irradiance cubemap faces
    pub irradiance_size: u32,
    /// Angular step of the irradiance integral, in radians
    pub irradiance_sample_delta: f32,
    /// Edge of the prefiltered cubemap at mip 0
    pub prefilter_size: u32,
    pub prefilter_mip_levels: u32,
    pub prefilter_sample_count: u32,
    pub brdf_lut_size: u32,
    pub brdf_sample_count: u32,
}

impl Default for IblConfig {
    fn default() -> Self {
        Self {
            environment_size: 512,
            irradiance_size: 32,
            irradiance_sample_delta: 0.025,
            prefilter_size: 128,
            prefilter_mip_levels: 5,
            prefilter_sample_count: 64,
            brdf_lut_size: 512,
            brdf_sample_count: 64,
        }
    }
}

impl IblConfig {
    /// Small sizes and coarse steps for tests and quick previews
    pub fn fast() -> Self {
        Self {
            environment_size: 32,
            irradiance_size: 8,
            irradiance_sample_delta: 0.2,
            prefilter_size: 16,
            prefilter_mip_levels: 3,
            prefilter_sample_count: 32,
            brdf_lut_size: 32,
            brdf_sample_count: 64,
        }
    }

    pub fn validate(&self) -> Result<(), IblError> {
        let sizes = [
            ("environment_size", self.environment_size),
            ("irradiance_size", self.irradiance_size),
            ("prefilter_size", self.prefilter_size),
            ("brdf_lut_size", self.brdf_lut_size),
        ];
        for (name, size) in sizes {
            if size == 0 {
                return Err(IblError::InvalidConfig(format!("{name} must be non-zero")));
            }
        }
        if !self.environment_size.is_power_of_two() || !self.prefilter_size.is_power_of_two() {
            return Err(IblError::InvalidConfig(
                "environment_size and prefilter_size must be powers of two".into(),
            ));
        }
        if self.prefilter_mip_levels == 0 || self.prefilter_mip_levels > self.prefilter_size.ilog2() + 1
        {
            return Err(IblError::InvalidConfig(format!(
                "prefilter_mip_levels {} does not fit a {}px cubemap",
                self.prefilter_mip_levels, self.prefilter_size
            )));
        }
        if !(self.irradiance_sample_delta > 0.0 && self.irradiance_sample_delta < FRAC_PI_2) {
            return Err(IblError::InvalidConfig(format!(
                "irradiance_sample_delta {} outside (0, pi/2)",
                self.irradiance_sample_delta
            )));
        }
        if self.prefilter_sample_count == 0 || self.brdf_sample_count == 0 {
            return Err(IblError::InvalidConfig("sample counts must be non-zero".into()));
        }
        Ok(())
    }

    /// Mip levels of the environment cubemap
    pub fn environment_mip_levels(&self) -> u32 {
        self.environment_size.ilog2() + 1
    }

    /// Largest lod the lighting pass may request from the prefiltered map
    pub fn max_reflection_lod(&self) -> f32 {
        (self.prefilter_mip_levels - 1) as f32
    }
}

/// The three runtime products of the precompute chain
#[derive(Debug, Clone, Copy)]
pub struct IblProductSet<C, L> {
    pub irradiance: C,
    pub prefilter: C,
    pub brdf_lut: L,
}

/// CPU-side products
pub type CpuIblProducts = IblProductSet<CpuCubemap, BrdfLut>;

/// Environment cubemap plus products, all computed on the CPU
#[derive(Debug, Clone)]
pub struct CpuIbl {
    pub environment: CpuCubemap,
    pub products: CpuIblProducts,
}

/// Run the whole chain on the CPU
pub fn bake_cpu(image: &EquirectImage, config: &IblConfig) -> Result<CpuIbl, IblError> {
    config.validate()?;
    if image.texels().is_empty() {
        return Err(IblError::EmptyEnvironment);
    }

    log::info!(
        "Baking IBL on CPU from {}x{} panorama",
        image.width(),
        image.height()
    );
    let environment = convert_equirect_to_cubemap(image, config.environment_size);

    log::info!("Computing irradiance cubemap...");
    let irradiance = convolve_irradiance(
        &environment,
        config.irradiance_size,
        config.irradiance_sample_delta,
    );

    log::info!("Computing pre-filtered environment map...");
    let prefilter = prefilter_specular(
        &environment,
        config.prefilter_size,
        config.prefilter_mip_levels,
        config.prefilter_sample_count,
    );

    log::info!("Integrating BRDF lookup table...");
    let brdf_lut = bake_brdf_lut(config.brdf_lut_size, config.brdf_sample_count);

    Ok(CpuIbl {
        environment,
        products: IblProductSet {
            irradiance,
            prefilter,
            brdf_lut,
        },
    })
}
