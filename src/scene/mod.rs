//! Scene description consumed by the renderer

mod camera;
mod light;

pub use camera::*;
pub use light::*;

use crate::backend::traits::BindGroupHandle;
use crate::resources::{GpuMesh, PbrMaterial};
use glam::{Mat4, Vec3};

/// One mesh drawn with one material
#[derive(Debug, Clone, Copy)]
pub struct DrawItem {
    pub mesh: GpuMesh,
    /// Bind group of the item's [`PbrMaterial`]
    pub material: BindGroupHandle,
    pub model: Mat4,
}

impl DrawItem {
    pub fn new(mesh: &GpuMesh, material: &PbrMaterial, model: Mat4) -> Self {
        Self {
            mesh: *mesh,
            material: material.bind_group,
            model,
        }
    }
}

/// Everything the renderer draws in one frame
#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub camera: Camera,
    pub lights: Vec<PointLight>,
    pub items: Vec<DrawItem>,
}

impl Scene {
    pub fn new(camera: Camera) -> Self {
        Self {
            camera,
            ..Default::default()
        }
    }

    pub fn add_point_light(&mut self, position: Vec3, color: Vec3) {
        self.lights.push(PointLight::new(position, color));
    }

    pub fn add_item(&mut self, item: DrawItem) -> usize {
        self.items.push(item);
        self.items.len() - 1
    }
}
