//! Point lights

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

/// Point light; intensity is folded into `color`, attenuation is `1/d²`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    pub color: Vec3,
}

impl PointLight {
    pub fn new(position: Vec3, color: Vec3) -> Self {
        Self { position, color }
    }

    pub fn to_gpu_data(&self) -> GpuPointLight {
        GpuPointLight {
            position: self.position.extend(1.0),
            color: self.color.extend(0.0),
        }
    }
}

/// Point light as laid out in the lighting uniform
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct GpuPointLight {
    pub position: Vec4,
    pub color: Vec4,
}
