//! Camera system

use crate::backend::types::CameraUniform;
use glam::{Mat4, Vec3};

/// Perspective look-at camera
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y: std::f32::consts::FRAC_PI_4,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Camera {
    pub fn new(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            target,
            ..Default::default()
        }
    }

    pub fn with_fov_degrees(mut self, fov_y: f32) -> Self {
        self.fov_y = fov_y.to_radians();
        self
    }

    pub fn look_at(&mut self, target: Vec3) {
        self.target = target;
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize_or_zero()
    }

    /// Update the aspect ratio after a resize; zero sizes are ignored
    pub fn set_aspect(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    pub fn uniform(&self) -> CameraUniform {
        let view = self.view_matrix();
        let proj = self.projection_matrix();
        let view_proj = proj * view;
        CameraUniform {
            view,
            proj,
            view_proj,
            inv_view_proj: view_proj.inverse(),
            position: self.position.extend(1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_projects_to_screen_center() {
        let camera = Camera::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(0.0, 0.5, -1.0));
        let clip = camera.view_projection() * camera.target.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn test_set_aspect_ignores_zero() {
        let mut camera = Camera::default();
        camera.set_aspect(800, 400);
        assert_eq!(camera.aspect, 2.0);
        camera.set_aspect(0, 400);
        assert_eq!(camera.aspect, 2.0);
    }

    #[test]
    fn test_uniform_inverse_round_trips() {
        let uniform = Camera::default().uniform();
        let identity = uniform.view_proj * uniform.inv_view_proj;
        assert!(identity.abs_diff_eq(Mat4::IDENTITY, 1e-4));
    }
}
