//! Cameras for rendering into the six faces of a cubemap.

use glam::{Mat4, Vec3, Vec4};

/// Eye-space target and up vector for each face, in +X, -X, +Y, -Y, +Z, -Z order
const FACE_LOOK: [(Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::NEG_Y),
    (Vec3::NEG_X, Vec3::NEG_Y),
    (Vec3::Y, Vec3::Z),
    (Vec3::NEG_Y, Vec3::NEG_Z),
    (Vec3::Z, Vec3::NEG_Y),
    (Vec3::NEG_Z, Vec3::NEG_Y),
];

/// Six fixed views from the origin and one shared 90 degree projection
#[derive(Debug, Clone)]
pub struct CubeFaceCameras {
    pub projection: Mat4,
    pub views: [Mat4; 6],
}

impl CubeFaceCameras {
    pub const NEAR: f32 = 0.1;
    pub const FAR: f32 = 10.0;

    pub fn new() -> Self {
        // The Y flip puts the face's top row at framebuffer row 0.
        let projection = Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0))
            * Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, Self::NEAR, Self::FAR);
        let views = FACE_LOOK.map(|(target, up)| Mat4::look_at_rh(Vec3::ZERO, target, up));
        Self { projection, views }
    }

    pub fn view_projection(&self, face: usize) -> Mat4 {
        self.projection * self.views[face]
    }

    /// World direction seen through texel-centre coordinates `u`, `v` in [-1, 1]
    /// of `face` (row 0 at `v = -1`).
    pub fn texel_direction(&self, face: usize, u: f32, v: f32) -> Vec3 {
        let inverse = self.view_projection(face).inverse();
        let far = inverse * Vec4::new(u, -v, 1.0, 1.0);
        (far.truncate() / far.w).normalize()
    }
}

impl Default for CubeFaceCameras {
    fn default() -> Self {
        Self::new()
    }
}
