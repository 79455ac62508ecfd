//! Mesh data structures and generation

use crate::backend::traits::*;
use crate::backend::types::{BufferDescriptor, BufferUsage, Vertex};
use bitflags::bitflags;
use glam::{Vec2, Vec3, Vec4};
use std::f32::consts::PI;

bitflags! {
    /// Options applied to imported meshes and their materials
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MeshLoadFlags: u32 {
        /// Flip the V texture coordinate
        const FLIP_UVS = 1 << 0;
        /// Recompute tangents from triangle edges
        const TANGENTS = 1 << 1;
        /// Albedo maps are sRGB encoded
        const GAMMA_CORRECT = 1 << 2;
        /// Load the five-channel PBR texture set
        const PBR = 1 << 3;
        /// Textures come from a material directory instead of the model file
        const CUSTOM_TEX = 1 << 4;
    }
}

/// A mesh with vertex and optional index data
///
/// Meshes without indices are drawn as a plain triangle list.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub name: String,
}

impl Mesh {
    pub fn new(name: &str) -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            name: name.to_string(),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.draw_count() / 3
    }

    /// Number of vertices or indices a draw call consumes
    pub fn draw_count(&self) -> usize {
        if self.indices.is_empty() {
            self.vertices.len()
        } else {
            self.indices.len()
        }
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Vertex indices of every triangle
    pub fn triangles(&self) -> Vec<[u32; 3]> {
        if self.indices.is_empty() {
            (0..self.vertices.len() as u32 / 3)
                .map(|t| [t * 3, t * 3 + 1, t * 3 + 2])
                .collect()
        } else {
            self.indices
                .chunks_exact(3)
                .map(|t| [t[0], t[1], t[2]])
                .collect()
        }
    }

    /// Unit cube spanning `[-1, 1]`, 36 vertices, counter-clockwise from outside
    pub fn cube() -> Self {
        let mut mesh = Mesh::new("cube");

        // (normal, u axis, v axis) with u x v = normal
        let faces = [
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
        ];
        let corners = [
            Vec2::new(-1.0, -1.0),
            Vec2::new(1.0, -1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(-1.0, 1.0),
        ];

        for (normal, u, v) in faces {
            for corner in [0, 1, 2, 0, 2, 3] {
                let c = corners[corner];
                mesh.vertices.push(Vertex {
                    position: normal + u * c.x + v * c.y,
                    normal,
                    uv: Vec2::new((c.x + 1.0) * 0.5, (1.0 - c.y) * 0.5),
                    tangent: Vec4::ZERO,
                });
            }
        }

        mesh.compute_tangents();
        mesh
    }

    /// UV sphere of radius 1
    pub fn sphere(x_segments: u32, y_segments: u32) -> Self {
        let mut mesh = Mesh::new("sphere");
        let x_segments = x_segments.max(3);
        let y_segments = y_segments.max(2);

        for y in 0..=y_segments {
            for x in 0..=x_segments {
                let x_seg = x as f32 / x_segments as f32;
                let y_seg = y as f32 / y_segments as f32;
                let theta = 2.0 * PI * x_seg;
                let phi = PI * y_seg;

                let position = Vec3::new(theta.cos() * phi.sin(), phi.cos(), theta.sin() * phi.sin());
                let tangent = Vec3::new(-theta.sin(), 0.0, theta.cos());

                mesh.vertices.push(Vertex {
                    position,
                    normal: position.normalize_or_zero(),
                    uv: Vec2::new(x_seg, y_seg),
                    // uv.y grows towards -Y, along n x t
                    tangent: tangent.extend(1.0),
                });
            }
        }

        let stride = x_segments + 1;
        for y in 0..y_segments {
            for x in 0..x_segments {
                let current = y * stride + x;
                let below = current + stride;
                mesh.indices.extend_from_slice(&[
                    current,
                    current + 1,
                    below,
                    current + 1,
                    below + 1,
                    below,
                ]);
            }
        }

        mesh
    }

    /// Full-screen quad in the XY plane spanning `[-1, 1]`
    pub fn quad() -> Self {
        let mut mesh = Mesh::new("quad");
        for (x, y) in [(-1.0, 1.0), (-1.0, -1.0), (1.0, -1.0), (1.0, 1.0)] {
            mesh.vertices.push(Vertex {
                position: Vec3::new(x, y, 0.0),
                normal: Vec3::Z,
                uv: Vec2::new((x + 1.0) * 0.5, (1.0 - y) * 0.5),
                tangent: Vec4::ZERO,
            });
        }
        mesh.indices.extend_from_slice(&[0, 1, 2, 0, 2, 3]);
        mesh.compute_tangents();
        mesh
    }

    /// Rebuild per-vertex tangents from triangle edges and UV deltas.
    ///
    /// Tangents are orthogonalised against the normal; `w` holds the sign of the
    /// bitangent. Triangles with degenerate UVs are skipped.
    pub fn compute_tangents(&mut self) {
        let mut tangents = vec![Vec3::ZERO; self.vertices.len()];
        let mut bitangents = vec![Vec3::ZERO; self.vertices.len()];

        for [a, b, c] in self.triangles() {
            let (v0, v1, v2) = (
                &self.vertices[a as usize],
                &self.vertices[b as usize],
                &self.vertices[c as usize],
            );
            let edge1 = v1.position - v0.position;
            let edge2 = v2.position - v0.position;
            let delta_uv1 = v1.uv - v0.uv;
            let delta_uv2 = v2.uv - v0.uv;

            let det = delta_uv1.x * delta_uv2.y - delta_uv2.x * delta_uv1.y;
            if det.abs() < 1e-8 {
                continue;
            }
            let f = 1.0 / det;
            let tangent = f * (delta_uv2.y * edge1 - delta_uv1.y * edge2);
            let bitangent = f * (-delta_uv2.x * edge1 + delta_uv1.x * edge2);

            for i in [a, b, c] {
                tangents[i as usize] += tangent;
                bitangents[i as usize] += bitangent;
            }
        }

        for (i, vertex) in self.vertices.iter_mut().enumerate() {
            let n = vertex.normal;
            let t = tangents[i] - n * n.dot(tangents[i]);
            let t = if t.length_squared() > 1e-12 {
                t.normalize()
            } else {
                n.any_orthonormal_vector()
            };
            let w = if n.cross(t).dot(bitangents[i]) < 0.0 {
                -1.0
            } else {
                1.0
            };
            vertex.tangent = t.extend(w);
        }
    }

    /// Flip the V coordinate; this mirrors the bitangent, so handedness flips too
    pub fn flip_uvs(&mut self) {
        for vertex in &mut self.vertices {
            vertex.uv.y = 1.0 - vertex.uv.y;
            vertex.tangent.w = -vertex.tangent.w;
        }
    }

    /// Apply the mesh-affecting load flags
    pub fn apply_flags(&mut self, flags: MeshLoadFlags) {
        if flags.contains(MeshLoadFlags::FLIP_UVS) {
            self.flip_uvs();
        }
        if flags.contains(MeshLoadFlags::TANGENTS) {
            self.compute_tangents();
        }
    }

    /// Upload vertex and index data
    pub fn upload<B: GraphicsBackend + ?Sized>(&self, backend: &mut B) -> BackendResult<GpuMesh> {
        let vertex_data = self.vertex_bytes();
        let vertex_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} Vertices", self.name)),
                size: vertex_data.len() as u64,
                usage: BufferUsage::VERTEX,
                mapped_at_creation: false,
            },
            vertex_data,
        )?;

        let index_buffer = if self.indices.is_empty() {
            None
        } else {
            let index_data = self.index_bytes();
            Some(backend.create_buffer_init(
                &BufferDescriptor {
                    label: Some(format!("{} Indices", self.name)),
                    size: index_data.len() as u64,
                    usage: BufferUsage::INDEX,
                    mapped_at_creation: false,
                },
                index_data,
            )?)
        };

        Ok(GpuMesh {
            vertex_buffer,
            index_buffer,
            draw_count: self.draw_count() as u32,
        })
    }
}

/// Mesh buffers on the GPU
#[derive(Debug, Clone, Copy)]
pub struct GpuMesh {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: Option<BufferHandle>,
    pub draw_count: u32,
}

impl GpuMesh {
    /// Bind the buffers and issue one draw; must be inside a render pass
    pub fn draw<B: GraphicsBackend + ?Sized>(&self, backend: &mut B) {
        backend.set_vertex_buffer(0, self.vertex_buffer, 0);
        match self.index_buffer {
            Some(index_buffer) => {
                backend.set_index_buffer(index_buffer, 0);
                backend.draw_indexed(0..self.draw_count, 0..1);
            }
            None => backend.draw(0..self.draw_count, 0..1),
        }
    }

    pub fn destroy<B: GraphicsBackend + ?Sized>(self, backend: &mut B) {
        backend.destroy_buffer(self.vertex_buffer);
        if let Some(index_buffer) = self.index_buffer {
            backend.destroy_buffer(index_buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_outward_winding(mesh: &Mesh) {
        for [a, b, c] in mesh.triangles() {
            let p0 = mesh.vertices[a as usize].position;
            let p1 = mesh.vertices[b as usize].position;
            let p2 = mesh.vertices[c as usize].position;
            let face_normal = (p1 - p0).cross(p2 - p0);
            if face_normal.length_squared() < 1e-10 {
                continue;
            }
            let centroid = (p0 + p1 + p2) / 3.0;
            assert!(face_normal.dot(centroid) > 0.0, "{} triangle {a},{b},{c}", mesh.name);
        }
    }

    #[test]
    fn test_cube_has_36_outward_vertices() {
        let cube = Mesh::cube();
        assert_eq!(cube.vertex_count(), 36);
        assert_eq!(cube.index_count(), 0);
        assert_eq!(cube.triangle_count(), 12);
        assert!(cube
            .vertices
            .iter()
            .all(|v| v.position.abs().max_element() == 1.0));
        assert_outward_winding(&cube);
    }

    #[test]
    fn test_sphere_is_unit_and_counter_clockwise() {
        let sphere = Mesh::sphere(16, 8);
        assert_eq!(sphere.vertex_count(), 17 * 9);
        assert_eq!(sphere.index_count(), 16 * 8 * 6);
        for v in &sphere.vertices {
            assert!((v.position.length() - 1.0).abs() < 1e-5);
        }
        assert_outward_winding(&sphere);
    }

    #[test]
    fn test_computed_tangents_follow_u() {
        let quad = Mesh::quad();
        for v in &quad.vertices {
            assert!((v.tangent.truncate() - Vec3::X).length() < 1e-5);
            // v grows downwards while n x t points up
            assert_eq!(v.tangent.w, -1.0);
        }
    }

    #[test]
    fn test_tangents_are_orthogonal_to_normals() {
        let mut sphere = Mesh::sphere(12, 6);
        sphere.compute_tangents();
        for v in &sphere.vertices {
            assert!(v.tangent.truncate().dot(v.normal).abs() < 1e-4);
            assert!(v.tangent.is_finite());
        }
    }

    #[test]
    fn test_flip_uvs_flips_handedness() {
        let mut quad = Mesh::quad();
        quad.apply_flags(MeshLoadFlags::FLIP_UVS);
        assert_eq!(quad.vertices[0].uv, Vec2::new(0.0, 1.0));
        assert_eq!(quad.vertices[0].tangent.w, 1.0);

        let mut recomputed = quad.clone();
        recomputed.apply_flags(MeshLoadFlags::TANGENTS);
        assert_eq!(recomputed.vertices[0].tangent, quad.vertices[0].tangent);
    }

    #[test]
    fn test_flags_combine() {
        let flags = MeshLoadFlags::PBR | MeshLoadFlags::GAMMA_CORRECT;
        assert!(flags.contains(MeshLoadFlags::PBR));
        assert!(!flags.contains(MeshLoadFlags::FLIP_UVS));
    }
}
