//! Resource management
//!
//! Meshes, decoded textures and PBR materials.

mod material;
mod mesh;
mod texture;

pub use material::*;
pub use mesh::*;
pub use texture::*;
