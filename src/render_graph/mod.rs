//! Render Graph System
//!
//! Passes declare the textures they read and write. Compilation orders them
//! into a DAG and places a barrier wherever a texture changes access between
//! two passes.

pub mod executor;
pub mod graph;
pub mod pass;
pub mod resource;

pub use executor::*;
pub use graph::*;
pub use pass::*;
pub use resource::*;
