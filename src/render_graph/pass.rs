//! Render pass definitions for the render graph

use crate::backend::traits::*;
use crate::render_graph::resource::*;
use crate::renderer::FrameContext;
use crate::scene::Scene;
use std::any::Any;
use std::collections::HashMap;

/// Unique identifier for a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub(crate) u32);

/// Context for declaring what a pass touches
pub struct PassSetupContext<'a> {
    pub(crate) resources: &'a [GraphResource],
    pub(crate) reads: &'a mut Vec<ResourceUse>,
    pub(crate) writes: &'a mut Vec<ResourceUse>,
}

impl<'a> PassSetupContext<'a> {
    /// Declare that this pass reads from a resource
    pub fn read(&mut self, resource: ResourceId, access: ResourceAccess) {
        self.reads.push(ResourceUse { resource, access });
    }

    /// Declare that this pass writes to a resource
    pub fn write(&mut self, resource: ResourceId, access: ResourceAccess) {
        self.writes.push(ResourceUse { resource, access });
    }

    /// Look up an imported resource by name
    pub fn resource(&self, name: &str) -> Option<ResourceId> {
        self.resources.iter().find(|r| r.name == name).map(|r| r.id)
    }
}

/// Context for executing a render pass
pub struct PassExecuteContext<'a, B: GraphicsBackend> {
    pub backend: &'a mut B,
    pub frame: &'a FrameContext,
    pub scene: &'a Scene,
    pub(crate) bindings: &'a HashMap<ResourceId, BoundTexture>,
}

impl<'a, B: GraphicsBackend> PassExecuteContext<'a, B> {
    /// Get the texture view bound to a resource
    pub fn view(&self, resource: ResourceId) -> BackendResult<TextureViewHandle> {
        self.bound(resource).map(|b| b.view)
    }

    /// Get the texture bound to a resource
    pub fn texture(&self, resource: ResourceId) -> BackendResult<TextureHandle> {
        self.bound(resource)?
            .texture
            .ok_or(BackendError::InvalidHandle {
                kind: "graph texture",
                id: resource.0 as u64,
            })
    }

    fn bound(&self, resource: ResourceId) -> BackendResult<&BoundTexture> {
        self.bindings
            .get(&resource)
            .ok_or(BackendError::InvalidHandle {
                kind: "graph resource",
                id: resource.0 as u64,
            })
    }
}

/// Trait for render passes
pub trait RenderPass<B: GraphicsBackend> {
    /// Get the pass name for debugging
    fn name(&self) -> &str;

    /// Setup phase - declare resource reads and writes
    fn setup(&mut self, ctx: &mut PassSetupContext);

    /// Execute phase - record commands
    fn execute(&mut self, ctx: &mut PassExecuteContext<B>) -> BackendResult<()>;

    /// Downcast support for reconfiguring a pass owned by the graph
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Metadata about a pass in the graph
#[derive(Debug)]
pub struct PassNode {
    pub id: PassId,
    pub name: String,
    pub reads: Vec<ResourceUse>,
    pub writes: Vec<ResourceUse>,
}

impl PassNode {
    pub fn reads_resource(&self, resource: ResourceId) -> bool {
        self.reads.iter().any(|a| a.resource == resource)
    }

    pub fn writes_resource(&self, resource: ResourceId) -> bool {
        self.writes.iter().any(|a| a.resource == resource)
    }

    /// Reads followed by writes, in declaration order
    pub fn uses(&self) -> impl Iterator<Item = &ResourceUse> {
        self.reads.iter().chain(self.writes.iter())
    }
}
