//! Resources tracked by the render graph

use crate::backend::traits::{TextureHandle, TextureViewHandle};

/// Unique identifier for a render graph resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) u32);

/// What kind of texture an imported resource stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// A texture owned by the caller that outlives the frame
    Texture,
    /// The swapchain image, rebound every frame
    Swapchain,
}

/// A resource registered with the graph
#[derive(Debug, Clone)]
pub struct GraphResource {
    pub id: ResourceId,
    pub name: String,
    pub kind: ResourceKind,
}

/// How a pass uses a texture
///
/// Each access implies the layout/state the texture must be in on APIs with
/// explicit transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceAccess {
    /// Sampled in a shader
    ShaderRead,
    /// Written as a colour attachment
    RenderTarget,
    /// Written as a depth attachment
    DepthStencilWrite,
    /// Depth-tested against without writing
    DepthStencilRead,
    /// Source of a copy
    TransferSrc,
    /// Destination of a copy
    TransferDst,
}

impl ResourceAccess {
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            ResourceAccess::ShaderRead
                | ResourceAccess::DepthStencilRead
                | ResourceAccess::TransferSrc
        )
    }

    pub fn is_write(&self) -> bool {
        !self.is_read()
    }
}

/// Resource access declaration for a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceUse {
    pub resource: ResourceId,
    pub access: ResourceAccess,
}

/// Concrete backend objects bound to a resource for one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundTexture {
    /// `None` for the swapchain, which cannot be transitioned by handle
    pub texture: Option<TextureHandle>,
    pub view: TextureViewHandle,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_is_read_or_write() {
        assert!(ResourceAccess::ShaderRead.is_read());
        assert!(ResourceAccess::DepthStencilRead.is_read());
        assert!(ResourceAccess::TransferSrc.is_read());

        assert!(ResourceAccess::RenderTarget.is_write());
        assert!(ResourceAccess::DepthStencilWrite.is_write());
        assert!(ResourceAccess::TransferDst.is_write());
        assert!(!ResourceAccess::TransferDst.is_read());
    }
}
