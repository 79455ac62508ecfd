//! Top-level error type

use crate::backend::BackendError;
use crate::framebuffer::FramebufferError;
use crate::ibl::IblError;
use crate::render_graph::RenderGraphError;
use crate::resources::MaterialError;
use thiserror::Error;

/// Any failure while building or driving the renderer
#[derive(Error, Debug)]
pub enum RendererError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("Render graph error: {0}")]
    RenderGraph(#[from] RenderGraphError),
    #[error("Framebuffer error: {0}")]
    Framebuffer(#[from] FramebufferError),
    #[error("IBL error: {0}")]
    Ibl(#[from] IblError),
    #[error("Material error: {0}")]
    Material(#[from] MaterialError),
}

pub type RendererResult<T> = Result<T, RendererError>;
