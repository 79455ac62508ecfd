//! Render pass recording
//!
//! wgpu render passes borrow every resource they touch for their whole
//! lifetime, so the backend records pass state by handle and encodes the pass
//! in one go when it ends. Handles are resolved before anything is encoded:
//! a pass naming a destroyed resource is dropped whole instead of half-drawn.

use super::convert::ToWgpu;
use super::resources::{AcquiredFrame, Resources};
use crate::backend::traits::*;
use std::ops::Range;

#[derive(Debug, Clone)]
pub(super) enum PassOp {
    Pipeline(RenderPipelineHandle),
    BindGroup(u32, BindGroupHandle),
    VertexBuffer(u32, BufferHandle, u64),
    IndexBuffer(BufferHandle, u64),
    Viewport { x: f32, y: f32, width: f32, height: f32 },
    Draw(Range<u32>, Range<u32>),
    DrawIndexed(Range<u32>, Range<u32>),
}

/// A pass operation with its handles replaced by the objects they name
enum BoundOp<'a> {
    Pipeline(&'a wgpu::RenderPipeline),
    BindGroup(u32, &'a wgpu::BindGroup),
    VertexBuffer(u32, wgpu::BufferSlice<'a>),
    IndexBuffer(wgpu::BufferSlice<'a>),
    Viewport([f32; 4]),
    Draw(Range<u32>, Range<u32>),
    DrawIndexed(Range<u32>, Range<u32>),
}

impl<'a> BoundOp<'a> {
    fn encode(self, pass: &mut wgpu::RenderPass<'a>) {
        match self {
            BoundOp::Pipeline(pipeline) => pass.set_pipeline(pipeline),
            BoundOp::BindGroup(index, group) => pass.set_bind_group(index, group, &[]),
            BoundOp::VertexBuffer(slot, slice) => pass.set_vertex_buffer(slot, slice),
            BoundOp::IndexBuffer(slice) => pass.set_index_buffer(slice, wgpu::IndexFormat::Uint32),
            BoundOp::Viewport([x, y, width, height]) => pass.set_viewport(x, y, width, height, 0.0, 1.0),
            BoundOp::Draw(vertices, instances) => pass.draw(vertices, instances),
            BoundOp::DrawIndexed(indices, instances) => pass.draw_indexed(indices, 0, instances),
        }
    }
}

/// Pass begun with `begin_render_pass` and not yet encoded
pub(super) struct RecordedPass {
    pub desc: RenderPassDescriptor,
    pub ops: Vec<PassOp>,
}

impl RecordedPass {
    pub fn new(desc: &RenderPassDescriptor) -> Self {
        Self {
            desc: desc.clone(),
            ops: Vec::new(),
        }
    }

    fn bind<'a>(&self, resources: &'a Resources) -> BackendResult<Vec<BoundOp<'a>>> {
        self.ops
            .iter()
            .map(|op| -> BackendResult<BoundOp<'a>> {
                Ok(match op {
                    PassOp::Pipeline(handle) => BoundOp::Pipeline(resources.pipelines.get(handle.0)?),
                    PassOp::BindGroup(index, handle) => {
                        BoundOp::BindGroup(*index, resources.bind_groups.get(handle.0)?)
                    }
                    PassOp::VertexBuffer(slot, handle, offset) => {
                        BoundOp::VertexBuffer(*slot, resources.buffers.get(handle.0)?.slice(*offset..))
                    }
                    PassOp::IndexBuffer(handle, offset) => {
                        BoundOp::IndexBuffer(resources.buffers.get(handle.0)?.slice(*offset..))
                    }
                    PassOp::Viewport { x, y, width, height } => BoundOp::Viewport([*x, *y, *width, *height]),
                    PassOp::Draw(vertices, instances) => BoundOp::Draw(vertices.clone(), instances.clone()),
                    PassOp::DrawIndexed(indices, instances) => {
                        BoundOp::DrawIndexed(indices.clone(), instances.clone())
                    }
                })
            })
            .collect()
    }

    /// Encode the pass into `encoder`. Nothing is encoded if any handle is unknown.
    pub fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        resources: &Resources,
        frame: Option<&AcquiredFrame>,
    ) -> BackendResult<()> {
        let ops = self.bind(resources)?;

        let color_attachments = self
            .desc
            .color_attachments
            .iter()
            .map(|attachment| -> BackendResult<_> {
                Ok(Some(wgpu::RenderPassColorAttachment {
                    view: resources.view(frame, attachment.view)?,
                    resolve_target: None,
                    ops: attachment.to_wgpu(),
                }))
            })
            .collect::<BackendResult<Vec<_>>>()?;

        let depth_stencil_attachment = self
            .desc
            .depth_stencil_attachment
            .as_ref()
            .map(|attachment| -> BackendResult<_> {
                Ok(wgpu::RenderPassDepthStencilAttachment {
                    view: resources.view(frame, attachment.view)?,
                    depth_ops: Some(attachment.to_wgpu()),
                    stencil_ops: None,
                })
            })
            .transpose()?;

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: self.desc.label.as_deref(),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        for op in ops {
            op.encode(&mut pass);
        }
        Ok(())
    }
}
