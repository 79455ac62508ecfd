//! Copies G-buffer depth into the depth buffer that forward passes draw
//! against, so the skybox and overlays are occluded by deferred geometry.

use crate::backend::traits::*;
use crate::pipeline::DeferredResources;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use std::any::Any;

pub struct DepthBlitPass {
    resources: DeferredResources,
}

impl DepthBlitPass {
    pub fn new(resources: DeferredResources) -> Self {
        Self { resources }
    }
}

impl<B: GraphicsBackend> RenderPass<B> for DepthBlitPass {
    fn name(&self) -> &str {
        "Depth Blit"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.read(self.resources.gbuffer_depth, ResourceAccess::TransferSrc);
        ctx.write(self.resources.scene_depth, ResourceAccess::TransferDst);
    }

    fn execute(&mut self, ctx: &mut PassExecuteContext<B>) -> BackendResult<()> {
        let src = ctx.texture(self.resources.gbuffer_depth)?;
        let dst = ctx.texture(self.resources.scene_depth)?;
        // Depth copies must cover the whole subresource
        ctx.backend
            .copy_texture_to_texture(src, dst, ctx.frame.width, ctx.frame.height);
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RecordedCommand, RecordingBackend, TextureDescriptor, TextureFormat};
    use crate::backend::{TextureUsage, TextureViewDescriptor};
    use crate::render_graph::{RenderGraph, RenderGraphExecutor};
    use crate::renderer::FrameContext;
    use crate::scene::Scene;

    #[test]
    fn test_blit_copies_full_frame() {
        let mut backend = RecordingBackend::new(40, 30);
        let mut graph = RenderGraph::<RecordingBackend>::new();
        let resources = DeferredResources::import(&mut graph).unwrap();
        graph.add_pass(DepthBlitPass::new(resources));
        let compiled = graph.compile().unwrap();

        let mut executor = RenderGraphExecutor::new();
        let mut textures = Vec::new();
        for resource in [resources.gbuffer_depth, resources.scene_depth] {
            let texture = backend
                .create_texture(&TextureDescriptor {
                    width: 40,
                    height: 30,
                    format: TextureFormat::Depth32Float,
                    usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC | TextureUsage::COPY_DST,
                    ..Default::default()
                })
                .unwrap();
            let view = backend
                .create_texture_view(texture, &TextureViewDescriptor::default())
                .unwrap();
            executor.bind(
                resource,
                BoundTexture {
                    texture: Some(texture),
                    view,
                },
            );
            textures.push(texture);
        }

        executor
            .execute(
                &mut graph,
                &compiled,
                &mut backend,
                &FrameContext::new(40, 30),
                &Scene::default(),
            )
            .unwrap();

        assert!(backend
            .command_log()
            .snapshot()
            .contains(&RecordedCommand::CopyTexture {
                src: textures[0],
                dst: textures[1],
                width: 40,
                height: 30,
            }));
    }
}
