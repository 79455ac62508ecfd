//! Render graph executor

use crate::backend::traits::*;
use crate::render_graph::graph::*;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use crate::renderer::FrameContext;
use crate::scene::Scene;
use std::collections::HashMap;

/// Executor for running a compiled render graph against bound textures
pub struct RenderGraphExecutor {
    bindings: HashMap<ResourceId, BoundTexture>,
}

impl RenderGraphExecutor {
    pub fn new() -> Self {
        Self {
            bindings: HashMap::new(),
        }
    }

    /// Bind concrete backend objects to a graph resource
    pub fn bind(&mut self, resource: ResourceId, bound: BoundTexture) {
        self.bindings.insert(resource, bound);
    }

    /// Bind the swapchain view, which is acquired anew each frame
    pub fn bind_swapchain(&mut self, resource: ResourceId, view: TextureViewHandle) {
        self.bindings.insert(
            resource,
            BoundTexture {
                texture: None,
                view,
            },
        );
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    /// Execute the passes in compiled order, issuing barriers ahead of each
    pub fn execute<B: GraphicsBackend>(
        &self,
        graph: &mut RenderGraph<B>,
        compiled: &CompiledGraph,
        backend: &mut B,
        frame: &FrameContext,
        scene: &Scene,
    ) -> Result<(), RenderGraphError> {
        for &pass_id in &compiled.pass_order {
            for barrier in compiled.barriers_before(pass_id) {
                if let Some(texture) = self.bindings.get(&barrier.resource).and_then(|b| b.texture) {
                    backend.transition_texture(texture, barrier.from, barrier.to);
                }
            }

            let Some(pass) = graph.pass_mut(pass_id) else {
                continue;
            };

            let mut ctx = PassExecuteContext {
                backend: &mut *backend,
                frame,
                scene,
                bindings: &self.bindings,
            };

            pass.execute(&mut ctx)
                .map_err(|source| RenderGraphError::PassFailed {
                    pass: pass.name().to_string(),
                    source,
                })?;
        }

        Ok(())
    }
}

impl Default for RenderGraphExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RecordedCommand, RecordingBackend, TextureDescriptor, TextureUsage};
    use crate::backend::{TextureFormat, TextureViewDescriptor};

    struct WriteColor {
        target: ResourceId,
    }

    impl RenderPass<RecordingBackend> for WriteColor {
        fn name(&self) -> &str {
            "write"
        }

        fn setup(&mut self, ctx: &mut PassSetupContext) {
            ctx.write(self.target, ResourceAccess::RenderTarget);
        }

        fn execute(&mut self, ctx: &mut PassExecuteContext<RecordingBackend>) -> BackendResult<()> {
            let view = ctx.view(self.target)?;
            ctx.backend.begin_render_pass(&RenderPassDescriptor {
                label: Some("write".into()),
                color_attachments: vec![ColorAttachment {
                    view,
                    load_op: LoadOp::Clear([0.0; 4]),
                    store_op: StoreOp::Store,
                }],
                depth_stencil_attachment: None,
            });
            ctx.backend.end_render_pass();
            Ok(())
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    struct SampleColor {
        source: ResourceId,
        target: ResourceId,
    }

    impl RenderPass<RecordingBackend> for SampleColor {
        fn name(&self) -> &str {
            "sample"
        }

        fn setup(&mut self, ctx: &mut PassSetupContext) {
            ctx.read(self.source, ResourceAccess::ShaderRead);
            ctx.write(self.target, ResourceAccess::RenderTarget);
        }

        fn execute(&mut self, ctx: &mut PassExecuteContext<RecordingBackend>) -> BackendResult<()> {
            ctx.texture(self.source)?;
            Ok(())
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    #[test]
    fn test_executor_transitions_before_dependent_pass() {
        let mut backend = RecordingBackend::new(64, 64);
        let texture = backend
            .create_texture(&TextureDescriptor {
                label: Some("albedo".into()),
                width: 64,
                height: 64,
                format: TextureFormat::Rgba8Unorm,
                usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
                ..Default::default()
            })
            .unwrap();
        let view = backend
            .create_texture_view(texture, &TextureViewDescriptor::default())
            .unwrap();

        let mut graph = RenderGraph::<RecordingBackend>::new();
        let albedo = graph.import_texture("albedo").unwrap();
        let swapchain = graph.import_swapchain("swapchain").unwrap();
        graph.add_pass(WriteColor { target: albedo });
        graph.add_pass(SampleColor {
            source: albedo,
            target: swapchain,
        });
        let compiled = graph.compile().unwrap();

        let frame_target = backend.begin_frame().unwrap();
        let mut executor = RenderGraphExecutor::new();
        executor.bind(
            albedo,
            BoundTexture {
                texture: Some(texture),
                view,
            },
        );
        executor.bind_swapchain(swapchain, frame_target.swapchain_view);

        let frame = FrameContext::new(64, 64);
        let scene = Scene::default();
        executor
            .execute(&mut graph, &compiled, &mut backend, &frame, &scene)
            .unwrap();

        let log = backend.command_log().snapshot();
        let transition = log
            .iter()
            .position(|c| matches!(c, RecordedCommand::Transition { .. }))
            .unwrap();
        let end_pass = log
            .iter()
            .position(|c| matches!(c, RecordedCommand::EndRenderPass))
            .unwrap();
        assert!(end_pass < transition);
        assert!(matches!(
            log[transition],
            RecordedCommand::Transition {
                from: ResourceAccess::RenderTarget,
                to: ResourceAccess::ShaderRead,
                ..
            }
        ));
    }

    #[test]
    fn test_unbound_resource_fails_the_pass() {
        let mut backend = RecordingBackend::new(16, 16);
        let mut graph = RenderGraph::<RecordingBackend>::new();
        let target = graph.import_texture("target").unwrap();
        graph.add_pass(WriteColor { target });
        let compiled = graph.compile().unwrap();

        let executor = RenderGraphExecutor::new();
        let result = executor.execute(
            &mut graph,
            &compiled,
            &mut backend,
            &FrameContext::new(16, 16),
            &Scene::default(),
        );
        assert!(matches!(result, Err(RenderGraphError::PassFailed { .. })));
    }
}
