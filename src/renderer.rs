//! Per-frame orchestration of the deferred pipeline.
//!
//! [`DeferredRenderer`] owns the offscreen targets, the render graph and the
//! baked IBL products, if any. Each frame it acquires the swapchain, runs the graph
//! (G-buffer, lighting, depth blit, skybox, debug overlay), lets any
//! [`ForwardExtra`] draw on top and presents.

use crate::backend::traits::*;
use crate::backend::types::TextureFormat;
use crate::error::RendererResult;
use crate::framebuffer::{AttachmentRole, Framebuffer, FramebufferBuilder, FramebufferError, SurfaceDescriptor};
use crate::ibl::{BakedIbl, IblConfig};
use crate::pipeline::*;
use crate::render_graph::{BoundTexture, CompiledGraph, PassId, RenderGraph, RenderGraphExecutor};
use crate::scene::Scene;

/// Timing and size of the frame being rendered
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameContext {
    pub frame_index: u64,
    /// Seconds since the previous frame
    pub delta_time: f32,
    /// Seconds since the first frame
    pub elapsed: f32,
    pub width: u32,
    pub height: u32,
}

impl FrameContext {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            frame_index: 0,
            delta_time: 0.0,
            elapsed: 0.0,
            width,
            height,
        }
    }

    /// Context of the frame after this one
    pub fn advance(&self, delta_time: f32, width: u32, height: u32) -> Self {
        Self {
            frame_index: self.frame_index + 1,
            delta_time,
            elapsed: self.elapsed + delta_time,
            width,
            height,
        }
    }

    pub fn fps(&self) -> f32 {
        if self.delta_time > 0.0 {
            1.0 / self.delta_time
        } else {
            0.0
        }
    }
}

/// Configuration for creating a renderer and its window
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Window title
    pub title: String,
    /// Initial window width
    pub width: u32,
    /// Initial window height
    pub height: u32,
    /// Enable vsync
    pub vsync: bool,
    pub ibl: IblConfig,
    /// Colour of pixels no geometry covers, before the skybox
    pub clear_color: [f32; 4],
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            title: "Deferred PBR".to_string(),
            width: 1280,
            height: 720,
            vsync: true,
            ibl: IblConfig::default(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// What happened to a frame handed to [`DeferredRenderer::render_frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// A pass failed; the frame was dropped without presenting
    Skipped,
}

/// Graph ids of the passes the renderer adds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredPassIds {
    pub gbuffer: PassId,
    pub lighting: PassId,
    pub depth_blit: PassId,
    pub skybox: PassId,
    pub debug_overlay: PassId,
}

/// Deferred PBR renderer
pub struct DeferredRenderer<B: GraphicsBackend> {
    gbuffer: Framebuffer,
    presentation_depth: Framebuffer,
    graph: RenderGraph<B>,
    compiled: CompiledGraph,
    executor: RenderGraphExecutor,
    resources: DeferredResources,
    passes: DeferredPassIds,
    ibl: Option<BakedIbl>,
    material_layout: BindGroupLayoutHandle,
    settings: LightingSettings,
    debug_view: DebugView,
}

impl<B: GraphicsBackend> DeferredRenderer<B> {
    /// Allocate the targets, build the passes and compile the graph.
    ///
    /// Without `ibl` the scene gets a flat ambient term and no skybox.
    pub fn new(backend: &mut B, config: &RendererConfig, ibl: Option<BakedIbl>) -> RendererResult<Self> {
        let (width, height) = backend.surface_size();
        let target_format = backend.swapchain_format();

        let gbuffer = FramebufferBuilder::build(backend, &SurfaceDescriptor::gbuffer(), width, height)?;
        let presentation_depth =
            FramebufferBuilder::build(backend, &SurfaceDescriptor::presentation_depth(), width, height)?;
        let depth_format = presentation_depth
            .depth_format()
            .ok_or(FramebufferError::MissingAttachment(AttachmentRole::Depth))?;

        let settings = LightingSettings {
            clear_color: config.clear_color,
            ..LightingSettings::for_target(target_format)
        };

        let mut graph = RenderGraph::new();
        let resources = DeferredResources::import(&mut graph)?;

        let gbuffer_pass = GBufferPass::new(backend, resources)?;
        let material_layout = gbuffer_pass.material_layout();
        let passes = DeferredPassIds {
            gbuffer: graph.add_pass(gbuffer_pass),
            lighting: graph.add_pass(LightingPass::new(backend, resources, ibl.as_ref(), target_format, settings)?),
            depth_blit: graph.add_pass(DepthBlitPass::new(resources)),
            skybox: graph.add_pass(SkyboxPass::new(
                backend,
                resources,
                ibl.as_ref(),
                target_format,
                depth_format,
                settings,
            )?),
            debug_overlay: graph.add_pass(DebugOverlayPass::new(backend, resources, target_format)?),
        };
        let compiled = graph.compile()?;

        log::info!(
            "Deferred renderer ready: {}x{}, {:?} output, {} passes, {} barriers",
            width,
            height,
            target_format,
            compiled.pass_order.len(),
            compiled.barriers.len()
        );

        let mut renderer = Self {
            gbuffer,
            presentation_depth,
            graph,
            compiled,
            executor: RenderGraphExecutor::new(),
            resources,
            passes,
            ibl,
            material_layout,
            settings,
            debug_view: DebugView::Off,
        };
        renderer.bind_targets();
        Ok(renderer)
    }

    /// Point the graph resources at the current framebuffer textures
    fn bind_targets(&mut self) {
        let targets = [
            (self.resources.position, self.gbuffer.attachment(AttachmentRole::Position)),
            (self.resources.normal, self.gbuffer.attachment(AttachmentRole::Normal)),
            (self.resources.albedo, self.gbuffer.attachment(AttachmentRole::Albedo)),
            (self.resources.gbuffer_depth, self.gbuffer.attachment(AttachmentRole::Depth)),
            (
                self.resources.scene_depth,
                self.presentation_depth.attachment(AttachmentRole::Depth),
            ),
        ];
        for (resource, attachment) in targets {
            if let Some(attachment) = attachment {
                self.executor.bind(
                    resource,
                    BoundTexture {
                        texture: Some(attachment.texture),
                        view: attachment.view,
                    },
                );
            }
        }
    }

    /// Layout that [`crate::resources::PbrMaterial`] bind groups must be created with
    pub fn material_layout(&self) -> BindGroupLayoutHandle {
        self.material_layout
    }

    /// Draw one frame and present it.
    ///
    /// Only acquiring the swapchain image can fail; a failing pass or extra is
    /// logged and the frame is dropped.
    pub fn render_frame(
        &mut self,
        backend: &mut B,
        scene: &Scene,
        frame: &FrameContext,
        extras: &mut [&mut dyn ForwardExtra<B>],
    ) -> RendererResult<FrameStatus> {
        let target = backend.begin_frame()?;
        self.executor
            .bind_swapchain(self.resources.swapchain, target.swapchain_view);

        // Viewports and the depth copy follow the offscreen targets
        let (width, height) = self.gbuffer.size();
        let frame = FrameContext {
            width,
            height,
            ..*frame
        };

        if let Err(err) = self
            .executor
            .execute(&mut self.graph, &self.compiled, backend, &frame, scene)
        {
            log::error!("Skipping frame {}: {}", frame.frame_index, err);
            backend.discard_frame();
            return Ok(FrameStatus::Skipped);
        }

        for extra in extras.iter_mut() {
            if let Err(err) = extra.draw(backend, &target, &frame) {
                log::error!(
                    "Skipping frame {}: '{}' failed: {}",
                    frame.frame_index,
                    extra.name(),
                    err
                );
                backend.discard_frame();
                return Ok(FrameStatus::Skipped);
            }
        }

        backend.end_frame()?;
        Ok(FrameStatus::Presented)
    }

    /// Resize the surface and every offscreen target.
    ///
    /// A zero-sized request (minimised window) is ignored.
    pub fn resize(&mut self, backend: &mut B, width: u32, height: u32) -> RendererResult<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        backend.resize(width, height);

        // Get actual surface size (may be clamped by device limits)
        let (width, height) = backend.surface_size();

        // Allocate both before swapping either so the depth copy always sees matching sizes
        let gbuffer = self.gbuffer.allocate_resize(backend, width, height)?;
        let depth = match self.presentation_depth.allocate_resize(backend, width, height) {
            Ok(depth) => depth,
            Err(err) => {
                if let Some(gbuffer) = gbuffer {
                    gbuffer.discard(backend);
                }
                return Err(err.into());
            }
        };
        if gbuffer.is_none() && depth.is_none() {
            return Ok(());
        }
        if let Some(gbuffer) = gbuffer {
            self.gbuffer.apply_resize(backend, gbuffer);
        }
        if let Some(depth) = depth {
            self.presentation_depth.apply_resize(backend, depth);
        }
        log::info!("Renderer resized to {}x{}", width, height);
        self.bind_targets();
        Ok(())
    }

    pub fn size(&self) -> (u32, u32) {
        self.gbuffer.size()
    }

    pub fn debug_view(&self) -> DebugView {
        self.debug_view
    }

    pub fn set_debug_view(&mut self, view: DebugView) {
        self.debug_view = view;
        if let Some(pass) = self
            .graph
            .pass_as_mut::<DebugOverlayPass>(self.passes.debug_overlay)
        {
            pass.set_view(view);
        }
    }

    pub fn lighting_settings(&self) -> &LightingSettings {
        &self.settings
    }

    /// Exposure, gamma and clear colour for both the lit scene and the sky
    pub fn set_lighting_settings(&mut self, settings: LightingSettings) {
        self.settings = settings;
        if let Some(pass) = self.graph.pass_as_mut::<LightingPass>(self.passes.lighting) {
            pass.set_settings(settings);
        }
        if let Some(pass) = self.graph.pass_as_mut::<SkyboxPass>(self.passes.skybox) {
            pass.set_settings(settings);
        }
    }

    /// Show a blurrier environment mip behind the scene
    pub fn set_skybox_lod(&mut self, lod: f32) {
        if let Some(pass) = self.graph.pass_as_mut::<SkyboxPass>(self.passes.skybox) {
            pass.set_lod(lod);
        }
    }

    pub fn gbuffer(&self) -> &Framebuffer {
        &self.gbuffer
    }

    pub fn graph(&self) -> &RenderGraph<B> {
        &self.graph
    }

    pub fn compiled_graph(&self) -> &CompiledGraph {
        &self.compiled
    }

    pub fn resources(&self) -> DeferredResources {
        self.resources
    }

    pub fn pass_ids(&self) -> DeferredPassIds {
        self.passes
    }

    pub fn ibl(&self) -> Option<&BakedIbl> {
        self.ibl.as_ref()
    }

    /// Format of the depth buffer forward extras can test against
    pub fn presentation_depth_format(&self) -> Option<TextureFormat> {
        self.presentation_depth.depth_format()
    }

    /// Release the offscreen targets and IBL textures
    pub fn destroy(self, backend: &mut B) {
        self.gbuffer.destroy(backend);
        self.presentation_depth.destroy(backend);
        if let Some(ibl) = self.ibl {
            ibl.destroy(backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendResult, RecordedCommand, RecordingBackend};
    use crate::ibl::{bake_cpu, upload_cpu_products, EquirectImage};
    use crate::resources::{Mesh, PbrMaterial};
    use crate::scene::{Camera, DrawItem};
    use glam::{Mat4, Vec3};

    fn renderer(backend: &mut RecordingBackend) -> DeferredRenderer<RecordingBackend> {
        let config = RendererConfig {
            ibl: IblConfig::fast(),
            ..Default::default()
        };
        let panorama = EquirectImage::from_fn(32, 16, |dir| Vec3::splat(0.5) + dir * 0.25).unwrap();
        let cpu = bake_cpu(&panorama, &config.ibl).unwrap();
        let ibl = upload_cpu_products(backend, &cpu).unwrap();
        DeferredRenderer::new(backend, &config, Some(ibl)).unwrap()
    }

    fn scene(backend: &mut RecordingBackend, renderer: &DeferredRenderer<RecordingBackend>) -> Scene {
        let material = PbrMaterial::from_constants(
            backend,
            "gold",
            Vec3::new(1.0, 0.78, 0.34),
            1.0,
            0.3,
            1.0,
            renderer.material_layout(),
        )
        .unwrap();
        let sphere = Mesh::sphere(8, 8).upload(backend).unwrap();
        let mut scene = Scene::new(Camera::new(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO));
        scene.add_point_light(Vec3::new(2.0, 2.0, 2.0), Vec3::splat(30.0));
        scene.add_item(DrawItem::new(&sphere, &material, Mat4::IDENTITY));
        scene
    }

    fn pass_labels(commands: &[RecordedCommand]) -> Vec<String> {
        commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::BeginRenderPass { label, .. } => label.clone(),
                _ => None,
            })
            .collect()
    }

    struct CountingExtra {
        calls: usize,
        fail: bool,
    }

    impl ForwardExtra<RecordingBackend> for CountingExtra {
        fn name(&self) -> &str {
            "Counting Extra"
        }

        fn draw(
            &mut self,
            _backend: &mut RecordingBackend,
            _target: &FrameTarget,
            _frame: &FrameContext,
        ) -> BackendResult<()> {
            self.calls += 1;
            if self.fail {
                Err(BackendError::SurfaceLost)
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_frame_context_advances() {
        let frame = FrameContext::new(800, 600).advance(0.5, 800, 600).advance(0.25, 640, 480);
        assert_eq!(frame.frame_index, 2);
        assert_eq!(frame.elapsed, 0.75);
        assert_eq!(frame.fps(), 4.0);
        assert_eq!((frame.width, frame.height), (640, 480));
        assert_eq!(FrameContext::new(1, 1).fps(), 0.0);
    }

    #[test]
    fn test_passes_run_in_pipeline_order() {
        let mut backend = RecordingBackend::new(64, 48);
        let mut renderer = renderer(&mut backend);
        let scene = scene(&mut backend, &renderer);
        renderer.set_debug_view(DebugView::Normal);

        let log = backend.command_log();
        log.take();
        let status = renderer
            .render_frame(&mut backend, &scene, &FrameContext::new(64, 48), &mut [])
            .unwrap();
        assert_eq!(status, FrameStatus::Presented);

        let commands = log.snapshot();
        assert_eq!(
            pass_labels(&commands),
            ["G-Buffer Pass", "Deferred Lighting Pass", "Skybox", "Debug Overlay"]
        );

        let copy = commands
            .iter()
            .position(|c| matches!(c, RecordedCommand::CopyTexture { .. }))
            .unwrap();
        let begin = |name: &str| {
            commands
                .iter()
                .position(|c| matches!(c, RecordedCommand::BeginRenderPass { label: Some(l), .. } if l == name))
                .unwrap()
        };
        let (lighting, skybox) = (begin("Deferred Lighting Pass"), begin("Skybox"));
        assert!(lighting < copy && copy < skybox);
        assert_eq!(commands.last(), Some(&RecordedCommand::Present));
    }

    #[test]
    fn test_debug_overlay_off_draws_nothing() {
        let mut backend = RecordingBackend::new(64, 48);
        let mut renderer = renderer(&mut backend);
        let scene = scene(&mut backend, &renderer);

        let log = backend.command_log();
        log.take();
        renderer
            .render_frame(&mut backend, &scene, &FrameContext::new(64, 48), &mut [])
            .unwrap();
        assert!(!pass_labels(&log.snapshot()).iter().any(|l| l == "Debug Overlay"));
    }

    #[test]
    fn test_extras_draw_after_graph() {
        let mut backend = RecordingBackend::new(64, 48);
        let mut renderer = renderer(&mut backend);
        let scene = scene(&mut backend, &renderer);
        let mut extra = CountingExtra {
            calls: 0,
            fail: false,
        };

        for _ in 0..2 {
            renderer
                .render_frame(&mut backend, &scene, &FrameContext::new(64, 48), &mut [&mut extra])
                .unwrap();
        }
        assert_eq!(extra.calls, 2);
    }

    #[test]
    fn test_failed_pass_skips_frame() {
        let mut backend = RecordingBackend::new(64, 48);
        let mut renderer = renderer(&mut backend);
        let scene = scene(&mut backend, &renderer);
        let mut extra = CountingExtra {
            calls: 0,
            fail: false,
        };
        // Every pass now fails to resolve its targets
        renderer.executor.clear();

        let log = backend.command_log();
        log.take();
        let status = renderer
            .render_frame(&mut backend, &scene, &FrameContext::new(64, 48), &mut [&mut extra])
            .unwrap();

        assert_eq!(status, FrameStatus::Skipped);
        assert_eq!(extra.calls, 0);
        let commands = log.snapshot();
        assert!(commands.contains(&RecordedCommand::DiscardFrame));
        assert!(!commands.contains(&RecordedCommand::Present));
    }

    #[test]
    fn test_failed_extra_skips_frame() {
        let mut backend = RecordingBackend::new(64, 48);
        let mut renderer = renderer(&mut backend);
        let scene = scene(&mut backend, &renderer);
        let mut extra = CountingExtra {
            calls: 0,
            fail: true,
        };

        let status = renderer
            .render_frame(&mut backend, &scene, &FrameContext::new(64, 48), &mut [&mut extra])
            .unwrap();
        assert_eq!(status, FrameStatus::Skipped);

        // The next frame is unaffected
        extra.fail = false;
        let status = renderer
            .render_frame(&mut backend, &scene, &FrameContext::new(64, 48), &mut [&mut extra])
            .unwrap();
        assert_eq!(status, FrameStatus::Presented);
    }

    #[test]
    fn test_resize_rebinds_targets() {
        let mut backend = RecordingBackend::new(64, 48);
        let mut renderer = renderer(&mut backend);
        let scene = scene(&mut backend, &renderer);

        renderer.resize(&mut backend, 128, 96).unwrap();
        assert_eq!(renderer.size(), (128, 96));
        let position_view = renderer.gbuffer().color_view(AttachmentRole::Position).unwrap();

        let log = backend.command_log();
        log.take();
        let status = renderer
            .render_frame(&mut backend, &scene, &FrameContext::new(64, 48), &mut [])
            .unwrap();
        assert_eq!(status, FrameStatus::Presented);

        let commands = log.snapshot();
        assert!(commands.iter().any(|c| matches!(
            c,
            RecordedCommand::BeginRenderPass { color_targets, .. } if color_targets.first() == Some(&position_view)
        )));
        assert!(commands.iter().any(|c| matches!(
            c,
            RecordedCommand::CopyTexture { width: 128, height: 96, .. }
        )));
    }

    #[test]
    fn test_renders_without_ibl() {
        let mut backend = RecordingBackend::new(64, 48);
        let config = RendererConfig::default();
        let mut renderer = DeferredRenderer::new(&mut backend, &config, None).unwrap();
        assert!(renderer.ibl().is_none());
        let scene = scene(&mut backend, &renderer);

        let log = backend.command_log();
        log.take();
        let status = renderer
            .render_frame(&mut backend, &scene, &FrameContext::new(64, 48), &mut [])
            .unwrap();
        assert_eq!(status, FrameStatus::Presented);

        // Lighting still runs; there is no environment to draw behind it
        let commands = log.snapshot();
        assert_eq!(pass_labels(&commands), ["G-Buffer Pass", "Deferred Lighting Pass"]);
        let lighting = renderer
            .graph
            .pass_as_mut::<LightingPass>(renderer.passes.lighting)
            .unwrap();
        assert!(!lighting.has_ibl());
    }

    #[test]
    fn test_failed_resize_keeps_targets_matched() {
        let mut backend = RecordingBackend::new(64, 48);
        let mut renderer = renderer(&mut backend);
        let gbuffer_depth = renderer.gbuffer().depth_texture();
        let live = backend.live_texture_count();

        // The G-buffer fits, the presentation depth does not
        backend.set_texture_budget(Some(live + 4));
        assert!(renderer.resize(&mut backend, 128, 96).is_err());
        assert_eq!(renderer.size(), (64, 48));
        assert_eq!(renderer.presentation_depth.size(), (64, 48));
        assert_eq!(renderer.gbuffer().depth_texture(), gbuffer_depth);
        assert_eq!(backend.live_texture_count(), live);

        backend.set_texture_budget(None);
        renderer.resize(&mut backend, 128, 96).unwrap();
        assert_eq!(renderer.size(), (128, 96));
        assert_eq!(renderer.presentation_depth.size(), (128, 96));
    }

    #[test]
    fn test_zero_size_resize_is_ignored() {
        let mut backend = RecordingBackend::new(64, 48);
        let mut renderer = renderer(&mut backend);
        renderer.resize(&mut backend, 0, 96).unwrap();
        assert_eq!(renderer.size(), (64, 48));
    }
}
