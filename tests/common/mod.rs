//! Common utilities for renderer integration tests.
//!
//! Everything runs on the headless [`RecordingBackend`], so the tests check
//! the command stream the renderer produces rather than pixels.

#![allow(dead_code)]

use deferred_pbr::backend::{CommandLog, RecordedCommand, RecordingBackend};
use deferred_pbr::ibl::{bake_cpu, upload_cpu_products, BakedIbl, EquirectImage, IblBaker, IblConfig};
use deferred_pbr::resources::{Mesh, PbrMaterial};
use deferred_pbr::scene::{Camera, DrawItem, Scene};
use deferred_pbr::{DeferredRenderer, FrameContext, FrameStatus, RendererConfig};
use glam::{Mat4, Vec3};

// ============================================================================
// IBL Bake Modes
// ============================================================================

/// Where the precompute chain runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BakeMode {
    /// Kernels on the CPU, products uploaded afterwards
    Cpu,
    /// Capture passes recorded on the backend
    Gpu,
}

/// Panorama with a bright upper hemisphere and some colour variation
pub fn test_panorama() -> EquirectImage {
    EquirectImage::from_fn(32, 16, |dir| {
        Vec3::new(0.4, 0.5, 0.6) + Vec3::new(dir.x.abs(), dir.y.max(0.0), dir.z.abs()) * 0.5
    })
    .expect("panorama")
}

pub fn bake(backend: &mut RecordingBackend, config: IblConfig, mode: BakeMode) -> BakedIbl {
    let image = test_panorama();
    match mode {
        BakeMode::Cpu => {
            let cpu = bake_cpu(&image, &config).expect("CPU bake");
            upload_cpu_products(backend, &cpu).expect("upload")
        }
        BakeMode::Gpu => {
            let mut baker = IblBaker::new(backend, config).expect("baker");
            let ibl = baker.bake(backend, &image).expect("GPU bake");
            baker.destroy(backend);
            ibl
        }
    }
}

// ============================================================================
// Test Context
// ============================================================================

/// A renderer with a small scene, ready to draw frames
pub struct TestContext {
    pub backend: RecordingBackend,
    pub renderer: DeferredRenderer<RecordingBackend>,
    pub scene: Scene,
    pub log: CommandLog,
    frame: FrameContext,
    // Kept alive for the bind groups the scene refers to
    _materials: Vec<PbrMaterial>,
}

impl TestContext {
    pub fn new(width: u32, height: u32, mode: BakeMode) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut backend = RecordingBackend::new(width, height);
        let config = RendererConfig {
            width,
            height,
            ibl: IblConfig::fast(),
            ..Default::default()
        };
        let ibl = bake(&mut backend, config.ibl, mode);
        let renderer = DeferredRenderer::new(&mut backend, &config, Some(ibl)).expect("renderer");

        let sphere = Mesh::sphere(8, 8).upload(&mut backend).expect("sphere");
        let cube = Mesh::cube().upload(&mut backend).expect("cube");
        let layout = renderer.material_layout();
        let materials = vec![
            PbrMaterial::from_constants(&mut backend, "rough", Vec3::new(0.8, 0.1, 0.1), 0.0, 0.9, 1.0, layout)
                .expect("material"),
            PbrMaterial::from_constants(&mut backend, "metal", Vec3::new(0.9, 0.9, 0.9), 1.0, 0.2, 1.0, layout)
                .expect("material"),
        ];

        let mut scene = Scene::new(Camera::new(Vec3::new(0.0, 1.0, 5.0), Vec3::ZERO));
        scene.camera.set_aspect(width, height);
        scene.add_item(DrawItem::new(&sphere, &materials[0], Mat4::from_translation(Vec3::X * -1.5)));
        scene.add_item(DrawItem::new(&cube, &materials[1], Mat4::from_translation(Vec3::X * 1.5)));
        scene.add_point_light(Vec3::new(0.0, 4.0, 4.0), Vec3::splat(50.0));

        let log = backend.command_log();
        log.take();

        Self {
            backend,
            renderer,
            scene,
            log,
            frame: FrameContext::new(width, height),
            _materials: materials,
        }
    }

    /// Render one frame and return the commands it recorded
    pub fn render(&mut self) -> (FrameStatus, Vec<RecordedCommand>) {
        self.log.take();
        let status = self
            .renderer
            .render_frame(&mut self.backend, &self.scene, &self.frame, &mut [])
            .expect("frame");
        self.frame = self.frame.advance(1.0 / 60.0, self.frame.width, self.frame.height);
        (status, self.log.take())
    }
}

// ============================================================================
// Command Stream Queries
// ============================================================================

/// Labels of the render passes in recording order
pub fn pass_labels(commands: &[RecordedCommand]) -> Vec<String> {
    commands
        .iter()
        .filter_map(|c| match c {
            RecordedCommand::BeginRenderPass { label, .. } => label.clone(),
            _ => None,
        })
        .collect()
}

/// Index of the first render pass with `label`
pub fn pass_index(commands: &[RecordedCommand], label: &str) -> Option<usize> {
    commands.iter().position(|c| {
        matches!(c, RecordedCommand::BeginRenderPass { label: Some(l), .. } if l == label)
    })
}

pub fn count(commands: &[RecordedCommand], pred: impl Fn(&RecordedCommand) -> bool) -> usize {
    commands.iter().filter(|c| pred(c)).count()
}
