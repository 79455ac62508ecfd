//! # Deferred PBR Demo
//!
//! Demonstrates:
//! - Deferred shading of a grid of spheres with varying metallic/roughness
//! - Image-based lighting from an HDR panorama (`--hdr`), baked on the GPU or
//!   with `--cpu-bake` on the CPU
//! - An optional textured material loaded from a directory (`--material`)
//! - G-buffer debug overlay and frame timing text
//!
//! Controls:
//! - Arrow keys: orbit the camera
//! - W / S: zoom
//! - G: cycle the G-buffer debug view
//! - H: toggle the text overlay
//! - Q / E: exposure down / up
//! - Escape: quit

use std::error::Error;
use std::f32::consts::PI;
use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use deferred_pbr::backend::GraphicsBackend;
use deferred_pbr::ibl::{bake_cpu, upload_cpu_products, BakedIbl, EquirectImage, IblBaker, IblConfig};
use deferred_pbr::resources::{
    HdrImage, MaterialDescriptor, Mesh, MissingTexturePolicy, PbrMaterial, DEFAULT_EXTENSIONS,
};
use deferred_pbr::scene::{Camera, DrawItem, Scene};
use deferred_pbr::window::{self, AppEvent};
use deferred_pbr::{
    DeferredRenderer, EguiOverlay, ForwardExtra, FrameContext, FrameStatus, RendererConfig, WgpuBackend, Window,
};
use glam::{Mat4, Vec3};
use winit::event_loop::EventLoop;
use winit::keyboard::KeyCode;

const GRID_SIZE: usize = 5;
const SPHERE_SPACING: f32 = 2.5;

#[derive(Parser, Debug)]
#[command(name = "pbr_deferred", about = "Deferred PBR renderer with image-based lighting")]
struct Args {
    /// Equirectangular Radiance HDR panorama used for lighting and the sky
    #[arg(long)]
    hdr: Option<PathBuf>,

    /// Directory holding albedo/normal/metallic/roughness/ao maps for the centre sphere
    #[arg(long)]
    material: Option<PathBuf>,

    /// Initial window width in pixels.
    #[arg(long, default_value = "1280")]
    width: u32,

    /// Initial window height in pixels.
    #[arg(long, default_value = "720")]
    height: u32,

    /// Disable vertical sync (may cause tearing).
    #[arg(long)]
    no_vsync: bool,

    /// Run the IBL precompute on the CPU instead of the GPU
    #[arg(long)]
    cpu_bake: bool,
}

/// Orbit camera controller
struct OrbitCamera {
    distance: f32,
    azimuth: f32,
    elevation: f32,
}

impl OrbitCamera {
    fn rotate(&mut self, delta_azimuth: f32, delta_elevation: f32) {
        self.azimuth += delta_azimuth;
        self.elevation = (self.elevation + delta_elevation).clamp(-PI / 2.0 + 0.1, PI / 2.0 - 0.1);
    }

    fn zoom(&mut self, delta: f32) {
        self.distance = (self.distance - delta).clamp(4.0, 40.0);
    }

    fn position(&self) -> Vec3 {
        Vec3::new(
            self.distance * self.elevation.cos() * self.azimuth.sin(),
            self.distance * self.elevation.sin(),
            self.distance * self.elevation.cos() * self.azimuth.cos(),
        )
    }
}

/// Sky gradient used when no panorama is given
fn procedural_sky() -> Option<EquirectImage> {
    EquirectImage::from_fn(512, 256, |dir| {
        let sky = Vec3::new(0.35, 0.55, 0.9).lerp(Vec3::new(0.05, 0.1, 0.3), dir.y.max(0.0));
        let ground = Vec3::splat(0.08);
        let sun = Vec3::new(20.0, 18.0, 15.0) * dir.dot(Vec3::new(0.4, 0.6, 0.3).normalize()).max(0.0).powf(256.0);
        if dir.y >= 0.0 {
            sky + sun
        } else {
            ground
        }
    })
}

fn load_environment(args: &Args) -> Result<EquirectImage, Box<dyn Error>> {
    let Some(path) = &args.hdr else {
        log::info!("No --hdr given, using a procedural sky");
        return procedural_sky().ok_or_else(|| "procedural sky has no pixels".into());
    };
    log::info!("Loading HDR panorama {}", path.display());
    HdrImage::from_file(path)?
        .into_equirect()
        .ok_or_else(|| format!("{} has no pixels", path.display()).into())
}

fn bake_ibl(backend: &mut WgpuBackend, image: &EquirectImage, config: IblConfig, cpu: bool) -> Result<BakedIbl, Box<dyn Error>> {
    let start = Instant::now();
    let ibl = if cpu {
        let products = bake_cpu(image, &config)?;
        upload_cpu_products(backend, &products)?
    } else {
        let mut baker = IblBaker::new(backend, config)?;
        let ibl = baker.bake(backend, image)?;
        baker.destroy(backend);
        ibl
    };
    log::info!("IBL baked in {:.2}s", start.elapsed().as_secs_f32());
    Ok(ibl)
}

fn build_scene(
    backend: &mut WgpuBackend,
    renderer: &DeferredRenderer<WgpuBackend>,
    args: &Args,
) -> Result<(Scene, Vec<PbrMaterial>), Box<dyn Error>> {
    let layout = renderer.material_layout();
    let sphere = Mesh::sphere(64, 64).upload(backend)?;
    let mut scene = Scene::default();
    let mut materials = Vec::new();

    let offset = (GRID_SIZE as f32 - 1.0) * SPHERE_SPACING * 0.5;
    for row in 0..GRID_SIZE {
        let metallic = row as f32 / (GRID_SIZE - 1) as f32;
        for col in 0..GRID_SIZE {
            let roughness = (col as f32 / (GRID_SIZE - 1) as f32).clamp(0.05, 1.0);
            let center = row == GRID_SIZE / 2 && col == GRID_SIZE / 2;

            let material = match (&args.material, center) {
                (Some(dir), true) => {
                    let desc = MaterialDescriptor::probe_directory(dir, DEFAULT_EXTENSIONS)?;
                    PbrMaterial::load(backend, &desc, MissingTexturePolicy::Default, layout)?
                }
                _ => PbrMaterial::from_constants(
                    backend,
                    &format!("sphere_{}_{}", row, col),
                    Vec3::new(0.5, 0.0, 0.0),
                    metallic,
                    roughness,
                    1.0,
                    layout,
                )?,
            };

            let position = Vec3::new(col as f32 * SPHERE_SPACING - offset, row as f32 * SPHERE_SPACING - offset, 0.0);
            scene.add_item(DrawItem::new(&sphere, &material, Mat4::from_translation(position)));
            materials.push(material);
        }
    }

    for (x, y) in [(-10.0, 10.0), (10.0, 10.0), (-10.0, -10.0), (10.0, -10.0)] {
        scene.add_point_light(Vec3::new(x, y, 10.0), Vec3::splat(300.0));
    }
    Ok((scene, materials))
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = RendererConfig {
        title: "Deferred PBR".to_string(),
        width: args.width,
        height: args.height,
        vsync: !args.no_vsync,
        ..Default::default()
    };

    let event_loop = EventLoop::new()?;
    let window = Window::new(&event_loop, &config.title, config.width, config.height)?;
    let mut backend = WgpuBackend::new(window.window_arc(), config.vsync)?;

    let environment = load_environment(&args)?;
    let ibl = bake_ibl(&mut backend, &environment, config.ibl, args.cpu_bake)?;
    let mut renderer = DeferredRenderer::new(&mut backend, &config, Some(ibl))?;
    // Materials own the textures their bind groups reference
    let (mut scene, _materials) = build_scene(&mut backend, &renderer, &args)?;
    let mut overlay = EguiOverlay::new(&backend, window.window_arc());

    let mut orbit = OrbitCamera {
        distance: 18.0,
        azimuth: 0.0,
        elevation: 0.0,
    };
    let (width, height) = backend.surface_size();
    let mut frame = FrameContext::new(width, height);
    let mut last_frame = Instant::now();

    window::run(event_loop, window, move |window, event| match event {
        AppEvent::Window(event) => {
            overlay.on_window_event(event);
        }
        AppEvent::Frame => {
            if let Some((width, height)) = window.take_resize() {
                if let Err(err) = renderer.resize(&mut backend, width, height) {
                    log::error!("Resize failed: {}", err);
                }
            }

            for key in window.take_pressed_keys() {
                match key {
                    KeyCode::Escape => window.request_close(),
                    KeyCode::ArrowLeft => orbit.rotate(-0.1, 0.0),
                    KeyCode::ArrowRight => orbit.rotate(0.1, 0.0),
                    KeyCode::ArrowUp => orbit.rotate(0.0, 0.1),
                    KeyCode::ArrowDown => orbit.rotate(0.0, -0.1),
                    KeyCode::KeyW => orbit.zoom(1.0),
                    KeyCode::KeyS => orbit.zoom(-1.0),
                    KeyCode::KeyG => renderer.set_debug_view(renderer.debug_view().next()),
                    KeyCode::KeyH => overlay.set_visible(!overlay.is_visible()),
                    KeyCode::KeyQ | KeyCode::KeyE => {
                        let mut settings = *renderer.lighting_settings();
                        let step = if key == KeyCode::KeyE { 1.25 } else { 0.8 };
                        settings.exposure = (settings.exposure * step).clamp(0.05, 20.0);
                        renderer.set_lighting_settings(settings);
                    }
                    _ => {}
                }
            }

            let now = Instant::now();
            let (width, height) = renderer.size();
            frame = frame.advance(now.duration_since(last_frame).as_secs_f32(), width, height);
            last_frame = now;

            scene.camera = Camera::new(orbit.position(), Vec3::ZERO);
            scene.camera.set_aspect(width, height);
            overlay.set_lines(vec![
                format!("debug view: {:?}  (G)", renderer.debug_view()),
                format!("exposure: {:.2}  (Q/E)", renderer.lighting_settings().exposure),
            ]);

            let mut extras: [&mut dyn ForwardExtra<WgpuBackend>; 1] = [&mut overlay];
            match renderer.render_frame(&mut backend, &scene, &frame, &mut extras) {
                Ok(FrameStatus::Presented) => {}
                Ok(FrameStatus::Skipped) => log::debug!("Frame {} skipped", frame.frame_index),
                Err(err) => {
                    log::warn!("Frame {} not rendered: {}", frame.frame_index, err);
                    // A lost surface comes back after reconfiguring it
                    let (width, height) = window.dimensions();
                    backend.resize(width, height);
                }
            }
        }
    })?;
    Ok(())
}
