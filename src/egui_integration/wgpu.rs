//! egui overlay drawn through the wgpu backend

use std::sync::Arc;

use egui::ViewportId;
use egui_wgpu::ScreenDescriptor;
use winit::event::WindowEvent;
use winit::window::Window;

use crate::backend::traits::{BackendResult, FrameTarget};
use crate::backend::wgpu_backend::WgpuBackend;
use crate::pipeline::ForwardExtra;
use crate::renderer::FrameContext;

/// Timing line shown in the top-left corner
pub fn frame_stats_text(frame: &FrameContext) -> String {
    format!(
        "{:.0} fps ({:.2} ms)  frame {}  {}x{}",
        frame.fps(),
        frame.delta_time * 1000.0,
        frame.frame_index,
        frame.width,
        frame.height
    )
}

/// Text overlay drawn after the deferred passes
pub struct EguiOverlay {
    window: Arc<Window>,
    /// egui context (shared state for UI)
    ctx: egui::Context,
    /// egui-winit state for input handling
    winit_state: egui_winit::State,
    /// egui-wgpu renderer for drawing
    renderer: egui_wgpu::Renderer,
    lines: Vec<String>,
    visible: bool,
}

impl EguiOverlay {
    pub fn new(backend: &WgpuBackend, window: Arc<Window>) -> Self {
        let ctx = egui::Context::default();

        let winit_state = egui_winit::State::new(
            ctx.clone(),
            ViewportId::ROOT,
            window.as_ref(),
            Some(window.scale_factor() as f32),
            None,
        );

        let renderer = egui_wgpu::Renderer::new(
            backend.device(),
            backend.wgpu_surface_format(),
            None,
            1,
        );

        Self {
            window,
            ctx,
            winit_state,
            renderer,
            lines: Vec::new(),
            visible: true,
        }
    }

    /// Feed a window event to egui; returns true if egui consumed it
    pub fn on_window_event(&mut self, event: &WindowEvent) -> bool {
        self.winit_state.on_window_event(&self.window, event).consumed
    }

    /// Lines shown under the timing text, replacing the previous ones
    pub fn set_lines(&mut self, lines: Vec<String>) {
        self.lines = lines;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn context(&self) -> &egui::Context {
        &self.ctx
    }
}

impl ForwardExtra<WgpuBackend> for EguiOverlay {
    fn name(&self) -> &str {
        "Text Overlay"
    }

    fn draw(&mut self, backend: &mut WgpuBackend, target: &FrameTarget, frame: &FrameContext) -> BackendResult<()> {
        if !self.visible {
            return Ok(());
        }

        let raw_input = self.winit_state.take_egui_input(&self.window);
        let stats = frame_stats_text(frame);
        let lines = &self.lines;
        let full_output = self.ctx.run(raw_input, |ctx| {
            egui::Area::new(egui::Id::new("frame_stats"))
                .fixed_pos(egui::pos2(8.0, 8.0))
                .show(ctx, |ui| {
                    ui.label(egui::RichText::new(&stats).monospace().color(egui::Color32::WHITE));
                    for line in lines {
                        ui.label(egui::RichText::new(line).monospace().color(egui::Color32::LIGHT_GRAY));
                    }
                });
        });

        self.winit_state
            .handle_platform_output(&self.window, full_output.platform_output);
        let paint_jobs = self
            .ctx
            .tessellate(full_output.shapes, full_output.pixels_per_point);
        let screen_descriptor = ScreenDescriptor {
            size_in_pixels: [target.width, target.height],
            pixels_per_point: full_output.pixels_per_point,
        };

        let (device, queue, encoder) = backend.device_queue_encoder();
        for (id, image_delta) in &full_output.textures_delta.set {
            self.renderer.update_texture(device, queue, *id, image_delta);
        }
        // Callback command buffers only exist for paint callbacks, which this overlay never adds
        let _ = self
            .renderer
            .update_buffers(device, queue, encoder, &paint_jobs, &screen_descriptor);

        backend.render_egui(
            &self.renderer,
            &paint_jobs,
            &screen_descriptor,
            target.swapchain_view,
        );

        for id in &full_output.textures_delta.free {
            self.renderer.free_texture(id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_stats_text() {
        let frame = FrameContext::new(1280, 720).advance(0.02, 1280, 720);
        assert_eq!(frame_stats_text(&frame), "50 fps (20.00 ms)  frame 1  1280x720");
    }
}
