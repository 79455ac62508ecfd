//! Window management using winit

use std::sync::Arc;
use winit::{
    dpi::PhysicalSize,
    error::{EventLoopError, OsError},
    event::{ElementState, Event, KeyEvent, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window as WinitWindow, WindowBuilder},
};

/// What the event loop hands to the application callback
#[derive(Debug)]
pub enum AppEvent<'a> {
    /// A window event, after the wrapper has updated its own state
    Window(&'a WindowEvent),
    /// Time to update and draw the next frame
    Frame,
}

/// Wrapper around winit window with additional state
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
    resized: bool,
    close_requested: bool,
    pressed_keys: Vec<KeyCode>,
}

impl Window {
    /// Create a new window with the given title and dimensions
    pub fn new(event_loop: &EventLoop<()>, title: &str, width: u32, height: u32) -> Result<Self, OsError> {
        let window = WindowBuilder::new()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .build(event_loop)?;
        let size = window.inner_size();

        Ok(Self {
            window: Arc::new(window),
            width: size.width,
            height: size.height,
            resized: false,
            close_requested: false,
            pressed_keys: Vec::new(),
        })
    }

    /// Shared handle for backend surface creation
    pub fn window_arc(&self) -> Arc<WinitWindow> {
        Arc::clone(&self.window)
    }

    /// Get current window dimensions
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Size change since the flag was last taken
    pub fn take_resize(&mut self) -> Option<(u32, u32)> {
        std::mem::take(&mut self.resized).then_some((self.width, self.height))
    }

    /// Keys pressed since the last call, in press order
    pub fn take_pressed_keys(&mut self) -> Vec<KeyCode> {
        std::mem::take(&mut self.pressed_keys)
    }

    pub fn should_close(&self) -> bool {
        self.close_requested
    }

    /// Ask the event loop to exit after the current callback
    pub fn request_close(&mut self) {
        self.close_requested = true;
    }

    /// Handle window events
    pub fn handle_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::Resized(size) => {
                self.width = size.width;
                self.height = size.height;
                self.resized = true;
            }
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => {
                self.pressed_keys.push(*code);
            }
            _ => {}
        }
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

/// Drive `window` until it is closed, forwarding events and frame ticks to `callback`
pub fn run<F>(event_loop: EventLoop<()>, mut window: Window, mut callback: F) -> Result<(), EventLoopError>
where
    F: FnMut(&mut Window, AppEvent<'_>) + 'static,
{
    event_loop.run(move |event, elwt: &EventLoopWindowTarget<()>| {
        elwt.set_control_flow(ControlFlow::Poll);

        match event {
            Event::WindowEvent { event, .. } => {
                window.handle_event(&event);
                callback(&mut window, AppEvent::Window(&event));
            }
            Event::AboutToWait => {
                callback(&mut window, AppEvent::Frame);
                window.request_redraw();
            }
            _ => {}
        }

        if window.should_close() {
            elwt.exit();
        }
    })
}
