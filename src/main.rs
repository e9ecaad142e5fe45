// =============================================================================
// MESH RENDERER DEMO
// =============================================================================
//
// Opens a window, uploads two colored quads and spins the first one around
// the Y axis. Every renderer error is fatal: it is logged and the process
// exits with status 1.
//
// FRAME FLOW:
// 1. Advance the rotation angle
// 2. Push the new model matrix (marks recorded commands stale)
// 3. Renderer::draw - wait, acquire, re-record if stale, submit, present
//
// =============================================================================

use anyhow::Result;
use glam::{Mat4, Vec3};
use mesh_renderer::{Config, MeshData, MeshId, Renderer, Vertex};
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

/// Degrees per second
const ROTATION_SPEED: f32 = 10.0;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = Config::load();

    env_logger::Builder::from_default_env()
        .filter_level(config.log_level())
        .init();

    log::info!("Starting mesh renderer");
    log::info!(
        "Window: {}x{}, present mode: {}",
        config.window.width,
        config.window.height,
        config.graphics.present_mode
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

fn demo_meshes() -> Result<Vec<MeshData>> {
    let indices = vec![0, 1, 2, 2, 3, 0];

    let left = vec![
        Vertex::new([-0.1, -0.4, 0.0], [1.0, 0.0, 0.0]),
        Vertex::new([-0.1, 0.4, 0.0], [0.0, 1.0, 0.0]),
        Vertex::new([-0.9, 0.4, 0.0], [0.0, 0.0, 1.0]),
        Vertex::new([-0.9, -0.4, 0.0], [1.0, 1.0, 0.0]),
    ];
    let right = vec![
        Vertex::new([0.9, -0.3, 0.0], [1.0, 0.0, 0.0]),
        Vertex::new([0.9, 0.1, 0.0], [0.0, 1.0, 0.0]),
        Vertex::new([0.1, 0.3, 0.0], [0.0, 0.0, 1.0]),
        Vertex::new([0.1, -0.3, 0.0], [1.0, 1.0, 0.0]),
    ];

    Ok(vec![
        MeshData::new(left, indices.clone())?,
        MeshData::new(right, indices)?,
    ])
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters for Drop: the renderer owns the surface, which must
/// go before the window it was created from.
struct App {
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
    config: Config,

    spinning_mesh: Option<MeshId>,
    angle: f32,
    last_frame_time: Instant,

    // FPS tracking
    frame_count: u32,
    last_fps_update: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let now = Instant::now();
        Self {
            renderer: None,
            window: None,
            config,
            spinning_mesh: None,
            angle: 0.0,
            last_frame_time: now,
            frame_count: 0,
            last_fps_update: now,
        }
    }

    fn init_renderer(&mut self, window: &Window) -> Result<()> {
        let size = window.inner_size();
        let mut renderer = Renderer::new(
            window,
            (size.width, size.height),
            &self.config.renderer_config(),
        )?;

        let mut ids = Vec::new();
        for mesh in demo_meshes()? {
            ids.push(renderer.add_mesh(&mesh)?);
        }
        self.spinning_mesh = ids.first().copied();

        self.renderer = Some(renderer);
        Ok(())
    }

    fn update_scene(&mut self) {
        let now = Instant::now();
        let delta = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;

        self.angle += ROTATION_SPEED * delta;
        if self.angle > 360.0 {
            self.angle -= 360.0;
        }

        if let (Some(renderer), Some(id)) = (self.renderer.as_mut(), self.spinning_mesh) {
            let model = Mat4::from_axis_angle(Vec3::Y, self.angle.to_radians());
            renderer.update_model(id, model);
        }
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        self.frame_count += 1;
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();

        // Update title every second
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;
            if let Some(ref window) = self.window {
                window.set_title(&format!("{} - {:.0} FPS", self.config.window.title, fps));
            }
            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }

    /// Release GPU resources, then leave with a failure status
    fn fail(&mut self, context: &str, error: &dyn std::fmt::Display) -> ! {
        log::error!("{}: {}", context, error);
        self.renderer = None;
        std::process::exit(1);
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_resizable(self.config.window.resizable)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => self.fail("Failed to create window", &e),
        };

        if let Err(e) = self.init_renderer(&window) {
            self.fail("Failed to initialize renderer", &format!("{:#}", e));
        }

        self.window = Some(window);
        self.last_frame_time = Instant::now();
        event_loop.set_control_flow(winit::event_loop::ControlFlow::Poll);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                // Drops the renderer while the window still exists
                self.renderer = None;
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.resize(size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => {
                self.update_scene();

                let result = match self.renderer.as_mut() {
                    Some(renderer) => renderer.draw(),
                    None => return,
                };
                match result {
                    Ok(()) => self.update_fps(),
                    Err(e) => self.fail("Render error", &e),
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}
