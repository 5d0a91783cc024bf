//! Platform driver.
//!
//! Hosts a single [`RoomView`] in a winit window: the window's redraw callback
//! is the per-frame callback, mouse and touch input are translated into
//! gestures, and asset loads run on the platform's executor (a tokio runtime
//! natively, `spawn_local` on the web).
//!
//! The lifecycle per frame is:
//! 1. Collect window events and feed gestures to the view
//! 2. `RedrawRequested` ticks the view (orbit, asset, tween, pick, draw, present)
//! 3. Forward the view's events to the host callback
//! 4. Request the next redraw

use std::sync::Arc;

use instant::Instant;
use log::{error, info, warn};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalPosition,
    event::{ElementState, MouseButton, TouchPhase, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    window::Window,
};

use crate::{
    builder::SceneBuilder,
    camera::Pose,
    config::ViewConfig,
    context::gpu::GpuContext,
    pick::LayoutRect,
    render::{LoopHandle, RoomEvent, RoomView},
    resources::{AssetCache, AssetSource, fetch::AssetFetcher},
    rig::CameraRig,
};

/// Everything needed to mount a view once the window exists.
pub struct RoomSetup {
    pub config: ViewConfig,
    pub initial: Pose,
    pub builder: SceneBuilder,
    pub color: [f32; 3],
    pub source: AssetSource,
    pub fetcher: Arc<dyn AssetFetcher>,
}

type EventCallback = Box<dyn FnMut(&RoomEvent)>;

enum RoomUserEvent {
    /// The GPU context finished initializing (web only; natively it is awaited in place).
    #[allow(dead_code)]
    Ready(GpuContext),
}

struct Mounted {
    view: RoomView<GpuContext>,
    handle: LoopHandle,
}

struct RoomApp {
    #[cfg(not(target_arch = "wasm32"))]
    async_runtime: tokio::runtime::Runtime,
    #[allow(dead_code)]
    proxy: winit::event_loop::EventLoopProxy<RoomUserEvent>,
    setup: Option<RoomSetup>,
    cache: AssetCache,
    mounted: Option<Mounted>,
    on_event: EventCallback,
    cursor: PhysicalPosition<f64>,
    pressed: bool,
}

impl RoomApp {
    fn new(
        event_loop: &EventLoop<RoomUserEvent>,
        setup: RoomSetup,
        on_event: EventCallback,
    ) -> anyhow::Result<Self> {
        let proxy = event_loop.create_proxy();
        Ok(Self {
            #[cfg(not(target_arch = "wasm32"))]
            async_runtime: tokio::runtime::Runtime::new()?,
            proxy,
            cache: AssetCache::new(Arc::clone(&setup.fetcher)),
            setup: Some(setup),
            mounted: None,
            on_event,
            cursor: PhysicalPosition::new(0.0, 0.0),
            pressed: false,
        })
    }

    fn mount(&mut self, ctx: GpuContext) {
        let Some(setup) = self.setup.take() else {
            warn!("View is already mounted");
            return;
        };
        let (width, height) = ctx.size();
        let window = Arc::clone(ctx.window());
        let rig = CameraRig::new(setup.initial, setup.config.orbit_sensitivity);
        let (mut view, handle) =
            RoomView::mount(ctx, setup.config, rig, setup.builder, setup.color);
        view.resize(width, height);

        let load = view.begin_asset_load(&self.cache, setup.source);
        #[cfg(not(target_arch = "wasm32"))]
        {
            self.async_runtime.spawn(load);
        }
        #[cfg(target_arch = "wasm32")]
        {
            wasm_bindgen_futures::spawn_local(load);
        }

        self.mounted = Some(Mounted { view, handle });
        window.request_redraw();
    }

    fn layout(view: &RoomView<GpuContext>) -> LayoutRect {
        let (width, height) = view.context().raw().size();
        LayoutRect::new(0.0, 0.0, width as f32, height as f32)
    }
}

impl ApplicationHandler<RoomUserEvent> for RoomApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.mounted.is_some() || self.setup.is_none() {
            return;
        }
        #[allow(unused_mut)]
        let mut window_attributes = Window::default_attributes().with_title("flow-room");

        #[cfg(target_arch = "wasm32")]
        {
            use wasm_bindgen::JsCast;
            use winit::platform::web::WindowAttributesExtWebSys;

            const CANVAS_ID: &str = "canvas";

            let canvas = web_sys::window()
                .and_then(|window| window.document())
                .and_then(|document| document.get_element_by_id(CANVAS_ID));
            match canvas {
                Some(canvas) => {
                    window_attributes = window_attributes.with_canvas(Some(canvas.unchecked_into()))
                }
                None => warn!("No #{CANVAS_ID} element, letting winit create one"),
            }
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                error!("Cannot create window: {err}");
                event_loop.exit();
                return;
            }
        };

        #[cfg(not(target_arch = "wasm32"))]
        {
            match self.async_runtime.block_on(GpuContext::new(window)) {
                Ok(ctx) => self.mount(ctx),
                Err(err) => {
                    error!("Cannot initialize graphics: {err:#}");
                    event_loop.exit();
                }
            }
        }

        #[cfg(target_arch = "wasm32")]
        {
            let proxy = self.proxy.clone();
            wasm_bindgen_futures::spawn_local(async move {
                match GpuContext::new(window).await {
                    Ok(ctx) => {
                        if proxy.send_event(RoomUserEvent::Ready(ctx)).is_err() {
                            warn!("Event loop closed before graphics were ready");
                        }
                    }
                    Err(err) => error!("Cannot initialize graphics: {err:#}"),
                }
            });
        }
    }

    fn user_event(&mut self, _event_loop: &ActiveEventLoop, event: RoomUserEvent) {
        match event {
            // This is the message from our wasm `spawn_local`
            RoomUserEvent::Ready(ctx) => self.mount(ctx),
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        let Some(Mounted { view, handle }) = &mut self.mounted else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                view.unmount();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                view.context_mut().raw_mut().resize(size.width, size.height);
                view.resize(size.width, size.height);
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor = position;
                if self.pressed {
                    let layout = Self::layout(view);
                    view.touch_move((position.x as f32, position.y as f32), layout);
                }
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => {
                let point = (self.cursor.x as f32, self.cursor.y as f32);
                let layout = Self::layout(view);
                match state {
                    ElementState::Pressed => {
                        self.pressed = true;
                        view.touch_start(point, layout);
                    }
                    ElementState::Released => {
                        self.pressed = false;
                        view.touch_end(point, layout);
                    }
                }
            }
            WindowEvent::Touch(touch) => {
                let point = (touch.location.x as f32, touch.location.y as f32);
                let layout = Self::layout(view);
                match touch.phase {
                    TouchPhase::Started => view.touch_start(point, layout),
                    TouchPhase::Moved => view.touch_move(point, layout),
                    TouchPhase::Ended => view.touch_end(point, layout),
                    TouchPhase::Cancelled => view.touch_cancel(),
                }
            }
            WindowEvent::RedrawRequested => {
                if !handle.is_active() {
                    return;
                }
                for event in view.tick(Instant::now()) {
                    (self.on_event)(&event);
                }
                view.context().raw().window().request_redraw();
            }
            _ => {}
        }
    }
}

/// Opens a window, mounts the view described by `setup` and runs until the
/// window is closed. `on_event` receives every [`RoomEvent`].
pub fn run(setup: RoomSetup, on_event: impl FnMut(&RoomEvent) + 'static) -> anyhow::Result<()> {
    #[cfg(not(target_arch = "wasm32"))]
    {
        if let Err(e) = env_logger::try_init() {
            println!("Warning: Could not initialize logger: {}", e);
        };
    }

    #[cfg(target_arch = "wasm32")]
    {
        if console_log::init_with_level(log::Level::Info).is_err() {
            web_sys::console::warn_1(&"Could not initialize logger".into());
        }
    }

    let event_loop: EventLoop<RoomUserEvent> = EventLoop::with_user_event().build()?;
    let mut app = RoomApp::new(&event_loop, setup, Box::new(on_event))?;
    info!("Starting event loop");
    event_loop.run_app(&mut app)?;

    Ok(())
}
