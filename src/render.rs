//! The per-frame render loop of one mounted star or room view.
//!
//! A [`RoomView`] owns everything a mounted view needs: the virtualized
//! graphics context, the built scene, the camera rig and the pending input.
//! Input handlers only record what happened (orbit deltas, a queued pick);
//! [`RoomView::tick`] consumes those records once per frame, so the host's
//! frame callback is the only place the graphics context is touched.
//!
//! The asset arrives asynchronously. Until it does, the view renders the
//! fallback primitive, and the parsed clone is handed over through a oneshot
//! channel that the next tick drains.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use cgmath::{Deg, Point3, Vector3};
use futures::{
    channel::oneshot,
    future::{AbortHandle, Abortable},
};
use instant::{Duration, Instant};
use log::{debug, error, info, warn};

use crate::{
    builder::{Scene, SceneBuilder},
    camera::{CameraUniform, Pose, Projection},
    config::ViewConfig,
    context::{FrameUniforms, RawContext},
    data_structures::scene_graph::{InteractionTag, SceneNode},
    handles::VirtualContext,
    pick::{GestureTracker, LayoutRect, PickHit, pick_at},
    resources::{AssetCache, AssetSource, LoadFuture, boxed, primitive},
    rig::{CameraRig, FocusComplete},
};

/// Something the hosting screen should react to.
#[derive(Clone, Debug, PartialEq)]
pub enum RoomEvent {
    /// A tap landed on an interactive object.
    MeshPicked {
        tag: InteractionTag,
        position: Point3<f32>,
    },
    /// A camera flight arrived. Check [`FocusComplete::is_overview`] before
    /// opening anything.
    FocusComplete(FocusComplete),
}

/// Shared "still mounted" flag of a view's render loop.
#[derive(Clone, Debug)]
pub struct LoopHandle {
    active: Arc<AtomicBool>,
}

impl LoopHandle {
    fn new() -> Self {
        Self {
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stops the loop. Ticks after this are skipped without touching the context.
    pub fn cancel(&self) {
        self.active.store(false, Ordering::Release);
    }
}

pub struct RoomView<C: RawContext> {
    ctx: VirtualContext<C>,
    config: ViewConfig,
    rig: CameraRig,
    builder: SceneBuilder,
    projection: Projection,
    scene: Scene,
    color: [f32; 3],
    gesture: GestureTracker,
    pending_orbit: (f32, f32),
    /// Last known on-screen rectangle of the surface.
    layout: Option<LayoutRect>,
    pending_pick: Option<(f32, f32)>,
    incoming: Option<oneshot::Receiver<Box<dyn SceneNode>>>,
    load_abort: Option<AbortHandle>,
    handle: LoopHandle,
    released: bool,
    last_tick: Option<Instant>,
}

impl<C: RawContext> std::fmt::Debug for RoomView<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomView")
            .field("scene", &self.scene)
            .field("rig", &self.rig)
            .field("mounted", &self.handle.is_active())
            .finish_non_exhaustive()
    }
}

impl<C: RawContext> RoomView<C> {
    /// Installs the handle layer on `ctx` and shows the placeholder until an
    /// asset is loaded with [`begin_asset_load`](Self::begin_asset_load).
    pub fn mount(
        ctx: C,
        config: ViewConfig,
        rig: CameraRig,
        builder: SceneBuilder,
        color: [f32; 3],
    ) -> (Self, LoopHandle) {
        let ctx = VirtualContext::install(ctx);
        let projection = Projection::new(1, 1, config.fovy, config.znear, config.zfar);
        let scene = builder.build(primitive::fallback_node(), color);
        let handle = LoopHandle::new();
        info!("Room view mounted");
        let view = Self {
            ctx,
            gesture: GestureTracker::new(config.drag_threshold),
            config,
            rig,
            builder,
            projection,
            scene,
            color,
            pending_orbit: (0.0, 0.0),
            layout: None,
            pending_pick: None,
            incoming: None,
            load_abort: None,
            handle: handle.clone(),
            released: false,
            last_tick: None,
        };
        (view, handle)
    }

    /// Returns the future that loads `source` for this view. The host spawns it;
    /// the result is adopted on the next tick after it resolves.
    ///
    /// Starting a new load aborts the previous one.
    pub fn begin_asset_load(&mut self, cache: &AssetCache, source: AssetSource) -> LoadFuture<'static, ()> {
        let (tx, rx) = oneshot::channel();
        let (abort, registration) = AbortHandle::new_pair();
        if let Some(previous) = self.load_abort.replace(abort) {
            previous.abort();
        }
        self.incoming = Some(rx);

        let cache = cache.clone();
        boxed(async move {
            let id = source.id.clone();
            let load = Abortable::new(async move { cache.get_or_load(&source).await }, registration);
            match load.await {
                Ok(node) => {
                    if tx.send(node).is_err() {
                        debug!("View was gone before asset '{id}' arrived");
                    }
                }
                Err(_) => debug!("Load of asset '{id}' aborted"),
            }
        })
    }

    pub fn touch_start(&mut self, point: (f32, f32), layout: LayoutRect) {
        if !self.handle.is_active() {
            return;
        }
        self.layout = Some(layout);
        self.gesture.touch_start(point);
    }

    pub fn touch_move(&mut self, point: (f32, f32), layout: LayoutRect) {
        if !self.handle.is_active() {
            return;
        }
        self.layout = Some(layout);
        if let Some((dx, dy)) = self.gesture.touch_move(point) {
            self.pending_orbit.0 += dx;
            self.pending_orbit.1 += dy;
        }
    }

    /// Queues a pick for the next tick if the gesture was a tap.
    pub fn touch_end(&mut self, point: (f32, f32), layout: LayoutRect) {
        if !self.handle.is_active() {
            return;
        }
        self.layout = Some(layout);
        if let Some(point) = self.gesture.touch_end(point) {
            self.pending_pick = Some(point);
        }
    }

    pub fn touch_cancel(&mut self) {
        self.gesture.cancel();
    }

    pub fn focus(&mut self, tag: impl Into<String>, destination: Pose, now: Instant) {
        self.rig.focus(tag, destination, self.config.flight_duration, now);
    }

    /// Flies to a picked position, keeping the configured standoff.
    pub fn focus_on_hit(&mut self, tag: impl Into<String>, position: Point3<f32>, now: Instant) {
        self.rig.focus_on_point(
            tag,
            position,
            self.config.focus_standoff,
            self.config.flight_duration,
            now,
        );
    }

    pub fn focus_overview(&mut self, now: Instant) {
        self.rig.focus_overview(self.config.flight_duration, now);
    }

    /// Recolours the scene in place; also applies to the asset once it arrives.
    pub fn set_emissive_color(&mut self, color: [f32; 3]) {
        self.color = color;
        self.scene.set_emissive_color(color);
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.projection.resize(width, height);
    }

    /// Runs one frame. Returns the events raised during it.
    pub fn tick(&mut self, now: Instant) -> Vec<RoomEvent> {
        if !self.handle.is_active() {
            debug!("Tick after unmount skipped");
            return Vec::new();
        }
        let mut events = Vec::new();

        let (dx, dy) = std::mem::take(&mut self.pending_orbit);
        if dx != 0.0 || dy != 0.0 {
            self.rig.orbit(dx, dy);
        }

        self.adopt_loaded();

        if let Some(done) = self.rig.advance(now) {
            events.push(RoomEvent::FocusComplete(done));
        }

        let elapsed = match self.last_tick.replace(now) {
            Some(last) if now > last => now - last,
            _ => Duration::ZERO,
        };
        if let Some(speed) = self.config.spin_degrees_per_second {
            self.scene
                .spin(Vector3::unit_y(), Deg(speed * elapsed.as_secs_f32()).into());
        }

        if let (Some(point), Some(layout)) = (self.pending_pick.take(), self.layout) {
            if let Some(hit) = self.pick(point, &layout, now) {
                match hit.tag {
                    Some(tag) => {
                        info!("Picked '{}' ({}) at {:?}", tag.name, hit.mesh, hit.position);
                        self.focus_on_hit(tag.name.clone(), hit.position, now);
                        events.push(RoomEvent::MeshPicked {
                            tag,
                            position: hit.position,
                        });
                    }
                    None => debug!("Tap hit untagged mesh '{}'", hit.mesh),
                }
            }
        }

        if let Err(err) = self.render(now) {
            error!("Frame failed: {err:#}");
        }
        events
    }

    fn adopt_loaded(&mut self) {
        let Some(incoming) = self.incoming.as_mut() else {
            return;
        };
        match incoming.try_recv() {
            Ok(Some(node)) => {
                self.incoming = None;
                self.load_abort = None;
                let mut next = self.builder.build(node, self.color);
                next.inherit_spin(&self.scene);
                let mut previous = std::mem::replace(&mut self.scene, next);
                previous.release(&mut self.ctx);
                info!("Asset adopted with {} meshes", self.scene.mesh_count());
            }
            Ok(None) => (),
            Err(_) => {
                self.incoming = None;
                warn!("Asset load ended without a result; keeping the placeholder");
            }
        }
    }

    fn pick(&self, point: (f32, f32), layout: &LayoutRect, now: Instant) -> Option<PickHit> {
        let mut projection = self.projection;
        projection.set_aspect(layout.width, layout.height);
        let pose = self.rig.view_pose(now);
        pick_at(self.scene.root(), point, layout, &pose, &projection)
    }

    fn render(&mut self, now: Instant) -> anyhow::Result<()> {
        self.scene.upload(&mut self.ctx)?;

        let pose = self.rig.view_pose(now);
        let mut camera = CameraUniform::new();
        camera.update_view_proj(&pose, &self.projection);
        let clear = self.config.clear_colour;
        self.ctx.begin_frame(&FrameUniforms {
            view_proj: camera.view_proj,
            eye: pose.position.into(),
            clear_colour: [clear.r, clear.g, clear.b, clear.a],
        })?;
        self.scene.draw(&mut self.ctx)?;
        self.ctx.present()
    }

    /// Stops the loop, drops any in-flight load and releases the scene's GPU
    /// resources. The shared asset cache keeps its template.
    pub fn unmount(&mut self) {
        self.handle.cancel();
        if self.released {
            return;
        }
        self.released = true;
        if let Some(abort) = self.load_abort.take() {
            abort.abort();
        }
        self.incoming = None;
        self.pending_pick = None;
        self.gesture.cancel();
        self.scene.release(&mut self.ctx);
        info!("Room view unmounted");
    }

    pub fn is_mounted(&self) -> bool {
        self.handle.is_active()
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn rig(&self) -> &CameraRig {
        &self.rig
    }

    pub fn context(&self) -> &VirtualContext<C> {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut VirtualContext<C> {
        &mut self.ctx
    }
}

impl<C: RawContext> Drop for RoomView<C> {
    fn drop(&mut self) {
        self.unmount();
    }
}
