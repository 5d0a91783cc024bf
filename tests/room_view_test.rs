use std::sync::Arc;

use flow_room::{
    builder::SceneBuilder,
    camera::Pose,
    config::ViewConfig,
    context::{
        ResourceKind,
        headless::{Call, HeadlessContext},
    },
    data_structures::scene_graph::find_by_name,
    pick::LayoutRect,
    render::{LoopHandle, RoomEvent, RoomView},
    resources::{
        AssetCache, AssetSource, CacheState, fetch::AssetFetcher, primitive::FALLBACK_NAME,
    },
    rig::{CameraRig, RigState},
    Duration, Instant, InnerSpace, Point3, Quaternion, Rad,
};

use crate::common::{CountingFetcher, room_glb};

mod common;

const FLIGHT: Duration = Duration::from_millis(100);

fn config() -> ViewConfig {
    ViewConfig::default()
        .with_orientation(Quaternion::new(1.0, 0.0, 0.0, 0.0))
        .with_flight_duration(FLIGHT)
}

fn initial_pose() -> Pose {
    Pose::new((0.0, 0.0, 5.0), (0.0, 0.0, 0.0))
}

fn mount() -> (RoomView<HeadlessContext>, LoopHandle) {
    mount_with(config())
}

fn mount_with(config: ViewConfig) -> (RoomView<HeadlessContext>, LoopHandle) {
    let rig = CameraRig::new(initial_pose(), config.orbit_sensitivity);
    let builder = SceneBuilder::from_config(&config).interactive("desk", "messages");
    RoomView::mount(HeadlessContext::new(), config, rig, builder, [1.0, 0.5, 0.0])
}

fn layout() -> LayoutRect {
    LayoutRect::new(0.0, 0.0, 100.0, 100.0)
}

fn source(dir: &tempfile::TempDir) -> AssetSource {
    AssetSource::new("room", "https://cdn.example.com/room.glb", dir.path().join("room.glb"))
}

async fn loaded_view(dir: &tempfile::TempDir) -> (RoomView<HeadlessContext>, Instant) {
    let cache = AssetCache::new(Arc::new(CountingFetcher::serving(room_glb())));
    let (mut view, _) = mount();
    view.begin_asset_load(&cache, source(dir)).await;
    let now = Instant::now();
    view.tick(now);
    (view, now)
}

#[test]
fn placeholder_is_drawn_until_the_asset_arrives() {
    let (mut view, _) = mount();
    let events = view.tick(Instant::now());

    assert!(events.is_empty());
    assert!(find_by_name(view.scene().root(), FALLBACK_NAME).is_some());
    let frame = view.context().raw().last_frame().unwrap();
    assert_eq!(frame.draws.len(), 1);
    assert_eq!(frame.draws[0].emissive, [1.0, 0.5, 0.0]);
}

#[tokio::test]
async fn loaded_asset_replaces_the_placeholder() {
    let dir = tempfile::tempdir().unwrap();
    let (view, _) = loaded_view(&dir).await;

    assert!(find_by_name(view.scene().root(), "desk").is_some());
    assert!(find_by_name(view.scene().root(), FALLBACK_NAME).is_none());
    // Placeholder buffers are released; the desk owns a vertex and an index buffer.
    assert_eq!(view.context().live_count(ResourceKind::Buffer), 2);
    assert_eq!(view.context().raw().live(ResourceKind::Buffer), 2);
    let frame = view.context().raw().last_frame().unwrap();
    assert_eq!(frame.draws.len(), 1);
    assert_eq!(frame.draws[0].index_count, 6);
}

#[tokio::test]
async fn tap_on_tagged_mesh_emits_mesh_picked_and_flies_there() {
    let dir = tempfile::tempdir().unwrap();
    let (mut view, now) = loaded_view(&dir).await;

    // Off the quad's diagonal so exactly one triangle is hit.
    view.touch_start((60.0, 45.0), layout());
    view.touch_end((60.0, 45.0), layout());
    let events = view.tick(now);

    let [RoomEvent::MeshPicked { tag, position }] = events.as_slice() else {
        panic!("expected a single pick, got {events:?}");
    };
    assert_eq!(tag.name, "desk");
    assert_eq!(tag.owner, "messages");
    // NDC (0.2, 0.1) at 5 units with a 45° field of view.
    let half_height = 5.0 * (22.5f32).to_radians().tan();
    let expected = Point3::new(0.2 * half_height, 0.1 * half_height, 0.0);
    assert!((*position - expected).magnitude() < 1e-3);

    let RigState::Tweening(tween) = view.rig().state() else {
        panic!("picking should start a flight");
    };
    assert_eq!(tween.tag, "desk");
    assert_eq!(tween.to.target, *position);
}

#[tokio::test]
async fn tap_outside_the_surface_picks_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (mut view, now) = loaded_view(&dir).await;

    view.touch_start((150.0, 50.0), layout());
    view.touch_end((150.0, 50.0), layout());

    assert!(view.tick(now).is_empty());
    assert!(!view.rig().is_tweening());
}

#[tokio::test]
async fn drag_orbits_instead_of_picking() {
    let dir = tempfile::tempdir().unwrap();
    let (mut view, now) = loaded_view(&dir).await;

    view.touch_start((50.0, 50.0), layout());
    view.touch_move((70.0, 50.0), layout());
    view.touch_move((50.0, 50.0), layout());
    view.touch_end((50.0, 50.0), layout());
    let events = view.tick(now);

    assert!(events.is_empty());
    assert!(!view.rig().is_tweening());
    // Out and back: the orbit nets to zero yaw but the gesture was still a drag.
    assert!(view.rig().camera_state(now).yaw.0.abs() < 1e-6);

    view.touch_start((50.0, 50.0), layout());
    view.touch_move((80.0, 50.0), layout());
    view.touch_end((80.0, 50.0), layout());
    view.tick(now);
    assert_ne!(view.rig().camera_state(now).yaw, Rad(0.0));
}

#[test]
fn focus_complete_fires_exactly_once() {
    let (mut view, _) = mount();
    let start = Instant::now();
    view.focus("desk", Pose::new((0.0, 1.0, 2.0), (0.0, 0.0, 0.0)), start);

    assert!(view.tick(start + FLIGHT / 2).is_empty());
    let events = view.tick(start + FLIGHT);
    let [RoomEvent::FocusComplete(done)] = events.as_slice() else {
        panic!("expected completion, got {events:?}");
    };
    assert_eq!(done.tag, "desk");
    assert!(!done.is_overview());
    assert!(view.tick(start + FLIGHT * 2).is_empty());
}

#[test]
fn overview_flight_returns_to_the_initial_pose() {
    let (mut view, _) = mount();
    let start = Instant::now();
    view.focus("desk", Pose::new((3.0, 1.0, 2.0), (1.0, 0.0, 0.0)), start);
    view.tick(start + FLIGHT);

    let back = start + FLIGHT * 2;
    view.focus_overview(back);
    let events = view.tick(back + FLIGHT);

    let [RoomEvent::FocusComplete(done)] = events.as_slice() else {
        panic!("expected completion, got {events:?}");
    };
    assert!(done.is_overview());
    assert_eq!(view.rig().sample(back + FLIGHT), initial_pose());
}

#[tokio::test]
async fn recolouring_updates_draws_without_new_buffers() {
    let dir = tempfile::tempdir().unwrap();
    let (mut view, now) = loaded_view(&dir).await;
    let before = view.context().raw().calls().len();

    view.set_emissive_color([0.0, 0.0, 1.0]);
    view.tick(now);

    let frame = view.context().raw().last_frame().unwrap();
    assert_eq!(frame.draws[0].emissive, [0.0, 0.0, 1.0]);
    let new_calls = &view.context().raw().calls()[before..];
    assert!(
        new_calls
            .iter()
            .all(|call| !matches!(call, Call::Create(..)))
    );
}

#[tokio::test]
async fn unmount_releases_handles_and_stops_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let (mut view, now) = loaded_view(&dir).await;
    let frames = view.context().raw().frames().len();

    view.unmount();
    assert!(!view.is_mounted());
    assert_eq!(view.context().live_count(ResourceKind::Buffer), 0);
    assert_eq!(view.context().raw().live(ResourceKind::Buffer), 0);

    assert!(view.tick(now).is_empty());
    assert_eq!(view.context().raw().frames().len(), frames);

    view.unmount();
    assert_eq!(view.context().raw().live(ResourceKind::Buffer), 0);
}

#[test]
fn cancelled_loop_skips_ticks() {
    let (mut view, handle) = mount();
    view.tick(Instant::now());
    let frames = view.context().raw().frames().len();

    handle.cancel();
    assert!(view.tick(Instant::now()).is_empty());
    assert_eq!(view.context().raw().frames().len(), frames);
}

#[tokio::test]
async fn load_finishing_after_unmount_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = CountingFetcher::serving(room_glb()).with_delay(Duration::from_millis(30));
    let cache = AssetCache::new(fetcher.shared());
    let (mut view, _) = mount();

    let load = tokio::spawn(view.begin_asset_load(&cache, source(&dir)));
    view.unmount();
    load.await.unwrap();

    assert!(view.tick(Instant::now()).is_empty());
    assert_eq!(view.context().raw().live(ResourceKind::Buffer), 0);
    assert!(find_by_name(view.scene().root(), FALLBACK_NAME).is_some());
}

#[tokio::test]
async fn repeated_mounts_share_one_failed_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(CountingFetcher::failing());
    let shared: Arc<dyn AssetFetcher> = fetcher.clone();
    let cache = AssetCache::new(shared);

    for _ in 0..100 {
        let (mut view, _) = mount();
        view.begin_asset_load(&cache, source(&dir)).await;
        view.tick(Instant::now());

        assert_eq!(view.scene().mesh_count(), 1);
        assert!(find_by_name(view.scene().root(), FALLBACK_NAME).is_some());

        view.unmount();
        assert_eq!(view.context().raw().live(ResourceKind::Buffer), 0);
    }
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn unmounting_keeps_the_shared_template_for_the_next_view() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = CountingFetcher::serving(room_glb()).shared();
    let cache = AssetCache::new(fetcher.clone());

    let (mut first, _) = mount();
    first.begin_asset_load(&cache, source(&dir)).await;
    first.tick(Instant::now());
    assert!(find_by_name(first.scene().root(), "desk").is_some());
    first.unmount();
    assert_eq!(first.context().raw().live(ResourceKind::Buffer), 0);
    assert_eq!(cache.state("room"), CacheState::Ready);

    let (mut second, _) = mount();
    second.begin_asset_load(&cache, source(&dir)).await;
    second.tick(Instant::now());

    assert_eq!(fetcher.calls(), 1);
    assert_eq!(cache.state("room"), CacheState::Ready);
    assert!(find_by_name(second.scene().root(), "desk").is_some());
    assert_eq!(second.context().raw().live(ResourceKind::Buffer), 2);
    let uploads = second
        .context()
        .raw()
        .calls()
        .iter()
        .filter(|call| matches!(call, Call::BufferData(..)))
        .count();
    // The asset arrived before the first frame, so only the desk was uploaded.
    assert_eq!(uploads, 2);
}

#[tokio::test]
async fn adopting_the_asset_keeps_the_spin_angle() {
    let dir = tempfile::tempdir().unwrap();
    let cache = AssetCache::new(CountingFetcher::serving(room_glb()).shared());
    let (mut view, _) = mount_with(config().with_spin(30.0));
    let start = Instant::now();
    view.tick(start);
    view.tick(start + Duration::from_secs(1));
    let spun = view.scene().spin_rotation();
    assert!((spun - Quaternion::new(1.0, 0.0, 0.0, 0.0)).magnitude() > 0.1);

    view.begin_asset_load(&cache, source(&dir)).await;
    view.tick(start + Duration::from_secs(1));

    assert!(find_by_name(view.scene().root(), "desk").is_some());
    assert!((view.scene().spin_rotation() - spun).magnitude() < 1e-5);
}
