//! Tap picking.
//!
//! A tap is converted to normalized device coordinates using the surface's
//! last known layout, unprojected into a world-space ray through the current
//! camera and intersected with every triangle of the scene. The nearest hit
//! wins; its interaction tag is the one of the closest tagged ancestor, since a
//! tap often lands on a sub-mesh of a larger tagged object.
//!
//! [`GestureTracker`] decides whether a touch sequence was a tap at all.

use cgmath::{InnerSpace, Matrix4, Point3, SquareMatrix, Transform, Vector3};

use crate::{
    camera::{Pose, Projection},
    data_structures::scene_graph::{InteractionTag, SceneNode},
};

/// On-screen rectangle of the render surface, in the same units as touch points.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayoutRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl LayoutRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// NDC of `point` (x right, y up, both in `[-1, 1]`), or `None` outside the
    /// rectangle or for an empty one.
    pub fn to_ndc(&self, point: (f32, f32)) -> Option<(f32, f32)> {
        if self.width <= 0.0 || self.height <= 0.0 {
            return None;
        }
        let u = (point.0 - self.x) / self.width;
        let v = (point.1 - self.y) / self.height;
        if !(0.0..=1.0).contains(&u) || !(0.0..=1.0).contains(&v) {
            return None;
        }
        Some((u * 2.0 - 1.0, 1.0 - v * 2.0))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub origin: Point3<f32>,
    /// Unit length.
    pub direction: Vector3<f32>,
}

impl Ray {
    pub fn new(origin: Point3<f32>, direction: Vector3<f32>) -> Self {
        Self {
            origin,
            direction: direction.normalize(),
        }
    }

    /// The ray from the near plane through `ndc` towards the far plane.
    pub fn from_screen(ndc: (f32, f32), pose: &Pose, projection: &Projection) -> Option<Ray> {
        let view_proj: Matrix4<f32> = projection.calc_matrix() * pose.view_matrix();
        let inverse = view_proj.invert()?;
        let near = inverse.transform_point(Point3::new(ndc.0, ndc.1, -1.0));
        let far = inverse.transform_point(Point3::new(ndc.0, ndc.1, 1.0));
        let direction = far - near;
        (direction.magnitude2() > f32::EPSILON).then(|| Ray::new(near, direction))
    }

    pub fn at(&self, t: f32) -> Point3<f32> {
        self.origin + self.direction * t
    }

    /// Möller–Trumbore. Both faces count; returns the distance along the ray.
    pub fn intersect_triangle(
        &self,
        a: Point3<f32>,
        b: Point3<f32>,
        c: Point3<f32>,
    ) -> Option<f32> {
        const EPSILON: f32 = 1e-7;
        let edge1 = b - a;
        let edge2 = c - a;
        let h = self.direction.cross(edge2);
        let det = edge1.dot(h);
        if det.abs() < EPSILON {
            return None;
        }
        let f = 1.0 / det;
        let s = self.origin - a;
        let u = f * s.dot(h);
        if !(0.0..=1.0).contains(&u) {
            return None;
        }
        let q = s.cross(edge1);
        let v = f * self.direction.dot(q);
        if v < 0.0 || u + v > 1.0 {
            return None;
        }
        let t = f * edge2.dot(q);
        (t > EPSILON).then_some(t)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PickHit {
    /// Tag of the hit node or its nearest tagged ancestor.
    pub tag: Option<InteractionTag>,
    /// Name of the mesh node that was hit.
    pub mesh: String,
    pub position: Point3<f32>,
    pub distance: f32,
}

/// Nearest intersection of `ray` with the meshes below `root`.
pub fn raycast(root: &dyn SceneNode, ray: &Ray) -> Option<PickHit> {
    let mut best = None;
    raycast_node(root, ray, None, &mut best);
    best
}

fn raycast_node(
    node: &dyn SceneNode,
    ray: &Ray,
    inherited: Option<&InteractionTag>,
    best: &mut Option<PickHit>,
) {
    let tag = node.tag().or(inherited);
    if let Some(mesh) = node.mesh() {
        let world = node.get_world_transform().to_matrix();
        for triangle in mesh.geometry.triangles() {
            let [a, b, c] = triangle.map(|p| world.transform_point(p));
            let Some(t) = ray.intersect_triangle(a, b, c) else {
                continue;
            };
            if best.as_ref().is_none_or(|hit| t < hit.distance) {
                *best = Some(PickHit {
                    tag: tag.cloned(),
                    mesh: node.name().to_string(),
                    position: ray.at(t),
                    distance: t,
                });
            }
        }
    }
    for child in node.get_children() {
        raycast_node(child.as_ref(), ray, tag, best);
    }
}

#[derive(Clone, Copy, Debug)]
struct Gesture {
    start: (f32, f32),
    last: (f32, f32),
    travelled: f32,
    moved: bool,
}

/// Tells taps from drags.
///
/// A gesture becomes a drag as soon as the pointer's accumulated path exceeds
/// the threshold, and stays one until released.
#[derive(Clone, Debug)]
pub struct GestureTracker {
    threshold: f32,
    current: Option<Gesture>,
}

impl GestureTracker {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            current: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    pub fn is_dragging(&self) -> bool {
        self.current.is_some_and(|g| g.moved)
    }

    pub fn touch_start(&mut self, point: (f32, f32)) {
        self.current = Some(Gesture {
            start: point,
            last: point,
            travelled: 0.0,
            moved: false,
        });
    }

    /// Returns the pan delta to orbit by, once the gesture is a drag.
    pub fn touch_move(&mut self, point: (f32, f32)) -> Option<(f32, f32)> {
        let threshold = self.threshold;
        let gesture = self.current.as_mut()?;
        gesture.travelled += distance(gesture.last, point);
        let from = if gesture.moved {
            gesture.last
        } else if gesture.travelled > threshold {
            gesture.moved = true;
            gesture.start
        } else {
            gesture.last = point;
            return None;
        };
        gesture.last = point;
        Some((point.0 - from.0, point.1 - from.1))
    }

    /// Ends the gesture. Returns the point to pick at if it was a tap.
    pub fn touch_end(&mut self, point: (f32, f32)) -> Option<(f32, f32)> {
        let gesture = self.current.take()?;
        let travelled = gesture.travelled + distance(gesture.last, point);
        (!gesture.moved && travelled <= self.threshold).then_some(point)
    }

    pub fn cancel(&mut self) {
        self.current = None;
    }
}

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    (b.0 - a.0).hypot(b.1 - a.1)
}

/// Picks at a screen point: NDC conversion, unprojection, raycast.
pub fn pick_at(
    root: &dyn SceneNode,
    point: (f32, f32),
    layout: &LayoutRect,
    pose: &Pose,
    projection: &Projection,
) -> Option<PickHit> {
    let ndc = layout.to_ndc(point)?;
    let ray = Ray::from_screen(ndc, pose, projection)?;
    raycast(root, &ray)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::{
        instance::Instance,
        scene_graph::{ContainerNode, EmissiveMaterial, Geometry, MeshData, ModelNode},
    };

    fn quad(name: &str, z: f32) -> ModelNode {
        let geometry = Geometry::from_positions(
            vec![[-1.0, -1.0, 0.0], [1.0, -1.0, 0.0], [1.0, 1.0, 0.0], [-1.0, 1.0, 0.0]],
            None,
            Some(vec![0, 1, 2, 0, 2, 3]),
        );
        ModelNode::new(name, MeshData::new(geometry, EmissiveMaterial::default()))
            .with_transform(Instance::from(Vector3::new(0.0, 0.0, z)))
    }

    fn scene() -> Box<dyn SceneNode> {
        let mut root = ContainerNode::new("room");
        let mut shelf = ContainerNode::new("shelf");
        shelf.set_tag(Some(InteractionTag::new("shelf", "documents")));
        shelf.add_child(Box::new(quad("shelf_board", 0.0)));
        root.add_child(Box::new(shelf));
        root.add_child(Box::new(quad("wall", -5.0)));
        root.update_world_transform_all();
        Box::new(root)
    }

    fn camera() -> (Pose, Projection) {
        (
            Pose::new((0.0, 0.0, 5.0), (0.0, 0.0, 0.0)),
            Projection::new(100, 100, cgmath::Deg(60.0), 0.1, 100.0),
        )
    }

    #[test]
    fn ndc_conversion_flips_y() {
        let layout = LayoutRect::new(10.0, 20.0, 100.0, 50.0);
        assert_eq!(layout.to_ndc((60.0, 45.0)), Some((0.0, 0.0)));
        assert_eq!(layout.to_ndc((10.0, 20.0)), Some((-1.0, 1.0)));
        assert_eq!(layout.to_ndc((110.0, 70.0)), Some((1.0, -1.0)));
        assert_eq!(layout.to_ndc((0.0, 0.0)), None);
        assert_eq!(LayoutRect::new(0.0, 0.0, 0.0, 10.0).to_ndc((0.0, 0.0)), None);
    }

    #[test]
    fn centre_ray_looks_down_the_view_axis() {
        let (pose, projection) = camera();
        let ray = Ray::from_screen((0.0, 0.0), &pose, &projection).unwrap();
        assert!((ray.direction - Vector3::new(0.0, 0.0, -1.0)).magnitude() < 1e-4);
    }

    #[test]
    fn triangle_intersection() {
        let ray = Ray::new(Point3::new(0.2, 0.2, 1.0), Vector3::new(0.0, 0.0, -1.0));
        let (a, b, c) = (
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        );
        assert_eq!(ray.intersect_triangle(a, b, c), Some(1.0));
        let miss = Ray::new(Point3::new(0.8, 0.8, 1.0), Vector3::new(0.0, 0.0, -1.0));
        assert_eq!(miss.intersect_triangle(a, b, c), None);
        let behind = Ray::new(Point3::new(0.2, 0.2, -1.0), Vector3::new(0.0, 0.0, -1.0));
        assert_eq!(behind.intersect_triangle(a, b, c), None);
    }

    #[test]
    fn nearest_hit_carries_ancestor_tag() {
        let (pose, projection) = camera();
        let layout = LayoutRect::new(0.0, 0.0, 100.0, 100.0);
        let root = scene();
        let hit = pick_at(root.as_ref(), (50.0, 50.0), &layout, &pose, &projection).unwrap();
        assert_eq!(hit.mesh, "shelf_board");
        assert_eq!(hit.tag, Some(InteractionTag::new("shelf", "documents")));
        assert!((hit.position - Point3::new(0.0, 0.0, 0.0)).magnitude() < 1e-3);
    }

    #[test]
    fn empty_scene_has_no_hit() {
        let (pose, projection) = camera();
        let root = ContainerNode::new("empty");
        let ray = Ray::from_screen((0.0, 0.0), &pose, &projection).unwrap();
        assert_eq!(raycast(&root, &ray), None);
    }

    #[test]
    fn untagged_hit_has_no_tag() {
        let pose = Pose::new((4.0, 0.0, 5.0), (4.0, 0.0, -5.0));
        let mut wall = quad("wall", -5.0).with_transform(Instance::from(Vector3::new(4.0, 0.0, -5.0)));
        wall.update_world_transform_all();
        let ray = Ray::new(pose.position, Vector3::new(0.0, 0.0, -1.0));
        let hit = raycast(&wall, &ray).unwrap();
        assert_eq!(hit.tag, None);
        assert_eq!(hit.mesh, "wall");
    }

    #[test]
    fn short_tap_is_a_pick() {
        let mut gestures = GestureTracker::new(4.0);
        gestures.touch_start((10.0, 10.0));
        assert_eq!(gestures.touch_end((11.0, 11.0)), Some((11.0, 11.0)));
    }

    #[test]
    fn small_jitter_without_crossing_threshold_is_a_pick() {
        let mut gestures = GestureTracker::new(4.0);
        gestures.touch_start((10.0, 10.0));
        assert_eq!(gestures.touch_move((11.0, 10.0)), None);
        assert_eq!(gestures.touch_end((11.0, 11.0)), Some((11.0, 11.0)));
    }

    #[test]
    fn drag_never_picks_even_when_released_at_start() {
        let mut gestures = GestureTracker::new(4.0);
        gestures.touch_start((10.0, 10.0));
        assert_eq!(gestures.touch_move((20.0, 10.0)), Some((10.0, 0.0)));
        assert!(gestures.is_dragging());
        assert_eq!(gestures.touch_move((10.0, 10.0)), Some((-10.0, 0.0)));
        assert_eq!(gestures.touch_end((10.0, 10.0)), None);
    }

    #[test]
    fn release_far_from_start_is_not_a_pick() {
        let mut gestures = GestureTracker::new(4.0);
        gestures.touch_start((10.0, 10.0));
        assert_eq!(gestures.touch_end((30.0, 10.0)), None);
    }

    #[test]
    fn cancel_and_orphan_release() {
        let mut gestures = GestureTracker::new(4.0);
        gestures.touch_start((10.0, 10.0));
        gestures.cancel();
        assert!(!gestures.is_active());
        assert_eq!(gestures.touch_end((10.0, 10.0)), None);
        assert_eq!(gestures.touch_move((12.0, 10.0)), None);
    }
}
