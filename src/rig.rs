//! Camera rig: manual orbit composed with flights between points of interest.
//!
//! The rig is either [`RigState::Idle`], resting on its settled pose, or
//! [`RigState::Tweening`] toward a destination. A new focus request always
//! replaces the running flight and starts from wherever the camera is *now*, so
//! motion never jumps. Orbit input (yaw/pitch) is applied on top of whatever
//! pose the state machine produces, including mid-flight.

use std::f32::consts::FRAC_PI_2;

use cgmath::{InnerSpace, Point3, Rad, Vector3};
use instant::{Duration, Instant};
use log::{debug, info};

use crate::camera::{CameraState, Pose};

/// Focus tag that always flies back to the rig's construction-time pose.
pub const OVERVIEW_TAG: &str = "fullroom";

/// Highest elevation the orbited view may reach, just short of the poles.
const MAX_ELEVATION: f32 = FRAC_PI_2 - 0.5 * std::f32::consts::PI / 180.0;

#[derive(Clone, Debug, PartialEq)]
pub struct Tween {
    pub from: Pose,
    pub to: Pose,
    pub start: Instant,
    pub duration: Duration,
    pub tag: String,
}

impl Tween {
    /// Normalized progress in `[0, 1]`.
    pub fn progress(&self, now: Instant) -> f32 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = if now > self.start {
            now - self.start
        } else {
            Duration::ZERO
        };
        (elapsed.as_secs_f32() / self.duration.as_secs_f32()).clamp(0.0, 1.0)
    }

    pub fn sample(&self, now: Instant) -> Pose {
        self.from.lerp(&self.to, self.progress(now))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RigState {
    Idle,
    Tweening(Tween),
}

/// Emitted once when a flight reaches its destination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FocusComplete {
    pub tag: String,
}

impl FocusComplete {
    /// `true` for the return-to-overview flight, which must not open any overlay.
    pub fn is_overview(&self) -> bool {
        self.tag == OVERVIEW_TAG
    }
}

#[derive(Clone, Debug)]
pub struct CameraRig {
    initial: Pose,
    settled: Pose,
    state: RigState,
    yaw: Rad<f32>,
    pitch: Rad<f32>,
    sensitivity: f32,
}

impl CameraRig {
    /// `sensitivity` converts pan pixels into radians of orbit.
    pub fn new(initial: Pose, sensitivity: f32) -> Self {
        Self {
            initial,
            settled: initial,
            state: RigState::Idle,
            yaw: Rad(0.0),
            pitch: Rad(0.0),
            sensitivity,
        }
    }

    pub fn initial_pose(&self) -> Pose {
        self.initial
    }

    pub fn state(&self) -> &RigState {
        &self.state
    }

    pub fn is_tweening(&self) -> bool {
        matches!(self.state, RigState::Tweening(_))
    }

    /// Starts a flight, superseding any flight in progress.
    ///
    /// The overview tag ignores `destination` and returns to the initial pose.
    pub fn focus(
        &mut self,
        tag: impl Into<String>,
        destination: Pose,
        duration: Duration,
        now: Instant,
    ) {
        let tag = tag.into();
        let to = if tag == OVERVIEW_TAG {
            self.initial
        } else {
            destination
        };
        let from = self.sample(now);
        match &self.state {
            RigState::Tweening(running) => {
                debug!("Flight to '{}' superseded by '{}'", running.tag, tag)
            }
            RigState::Idle => debug!("Flight to '{}' started", tag),
        }
        self.state = RigState::Tweening(Tween {
            from,
            to,
            start: now,
            duration,
            tag,
        });
    }

    pub fn focus_overview(&mut self, duration: Duration, now: Instant) {
        self.focus(OVERVIEW_TAG, self.initial, duration, now);
    }

    /// Flies to a pose looking at `point` from `standoff` units away, keeping the
    /// current line of sight.
    pub fn focus_on_point(
        &mut self,
        tag: impl Into<String>,
        point: Point3<f32>,
        standoff: f32,
        duration: Duration,
        now: Instant,
    ) {
        // The orbit is layered on again once the flight lands, so the standoff
        // direction is expressed in the un-orbited frame.
        let current = self.view_pose(now);
        let back = [
            current.position - point,
            self.initial.position - self.initial.target,
        ]
        .into_iter()
        .find(|v| v.magnitude2() > f32::EPSILON)
        .unwrap_or_else(Vector3::unit_z)
        .normalize();
        let back = unapply_orbit(back, self.yaw, self.pitch);
        let destination = Pose {
            position: point + back * standoff,
            target: point,
        };
        self.focus(tag, destination, duration, now);
    }

    /// Applies a pan delta in pixels.
    ///
    /// Pitch stops where the view of the resting pose reaches a pole.
    pub fn orbit(&mut self, dx: f32, dy: f32) {
        self.yaw -= Rad(dx * self.sensitivity);
        let base = elevation(self.resting_pose());
        let low = (-MAX_ELEVATION - base).max(-FRAC_PI_2);
        let high = (MAX_ELEVATION - base).min(FRAC_PI_2);
        let pitch = self.pitch.0 + dy * self.sensitivity;
        self.pitch = Rad(if low <= high { pitch.clamp(low, high) } else { 0.0 });
    }

    /// The settled pose, or the destination of the running flight.
    fn resting_pose(&self) -> Pose {
        match &self.state {
            RigState::Idle => self.settled,
            RigState::Tweening(tween) => tween.to,
        }
    }

    /// Finishes the running flight once its progress reaches 1.
    ///
    /// Returns the completion exactly once per flight.
    pub fn advance(&mut self, now: Instant) -> Option<FocusComplete> {
        let finished =
            matches!(&self.state, RigState::Tweening(tween) if tween.progress(now) >= 1.0);
        if !finished {
            return None;
        }
        match std::mem::replace(&mut self.state, RigState::Idle) {
            RigState::Tweening(tween) => {
                self.settled = tween.to;
                info!("Flight to '{}' complete", tween.tag);
                Some(FocusComplete { tag: tween.tag })
            }
            RigState::Idle => None,
        }
    }

    /// The pose produced by the state machine, before orbit.
    pub fn sample(&self, now: Instant) -> Pose {
        match &self.state {
            RigState::Idle => self.settled,
            RigState::Tweening(tween) => tween.sample(now),
        }
    }

    /// The pose to render: [`sample`](Self::sample) orbited by the manual yaw/pitch.
    pub fn view_pose(&self, now: Instant) -> Pose {
        apply_orbit(self.sample(now), self.yaw, self.pitch)
    }

    pub fn camera_state(&self, now: Instant) -> CameraState {
        let pose = self.view_pose(now);
        CameraState {
            position: pose.position,
            target: pose.target,
            yaw: self.yaw,
            pitch: self.pitch,
        }
    }
}

/// Elevation of the eye above the target's horizon; zero for a degenerate pose.
fn elevation(pose: Pose) -> f32 {
    let offset = pose.position - pose.target;
    let radius = offset.magnitude();
    if radius <= f32::EPSILON {
        return 0.0;
    }
    (offset.y / radius).clamp(-1.0, 1.0).asin()
}

/// Inverse of [`apply_orbit`] for a unit eye direction.
fn unapply_orbit(direction: Vector3<f32>, yaw: Rad<f32>, pitch: Rad<f32>) -> Vector3<f32> {
    if yaw.0 == 0.0 && pitch.0 == 0.0 {
        return direction;
    }
    let azimuth = direction.x.atan2(direction.z) - yaw.0;
    let elevation = (direction.y.clamp(-1.0, 1.0).asin() - pitch.0)
        .clamp(-MAX_ELEVATION, MAX_ELEVATION);
    let (sin_el, cos_el) = elevation.sin_cos();
    let (sin_az, cos_az) = azimuth.sin_cos();
    Vector3::new(cos_el * sin_az, sin_el, cos_el * cos_az)
}

/// Rotates the eye around the target: yaw about world up, pitch toward the poles.
fn apply_orbit(base: Pose, yaw: Rad<f32>, pitch: Rad<f32>) -> Pose {
    if yaw.0 == 0.0 && pitch.0 == 0.0 {
        return base;
    }
    let offset = base.position - base.target;
    let radius = offset.magnitude();
    if radius <= f32::EPSILON {
        return base;
    }
    let azimuth = offset.x.atan2(offset.z) + yaw.0;
    let elevation = ((offset.y / radius).clamp(-1.0, 1.0).asin() + pitch.0)
        .clamp(-MAX_ELEVATION, MAX_ELEVATION);
    let (sin_el, cos_el) = elevation.sin_cos();
    let (sin_az, cos_az) = azimuth.sin_cos();
    let offset = Vector3::new(cos_el * sin_az, sin_el, cos_el * cos_az) * radius;
    Pose {
        position: base.target + offset,
        target: base.target,
    }
}
