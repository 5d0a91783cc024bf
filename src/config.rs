//! View configuration.

use cgmath::{Deg, Quaternion, Rad, Rotation3, Vector3};
use instant::Duration;

/// Tunables of a mounted room or star view.
#[derive(Clone, Debug, PartialEq)]
pub struct ViewConfig {
    /// Uniform scale applied once to every asset clone.
    pub scale: f32,
    /// Rotates the asset's up axis onto the renderer's +Y.
    pub orientation: Quaternion<f32>,
    /// Emissive intensity given to every mesh.
    pub emissive_boost: f32,
    pub base_color: [f32; 4],
    /// Pointer travel in pixels after which a gesture counts as a drag.
    pub drag_threshold: f32,
    /// Radians of orbit per pixel of pan.
    pub orbit_sensitivity: f32,
    pub fovy: Rad<f32>,
    pub znear: f32,
    pub zfar: f32,
    pub clear_colour: wgpu::Color,
    /// Auto-rotation of the scene about its up axis. `None` keeps it still.
    pub spin_degrees_per_second: Option<f32>,
    /// Distance kept from a picked point when flying to it.
    pub focus_standoff: f32,
    pub flight_duration: Duration,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            scale: 1.0,
            orientation: Quaternion::from_axis_angle(Vector3::unit_x(), Deg(-90.0)),
            emissive_boost: 2.5,
            base_color: [1.0, 1.0, 1.0, 1.0],
            drag_threshold: 4.0,
            orbit_sensitivity: 0.005,
            fovy: Deg(45.0).into(),
            znear: 0.1,
            zfar: 500.0,
            clear_colour: wgpu::Color {
                r: 0.0,
                g: 0.0,
                b: 0.0,
                a: 1.0,
            },
            spin_degrees_per_second: None,
            focus_standoff: 2.0,
            flight_duration: Duration::from_millis(1200),
        }
    }
}

impl ViewConfig {
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_orientation(mut self, orientation: Quaternion<f32>) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn with_emissive_boost(mut self, boost: f32) -> Self {
        self.emissive_boost = boost;
        self
    }

    pub fn with_drag_threshold(mut self, pixels: f32) -> Self {
        self.drag_threshold = pixels;
        self
    }

    pub fn with_orbit_sensitivity(mut self, radians_per_pixel: f32) -> Self {
        self.orbit_sensitivity = radians_per_pixel;
        self
    }

    pub fn with_fovy<F: Into<Rad<f32>>>(mut self, fovy: F) -> Self {
        self.fovy = fovy.into();
        self
    }

    pub fn with_clip_planes(mut self, znear: f32, zfar: f32) -> Self {
        self.znear = znear;
        self.zfar = zfar;
        self
    }

    pub fn with_clear_colour(mut self, colour: wgpu::Color) -> Self {
        self.clear_colour = colour;
        self
    }

    pub fn with_spin(mut self, degrees_per_second: f32) -> Self {
        self.spin_degrees_per_second = Some(degrees_per_second);
        self
    }

    pub fn with_focus_standoff(mut self, distance: f32) -> Self {
        self.focus_standoff = distance;
        self
    }

    pub fn with_flight_duration(mut self, duration: Duration) -> Self {
        self.flight_duration = duration;
        self
    }
}
