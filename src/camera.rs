//! Camera poses, projection and the uniform handed to the GPU.

use cgmath::{EuclideanSpace, InnerSpace, Matrix4, Point3, Rad, Vector3};

#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

/// Where the camera sits and what it looks at.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose {
    pub position: Point3<f32>,
    pub target: Point3<f32>,
}

impl Pose {
    pub fn new<P: Into<Point3<f32>>, T: Into<Point3<f32>>>(position: P, target: T) -> Self {
        Self {
            position: position.into(),
            target: target.into(),
        }
    }

    /// Linear interpolation of position and target.
    ///
    /// `t <= 0` yields `self` and `t >= 1` yields `other` exactly.
    pub fn lerp(&self, other: &Pose, t: f32) -> Pose {
        if t <= 0.0 {
            return *self;
        }
        if t >= 1.0 {
            return *other;
        }
        Pose {
            position: lerp_point(self.position, other.position, t),
            target: lerp_point(self.target, other.target, t),
        }
    }

    /// Unit vector from position to target, if the two are distinct.
    pub fn forward(&self) -> Option<Vector3<f32>> {
        let dir = self.target - self.position;
        (dir.magnitude2() > f32::EPSILON).then(|| dir.normalize())
    }

    pub fn view_matrix(&self) -> Matrix4<f32> {
        Matrix4::look_at_rh(self.position, self.target, Vector3::unit_y())
    }
}

fn lerp_point(a: Point3<f32>, b: Point3<f32>, t: f32) -> Point3<f32> {
    Point3::from_vec(a.to_vec() + (b - a) * t)
}

/// Camera pose plus the manual-orbit angles layered on top of it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraState {
    pub position: Point3<f32>,
    pub target: Point3<f32>,
    /// Unbounded.
    pub yaw: Rad<f32>,
    /// Clamped to ±90°.
    pub pitch: Rad<f32>,
}

/// Perspective projection in OpenGL clip conventions; [`OPENGL_TO_WGPU_MATRIX`]
/// converts for rendering.
#[derive(Clone, Copy, Debug)]
pub struct Projection {
    aspect: f32,
    fovy: Rad<f32>,
    znear: f32,
    zfar: f32,
}

impl Projection {
    pub fn new<F: Into<Rad<f32>>>(width: u32, height: u32, fovy: F, znear: f32, zfar: f32) -> Self {
        Self {
            aspect: aspect(width as f32, height as f32),
            fovy: fovy.into(),
            znear,
            zfar,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.aspect = aspect(width as f32, height as f32);
    }

    pub fn set_aspect(&mut self, width: f32, height: f32) {
        self.aspect = aspect(width, height);
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn calc_matrix(&self) -> Matrix4<f32> {
        cgmath::perspective(self.fovy, self.aspect, self.znear, self.zfar)
    }
}

fn aspect(width: f32, height: f32) -> f32 {
    if width > 0.0 && height > 0.0 {
        width / height
    } else {
        1.0
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
    pub eye: [f32; 4],
}

impl Default for CameraUniform {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraUniform {
    pub fn new() -> Self {
        use cgmath::SquareMatrix;
        Self {
            view_proj: Matrix4::identity().into(),
            eye: [0.0; 4],
        }
    }

    pub fn update_view_proj(&mut self, pose: &Pose, projection: &Projection) {
        self.eye = pose.position.to_homogeneous().into();
        self.view_proj = (OPENGL_TO_WGPU_MATRIX * projection.calc_matrix() * pose.view_matrix()).into();
    }
}
