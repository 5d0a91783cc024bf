//! Low-level graphics contexts.
//!
//! A [`RawContext`] is the thin, GL-shaped surface the renderer talks to: every
//! resource it creates is identified by a plain `u32` that is only unique within
//! its [`ResourceKind`], and freed IDs may be handed out again. Two backends ship
//! with the crate:
//!
//! - [`gpu::GpuContext`] draws through wgpu into a winit window
//! - [`headless::HeadlessContext`] records every call in memory (tests, off-screen hosts)
//!
//! Nothing above this module should call a `RawContext` directly: wrap it with
//! [`crate::handles::VirtualContext::install`] first.

use std::collections::BTreeSet;

pub mod gpu;
pub mod headless;

/// Resource families exposed by a graphics context. Numeric IDs are only unique per kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Buffer,
    Texture,
    Sampler,
    Framebuffer,
    Renderbuffer,
    VertexArray,
    Program,
    Shader,
    Query,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::Buffer,
        ResourceKind::Texture,
        ResourceKind::Sampler,
        ResourceKind::Framebuffer,
        ResourceKind::Renderbuffer,
        ResourceKind::VertexArray,
        ResourceKind::Program,
        ResourceKind::Shader,
        ResourceKind::Query,
    ];
}

/// Which lifecycle entry points a context exposes for one kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryPoint {
    pub kind: ResourceKind,
    pub create: bool,
    pub delete: bool,
}

impl EntryPoint {
    /// A kind with both `create` and `delete`.
    pub fn paired(kind: ResourceKind) -> Self {
        Self {
            kind,
            create: true,
            delete: true,
        }
    }

    /// A kind that can be created but never released.
    pub fn create_only(kind: ResourceKind) -> Self {
        Self {
            kind,
            create: true,
            delete: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
    Uniform,
}

/// Per-frame camera data handed to [`RawContext::begin_frame`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub eye: [f32; 3],
    pub clear_colour: [f64; 4],
}

/// One indexed draw of a mesh with its emissive material.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawCall {
    pub vertex: u32,
    pub index: u32,
    pub index_count: u32,
    pub model: [[f32; 4]; 4],
    pub base_color: [f32; 4],
    pub emissive: [f32; 3],
    pub emissive_intensity: f32,
}

/// The low-level graphics context: numeric handles in, numeric handles out.
pub trait RawContext {
    /// Lists the create/delete entry points this context exposes.
    fn entry_points(&self) -> Vec<EntryPoint>;

    fn create(&mut self, kind: ResourceKind) -> anyhow::Result<u32>;

    fn delete(&mut self, kind: ResourceKind, id: u32);

    /// Uploads `data` into the buffer `id`, replacing any previous storage.
    fn buffer_data(&mut self, id: u32, usage: BufferUsage, data: &[u8]) -> anyhow::Result<()>;

    fn begin_frame(&mut self, frame: &FrameUniforms) -> anyhow::Result<()>;

    fn draw_indexed(&mut self, call: &DrawCall) -> anyhow::Result<()>;

    /// Submits the frame started by `begin_frame` and swaps it onto the surface.
    fn present(&mut self) -> anyhow::Result<()>;
}

/// Hands out the lowest free numeric ID, starting at 1, the way GL drivers recycle names.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: u32,
    free: BTreeSet<u32>,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self {
            next: 1,
            free: BTreeSet::new(),
        }
    }
}

impl IdAllocator {
    pub fn allocate(&mut self) -> anyhow::Result<u32> {
        if let Some(id) = self.free.pop_first() {
            return Ok(id);
        }
        let id = self.next;
        self.next = self
            .next
            .checked_add(1)
            .ok_or_else(|| anyhow::anyhow!("resource ID space exhausted"))?;
        Ok(id)
    }

    /// Returns `false` if `id` was never allocated or is already free.
    pub fn release(&mut self, id: u32) -> bool {
        if id == 0 || id >= self.next {
            return false;
        }
        self.free.insert(id)
    }

    pub fn is_allocated(&self, id: u32) -> bool {
        id != 0 && id < self.next && !self.free.contains(&id)
    }
}
