//! In-memory graphics context.
//!
//! `HeadlessContext` behaves like a GL driver without a GPU: it allocates
//! numeric IDs per kind (recycling freed ones), keeps track of buffer uploads and
//! records every call and presented frame so tests can assert on them.

use std::collections::HashMap;

use anyhow::{bail, Context as _};

use crate::context::{
    BufferUsage, DrawCall, EntryPoint, FrameUniforms, IdAllocator, RawContext, ResourceKind,
};

/// A recorded context call.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Create(ResourceKind, u32),
    Delete(ResourceKind, u32),
    BufferData(u32, BufferUsage, usize),
    BeginFrame,
    Draw { vertex: u32, index: u32, index_count: u32 },
    Present,
}

/// A presented frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub uniforms: FrameUniforms,
    pub draws: Vec<DrawCall>,
}

#[derive(Debug)]
pub struct HeadlessContext {
    entry_points: Vec<EntryPoint>,
    ids: HashMap<ResourceKind, IdAllocator>,
    buffers: HashMap<u32, (BufferUsage, usize)>,
    calls: Vec<Call>,
    current: Option<Frame>,
    frames: Vec<Frame>,
}

impl Default for HeadlessContext {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessContext {
    /// A context exposing a create/delete pair for every [`ResourceKind`].
    pub fn new() -> Self {
        Self::with_entry_points(ResourceKind::ALL.into_iter().map(EntryPoint::paired).collect())
    }

    pub fn with_entry_points(entry_points: Vec<EntryPoint>) -> Self {
        Self {
            entry_points,
            ids: HashMap::new(),
            buffers: HashMap::new(),
            calls: Vec::new(),
            current: None,
            frames: Vec::new(),
        }
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn last_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Number of IDs of `kind` currently allocated.
    pub fn live(&self, kind: ResourceKind) -> usize {
        self.calls.iter().fold(0, |live, call| match call {
            Call::Create(k, _) if *k == kind => live + 1,
            Call::Delete(k, _) if *k == kind => live - 1,
            _ => live,
        })
    }

    /// Byte size of the storage last uploaded to buffer `id`.
    pub fn buffer_len(&self, id: u32) -> Option<usize> {
        self.buffers.get(&id).map(|(_, len)| *len)
    }

    fn entry_point(&self, kind: ResourceKind) -> Option<&EntryPoint> {
        self.entry_points.iter().find(|ep| ep.kind == kind)
    }
}

impl RawContext for HeadlessContext {
    fn entry_points(&self) -> Vec<EntryPoint> {
        self.entry_points.clone()
    }

    fn create(&mut self, kind: ResourceKind) -> anyhow::Result<u32> {
        if !self.entry_point(kind).is_some_and(|ep| ep.create) {
            bail!("headless context has no create entry point for {kind:?}");
        }
        let id = self.ids.entry(kind).or_default().allocate()?;
        self.calls.push(Call::Create(kind, id));
        Ok(id)
    }

    fn delete(&mut self, kind: ResourceKind, id: u32) {
        if !self.entry_point(kind).is_some_and(|ep| ep.delete) {
            log::error!("headless context has no delete entry point for {kind:?}");
            return;
        }
        let released = self.ids.entry(kind).or_default().release(id);
        if !released {
            log::warn!("headless context: {kind:?} #{id} is not allocated");
            return;
        }
        if kind == ResourceKind::Buffer {
            self.buffers.remove(&id);
        }
        self.calls.push(Call::Delete(kind, id));
    }

    fn buffer_data(&mut self, id: u32, usage: BufferUsage, data: &[u8]) -> anyhow::Result<()> {
        let allocated = self
            .ids
            .get(&ResourceKind::Buffer)
            .is_some_and(|ids| ids.is_allocated(id));
        if !allocated {
            bail!("buffer #{id} does not exist");
        }
        self.buffers.insert(id, (usage, data.len()));
        self.calls.push(Call::BufferData(id, usage, data.len()));
        Ok(())
    }

    fn begin_frame(&mut self, frame: &FrameUniforms) -> anyhow::Result<()> {
        if self.current.is_some() {
            log::warn!("begin_frame called twice; dropping the unfinished frame");
        }
        self.current = Some(Frame {
            uniforms: *frame,
            draws: Vec::new(),
        });
        self.calls.push(Call::BeginFrame);
        Ok(())
    }

    fn draw_indexed(&mut self, call: &DrawCall) -> anyhow::Result<()> {
        for id in [call.vertex, call.index] {
            if !self.buffers.contains_key(&id) {
                bail!("draw references buffer #{id} without storage");
            }
        }
        let frame = self
            .current
            .as_mut()
            .context("draw_indexed called outside of a frame")?;
        frame.draws.push(*call);
        self.calls.push(Call::Draw {
            vertex: call.vertex,
            index: call.index,
            index_count: call.index_count,
        });
        Ok(())
    }

    fn present(&mut self) -> anyhow::Result<()> {
        let frame = self
            .current
            .take()
            .context("present called without begin_frame")?;
        self.frames.push(frame);
        self.calls.push(Call::Present);
        Ok(())
    }
}
