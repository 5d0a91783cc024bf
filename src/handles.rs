//! Handle virtualization.
//!
//! The scene layer tracks GPU resources by identity: it clones, compares and
//! eventually drops references to "the vertex buffer of this mesh". A
//! [`RawContext`] only hands back integers, and integers are recycled as soon as
//! a resource is deleted, so a stale integer silently aliases whatever resource
//! the driver creates next.
//!
//! [`VirtualContext`] intercepts every create/delete pair of the raw context:
//!
//! 1. `create` calls through for a numeric ID,
//! 2. looks up or allocates the [`Handle`] for that ID in the per-kind [`HandleTable`],
//! 3. returns the handle instead of the number,
//! 4. `delete` accepts a handle or a raw ID, resolves it to the canonical ID,
//!    calls through and drops the table entry, invalidating the handle.
//!
//! Kinds the raw context cannot delete are left unvirtualized and keep returning
//! plain IDs ([`Resource::Raw`]).

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::bail;
use log::{debug, info, warn};

use crate::context::{BufferUsage, DrawCall, FrameUniforms, RawContext, ResourceKind};

struct Slot {
    kind: ResourceKind,
    id: u32,
    live: AtomicBool,
}

/// Identity-stable wrapper around one live numeric resource ID.
///
/// Clones share identity: two handles compare equal only if they wrap the same
/// allocation, even when a later resource reuses the same numeric ID.
#[derive(Clone)]
pub struct Handle(Arc<Slot>);

impl Handle {
    fn new(kind: ResourceKind, id: u32) -> Self {
        Self(Arc::new(Slot {
            kind,
            id,
            live: AtomicBool::new(true),
        }))
    }

    pub fn kind(&self) -> ResourceKind {
        self.0.kind
    }

    /// The wrapped numeric ID, or `None` once the resource has been deleted.
    pub fn id(&self) -> Option<u32> {
        self.is_live().then_some(self.0.id)
    }

    pub fn is_live(&self) -> bool {
        self.0.live.load(Ordering::Acquire)
    }

    pub fn ptr_eq(&self, other: &Handle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn invalidate(&self) {
        self.0.live.store(false, Ordering::Release);
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Handle {}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_live() {
            write!(f, "Handle({:?}#{})", self.0.kind, self.0.id)
        } else {
            write!(f, "Handle({:?}#{}, deleted)", self.0.kind, self.0.id)
        }
    }
}

/// Live handles of one kind, keyed by numeric ID.
#[derive(Debug, Default)]
pub struct HandleTable {
    live: HashMap<u32, Handle>,
}

impl HandleTable {
    fn wrap(&mut self, kind: ResourceKind, id: u32) -> Handle {
        self.live
            .entry(id)
            .or_insert_with(|| Handle::new(kind, id))
            .clone()
    }

    pub fn get(&self, id: u32) -> Option<&Handle> {
        self.live.get(&id)
    }

    fn remove(&mut self, id: u32) -> Option<Handle> {
        self.live.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

/// What [`VirtualContext::create`] hands back.
#[derive(Clone, Debug, PartialEq)]
pub enum Resource {
    Virtual(Handle),
    /// Returned for kinds that could not be virtualized.
    Raw { kind: ResourceKind, id: u32 },
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Virtual(handle) => handle.kind(),
            Resource::Raw { kind, .. } => *kind,
        }
    }

    pub fn handle(&self) -> Option<&Handle> {
        match self {
            Resource::Virtual(handle) => Some(handle),
            Resource::Raw { .. } => None,
        }
    }
}

/// Anything [`VirtualContext::delete`] accepts: a wrapper or a bare numeric ID.
#[derive(Clone, Copy, Debug)]
pub enum ResourceRef<'a> {
    Handle(&'a Handle),
    Raw(ResourceKind, u32),
}

impl<'a> From<&'a Handle> for ResourceRef<'a> {
    fn from(handle: &'a Handle) -> Self {
        ResourceRef::Handle(handle)
    }
}

impl<'a> From<&'a Resource> for ResourceRef<'a> {
    fn from(resource: &'a Resource) -> Self {
        match resource {
            Resource::Virtual(handle) => ResourceRef::Handle(handle),
            Resource::Raw { kind, id } => ResourceRef::Raw(*kind, *id),
        }
    }
}

impl From<(ResourceKind, u32)> for ResourceRef<'_> {
    fn from((kind, id): (ResourceKind, u32)) -> Self {
        ResourceRef::Raw(kind, id)
    }
}

/// A [`RawContext`] whose create/delete entry points deal in [`Handle`]s.
///
/// Installing consumes the raw context, so every allocation made afterwards goes
/// through the tables.
pub struct VirtualContext<C: RawContext> {
    raw: C,
    tables: HashMap<ResourceKind, HandleTable>,
    creatable: BTreeSet<ResourceKind>,
    deletable: BTreeSet<ResourceKind>,
}

impl<C: RawContext> VirtualContext<C> {
    pub fn install(raw: C) -> Self {
        let mut tables = HashMap::new();
        let mut creatable = BTreeSet::new();
        let mut deletable = BTreeSet::new();
        for entry in raw.entry_points() {
            if entry.create {
                creatable.insert(entry.kind);
            }
            if entry.delete {
                deletable.insert(entry.kind);
            }
            match (entry.create, entry.delete) {
                (true, true) => {
                    tables.insert(entry.kind, HandleTable::default());
                }
                (true, false) => warn!(
                    "{:?} can be created but has no delete counterpart; leaving it unvirtualized",
                    entry.kind
                ),
                _ => (),
            }
        }
        let mut virtualized: Vec<_> = tables.keys().copied().collect();
        virtualized.sort();
        info!("Virtualized resource kinds: {:?}", virtualized);
        Self {
            raw,
            tables,
            creatable,
            deletable,
        }
    }

    pub fn is_virtualized(&self, kind: ResourceKind) -> bool {
        self.tables.contains_key(&kind)
    }

    pub fn create(&mut self, kind: ResourceKind) -> anyhow::Result<Resource> {
        if !self.creatable.contains(&kind) {
            bail!("the graphics context exposes no create entry point for {kind:?}");
        }
        let id = self.raw.create(kind)?;
        let resource = match self.tables.get_mut(&kind) {
            Some(table) => Resource::Virtual(table.wrap(kind, id)),
            None => Resource::Raw { kind, id },
        };
        debug!("created {:?}", resource);
        Ok(resource)
    }

    /// Releases a resource. Deleting a dead handle, or an ID that is not live
    /// in its table, is logged and ignored so a recycled ID is never freed twice.
    pub fn delete<'a>(&mut self, resource: impl Into<ResourceRef<'a>>) {
        let (kind, id) = match resource.into() {
            ResourceRef::Handle(handle) => match handle.id() {
                Some(id) => (handle.kind(), id),
                None => {
                    warn!("{:?} was already deleted", handle);
                    return;
                }
            },
            ResourceRef::Raw(kind, id) => (kind, id),
        };

        match self.tables.get_mut(&kind) {
            Some(table) => match table.remove(id) {
                Some(handle) => {
                    handle.invalidate();
                    self.raw.delete(kind, id);
                    debug!("deleted {:?}#{}", kind, id);
                }
                None => warn!("{:?}#{} is not live; ignoring delete", kind, id),
            },
            None if self.deletable.contains(&kind) => self.raw.delete(kind, id),
            None => warn!(
                "{:?}#{} cannot be deleted: the graphics context has no delete entry point",
                kind, id
            ),
        }
    }

    /// The live handle wrapping `id`, if any.
    pub fn lookup(&self, kind: ResourceKind, id: u32) -> Option<Handle> {
        self.tables.get(&kind)?.get(id).cloned()
    }

    /// Resolves a wrapper or raw reference to the numeric ID the raw context understands.
    pub fn resolve<'a>(&self, resource: impl Into<ResourceRef<'a>>) -> Option<u32> {
        match resource.into() {
            ResourceRef::Handle(handle) => handle.id(),
            ResourceRef::Raw(_, id) => Some(id),
        }
    }

    pub fn live_count(&self, kind: ResourceKind) -> usize {
        self.tables.get(&kind).map_or(0, HandleTable::len)
    }

    pub fn buffer_data(
        &mut self,
        buffer: &Resource,
        usage: BufferUsage,
        data: &[u8],
    ) -> anyhow::Result<()> {
        let Some(id) = self.resolve(buffer) else {
            bail!("cannot upload into deleted {:?}", buffer);
        };
        self.raw.buffer_data(id, usage, data)
    }

    pub fn begin_frame(&mut self, frame: &FrameUniforms) -> anyhow::Result<()> {
        self.raw.begin_frame(frame)
    }

    pub fn draw_indexed(&mut self, call: &DrawCall) -> anyhow::Result<()> {
        self.raw.draw_indexed(call)
    }

    pub fn present(&mut self) -> anyhow::Result<()> {
        self.raw.present()
    }

    pub fn raw(&self) -> &C {
        &self.raw
    }

    pub fn raw_mut(&mut self) -> &mut C {
        &mut self.raw
    }
}

impl<C: RawContext> fmt::Debug for VirtualContext<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualContext")
            .field("tables", &self.tables)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{
        EntryPoint,
        headless::{Call, HeadlessContext},
    };

    fn installed() -> VirtualContext<HeadlessContext> {
        VirtualContext::install(HeadlessContext::new())
    }

    #[test]
    fn create_returns_identity_stable_wrapper() {
        let mut ctx = installed();
        let buffer = ctx.create(ResourceKind::Buffer).unwrap();
        let handle = buffer.handle().unwrap().clone();
        let id = handle.id().unwrap();

        let first = ctx.lookup(ResourceKind::Buffer, id).unwrap();
        let second = ctx.lookup(ResourceKind::Buffer, id).unwrap();
        assert!(first.ptr_eq(&handle));
        assert!(second.ptr_eq(&first));
    }

    #[test]
    fn delete_invalidates_and_removes_entry() {
        let mut ctx = installed();
        let buffer = ctx.create(ResourceKind::Buffer).unwrap();
        let handle = buffer.handle().unwrap().clone();
        let id = handle.id().unwrap();

        ctx.delete(&buffer);
        assert!(!handle.is_live());
        assert_eq!(handle.id(), None);
        assert!(ctx.lookup(ResourceKind::Buffer, id).is_none());
        assert_eq!(ctx.live_count(ResourceKind::Buffer), 0);
        assert_eq!(ctx.raw().live(ResourceKind::Buffer), 0);
    }

    #[test]
    fn reused_id_gets_a_fresh_wrapper() {
        let mut ctx = installed();
        let old = ctx.create(ResourceKind::Texture).unwrap();
        let old_handle = old.handle().unwrap().clone();
        let id = old_handle.id().unwrap();
        ctx.delete(&old);

        let new = ctx.create(ResourceKind::Texture).unwrap();
        let new_handle = new.handle().unwrap();
        assert_eq!(new_handle.id(), Some(id));
        assert_ne!(&old_handle, new_handle);
        assert!(ctx.lookup(ResourceKind::Texture, id).unwrap().ptr_eq(new_handle));
    }

    #[test]
    fn stale_wrapper_cannot_free_recycled_id() {
        let mut ctx = installed();
        let old = ctx.create(ResourceKind::Buffer).unwrap();
        let stale = old.handle().unwrap().clone();
        ctx.delete(&old);
        let new = ctx.create(ResourceKind::Buffer).unwrap();

        ctx.delete(&stale);
        assert!(new.handle().unwrap().is_live());
        assert_eq!(ctx.raw().live(ResourceKind::Buffer), 1);
    }

    #[test]
    fn delete_accepts_raw_numeric_id() {
        let mut ctx = installed();
        let buffer = ctx.create(ResourceKind::Buffer).unwrap();
        let handle = buffer.handle().unwrap().clone();
        let id = handle.id().unwrap();

        ctx.delete((ResourceKind::Buffer, id));
        assert!(!handle.is_live());
        assert!(ctx.raw().calls().contains(&Call::Delete(ResourceKind::Buffer, id)));
    }

    #[test]
    fn double_delete_is_not_forwarded() {
        let mut ctx = installed();
        let buffer = ctx.create(ResourceKind::Buffer).unwrap();
        let id = ctx.resolve(&buffer).unwrap();
        ctx.delete(&buffer);
        ctx.delete(&buffer);
        ctx.delete((ResourceKind::Buffer, id));

        let deletes = ctx
            .raw()
            .calls()
            .iter()
            .filter(|call| matches!(call, Call::Delete(..)))
            .count();
        assert_eq!(deletes, 1);
    }

    #[test]
    fn tables_are_per_kind() {
        let mut ctx = installed();
        let buffer = ctx.create(ResourceKind::Buffer).unwrap();
        let texture = ctx.create(ResourceKind::Texture).unwrap();
        assert_eq!(ctx.resolve(&buffer), ctx.resolve(&texture));
        assert_ne!(buffer, texture);

        ctx.delete(&buffer);
        assert!(texture.handle().unwrap().is_live());
        assert_eq!(ctx.live_count(ResourceKind::Texture), 1);
    }

    #[test]
    fn kind_without_delete_stays_raw() {
        let raw = HeadlessContext::with_entry_points(vec![
            EntryPoint::paired(ResourceKind::Buffer),
            EntryPoint::create_only(ResourceKind::Query),
        ]);
        let mut ctx = VirtualContext::install(raw);
        assert!(ctx.is_virtualized(ResourceKind::Buffer));
        assert!(!ctx.is_virtualized(ResourceKind::Query));

        let query = ctx.create(ResourceKind::Query).unwrap();
        assert!(matches!(query, Resource::Raw { kind: ResourceKind::Query, .. }));

        ctx.delete(&query);
        assert!(
            !ctx.raw()
                .calls()
                .iter()
                .any(|call| matches!(call, Call::Delete(ResourceKind::Query, _)))
        );
    }

    #[test]
    fn create_without_entry_point_fails() {
        let raw = HeadlessContext::with_entry_points(vec![EntryPoint::paired(
            ResourceKind::Buffer,
        )]);
        let mut ctx = VirtualContext::install(raw);
        assert!(ctx.create(ResourceKind::Program).is_err());
    }

    #[test]
    fn upload_into_deleted_handle_fails() {
        let mut ctx = installed();
        let buffer = ctx.create(ResourceKind::Buffer).unwrap();
        let stale = buffer.clone();
        ctx.delete(&buffer);
        assert!(ctx.buffer_data(&stale, BufferUsage::Vertex, &[1, 2, 3]).is_err());
    }
}
