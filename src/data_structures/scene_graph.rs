//! Scene graph and hierarchical scene organization.
//!
//! A scene is a tree of boxed [`SceneNode`]s. Every node carries a local
//! transform relative to its parent and a cached world transform refreshed by
//! [`SceneNode::update_world_transforms`]. [`ModelNode`]s additionally own a
//! mesh: CPU geometry shared between clones, a per-node material and, once
//! uploaded, the GPU buffers that back it.

use std::{fmt, sync::Arc};

use cgmath::{InnerSpace, Point3, Vector3};

use crate::{data_structures::instance::Instance, handles::Resource};

/// Marks a node the user may tap, and who gets told about it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InteractionTag {
    pub name: String,
    pub owner: String,
}

impl InteractionTag {
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

/// Immutable vertex and index data. Shared by every clone of a mesh.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Geometry {
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
}

impl Geometry {
    /// Builds geometry from raw attributes.
    ///
    /// Missing indices mean a plain triangle list; missing normals are
    /// accumulated from the faces.
    pub fn from_positions(
        positions: Vec<[f32; 3]>,
        normals: Option<Vec<[f32; 3]>>,
        indices: Option<Vec<u32>>,
    ) -> Self {
        let indices = indices.unwrap_or_else(|| (0..positions.len() as u32).collect());
        let normals = match normals {
            Some(normals) if normals.len() == positions.len() => normals,
            _ => face_normals(&positions, &indices),
        };
        let vertices = positions
            .into_iter()
            .zip(normals)
            .map(|(position, normal)| MeshVertex { position, normal })
            .collect();
        Self { vertices, indices }
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    /// Triangles in local space. Indices past the vertex list are skipped.
    pub fn triangles(&self) -> impl Iterator<Item = [Point3<f32>; 3]> + '_ {
        self.indices.chunks_exact(3).filter_map(|tri| {
            let corner = |i: u32| {
                self.vertices
                    .get(i as usize)
                    .map(|v| Point3::from(v.position))
            };
            Some([corner(tri[0])?, corner(tri[1])?, corner(tri[2])?])
        })
    }
}

fn face_normals(positions: &[[f32; 3]], indices: &[u32]) -> Vec<[f32; 3]> {
    let mut sums = vec![Vector3::new(0.0f32, 0.0, 0.0); positions.len()];
    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| i as usize);
        if a >= positions.len() || b >= positions.len() || c >= positions.len() {
            continue;
        }
        let pa = Vector3::from(positions[a]);
        let face = (Vector3::from(positions[b]) - pa).cross(Vector3::from(positions[c]) - pa);
        for i in [a, b, c] {
            sums[i] += face;
        }
    }
    sums.into_iter()
        .map(|n| {
            if n.magnitude2() > f32::EPSILON {
                n.normalize().into()
            } else {
                [0.0, 1.0, 0.0]
            }
        })
        .collect()
}

/// Unlit material: `base_color` tinted by an additive emissive term.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EmissiveMaterial {
    pub base_color: [f32; 4],
    pub emissive: [f32; 3],
    pub emissive_intensity: f32,
}

impl Default for EmissiveMaterial {
    fn default() -> Self {
        Self {
            base_color: [1.0; 4],
            emissive: [0.0; 3],
            emissive_intensity: 1.0,
        }
    }
}

/// Uploaded buffers of one mesh.
#[derive(Clone, Debug, PartialEq)]
pub struct GpuMesh {
    pub vertex: Resource,
    pub index: Resource,
    pub index_count: u32,
}

#[derive(Debug)]
pub struct MeshData {
    pub geometry: Arc<Geometry>,
    pub material: EmissiveMaterial,
    pub gpu: Option<GpuMesh>,
}

impl MeshData {
    pub fn new(geometry: Geometry, material: EmissiveMaterial) -> Self {
        Self {
            geometry: Arc::new(geometry),
            material,
            gpu: None,
        }
    }
}

/// Clones share geometry and copy the material. GPU buffers belong to exactly
/// one mesh, so a clone starts without them.
impl Clone for MeshData {
    fn clone(&self) -> Self {
        Self {
            geometry: Arc::clone(&self.geometry),
            material: self.material,
            gpu: None,
        }
    }
}

/// A node of the scene graph.
pub trait SceneNode: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn get_local_transform(&self) -> Instance;

    fn set_local_transform(&mut self, instance: Instance);

    fn get_world_transform(&self) -> Instance;

    /// Recomputes this node's world transform from its parent's and recurses.
    fn update_world_transforms(&mut self, parent: &Instance);

    fn update_world_transform_all(&mut self) {
        self.update_world_transforms(&Instance::default());
    }

    fn get_children(&self) -> &Vec<Box<dyn SceneNode>>;

    fn get_children_mut(&mut self) -> &mut Vec<Box<dyn SceneNode>>;

    fn add_child(&mut self, child: Box<dyn SceneNode>);

    fn tag(&self) -> Option<&InteractionTag>;

    fn set_tag(&mut self, tag: Option<InteractionTag>);

    fn mesh(&self) -> Option<&MeshData> {
        None
    }

    fn mesh_mut(&mut self) -> Option<&mut MeshData> {
        None
    }

    /// Deep copy of the subtree. Geometry is shared, materials and
    /// transforms are copied, GPU buffers are not.
    fn clone_node(&self) -> Box<dyn SceneNode>;
}

#[derive(Debug, Default)]
struct NodeCore {
    name: String,
    local: Instance,
    world: Instance,
    tag: Option<InteractionTag>,
    children: Vec<Box<dyn SceneNode>>,
}

impl NodeCore {
    fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    fn update(&mut self, parent: &Instance) {
        self.world = parent * &self.local;
        let world = self.world;
        for child in self.children.iter_mut() {
            child.update_world_transforms(&world);
        }
    }

    fn deep_clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            local: self.local,
            world: self.world,
            tag: self.tag.clone(),
            children: self.children.iter().map(|c| c.clone_node()).collect(),
        }
    }
}

/// Groups children under a shared transform.
#[derive(Debug)]
pub struct ContainerNode {
    core: NodeCore,
}

impl ContainerNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: NodeCore::named(name),
        }
    }

    pub fn with_transform(mut self, local: Instance) -> Self {
        self.core.local = local;
        self
    }
}

/// A node that draws a mesh.
#[derive(Debug)]
pub struct ModelNode {
    core: NodeCore,
    mesh: MeshData,
}

impl ModelNode {
    pub fn new(name: impl Into<String>, mesh: MeshData) -> Self {
        Self {
            core: NodeCore::named(name),
            mesh,
        }
    }

    pub fn with_transform(mut self, local: Instance) -> Self {
        self.core.local = local;
        self
    }
}

macro_rules! impl_node_core {
    () => {
        fn name(&self) -> &str {
            &self.core.name
        }

        fn get_local_transform(&self) -> Instance {
            self.core.local
        }

        fn set_local_transform(&mut self, instance: Instance) {
            self.core.local = instance;
        }

        fn get_world_transform(&self) -> Instance {
            self.core.world
        }

        fn update_world_transforms(&mut self, parent: &Instance) {
            self.core.update(parent);
        }

        fn get_children(&self) -> &Vec<Box<dyn SceneNode>> {
            &self.core.children
        }

        fn get_children_mut(&mut self) -> &mut Vec<Box<dyn SceneNode>> {
            &mut self.core.children
        }

        fn add_child(&mut self, child: Box<dyn SceneNode>) {
            self.core.children.push(child);
        }

        fn tag(&self) -> Option<&InteractionTag> {
            self.core.tag.as_ref()
        }

        fn set_tag(&mut self, tag: Option<InteractionTag>) {
            self.core.tag = tag;
        }
    };
}

impl SceneNode for ContainerNode {
    impl_node_core!();

    fn clone_node(&self) -> Box<dyn SceneNode> {
        Box::new(Self {
            core: self.core.deep_clone(),
        })
    }
}

impl SceneNode for ModelNode {
    impl_node_core!();

    fn mesh(&self) -> Option<&MeshData> {
        Some(&self.mesh)
    }

    fn mesh_mut(&mut self) -> Option<&mut MeshData> {
        Some(&mut self.mesh)
    }

    fn clone_node(&self) -> Box<dyn SceneNode> {
        Box::new(Self {
            core: self.core.deep_clone(),
            mesh: self.mesh.clone(),
        })
    }
}

/// Depth-first, parents before children.
pub fn visit(node: &dyn SceneNode, f: &mut dyn FnMut(&dyn SceneNode)) {
    f(node);
    for child in node.get_children() {
        visit(child.as_ref(), f);
    }
}

pub fn visit_mut(node: &mut dyn SceneNode, f: &mut dyn FnMut(&mut dyn SceneNode)) {
    f(node);
    for child in node.get_children_mut().iter_mut() {
        visit_mut(child.as_mut(), f);
    }
}

pub fn mesh_count(node: &dyn SceneNode) -> usize {
    let mut count = 0;
    visit(node, &mut |n| {
        if n.mesh().is_some() {
            count += 1;
        }
    });
    count
}

pub fn find_by_name<'a>(node: &'a dyn SceneNode, name: &str) -> Option<&'a dyn SceneNode> {
    if node.name() == name {
        return Some(node);
    }
    node.get_children()
        .iter()
        .find_map(|child| find_by_name(child.as_ref(), name))
}
