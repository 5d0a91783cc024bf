//! Turns an asset clone into a renderable, interactable scene.

use anyhow::Context as _;
use cgmath::{InnerSpace, One, Quaternion, Rad, Rotation3, Vector3};
use log::{debug, warn};

use crate::{
    config::ViewConfig,
    context::{BufferUsage, DrawCall, RawContext, ResourceKind},
    data_structures::{
        instance::Instance,
        scene_graph::{
            ContainerNode, EmissiveMaterial, GpuMesh, InteractionTag, MeshData, SceneNode,
            mesh_count, visit, visit_mut,
        },
    },
    handles::VirtualContext,
};

const FIXUP_NAME: &str = "fixup";

#[derive(Clone, Debug)]
pub struct SceneBuilder {
    scale: f32,
    orientation: Quaternion<f32>,
    base_color: [f32; 4],
    emissive_boost: f32,
    interactive: Vec<InteractionTag>,
}

impl SceneBuilder {
    pub fn from_config(config: &ViewConfig) -> Self {
        Self {
            scale: config.scale,
            orientation: config.orientation,
            base_color: config.base_color,
            emissive_boost: config.emissive_boost,
            interactive: Vec::new(),
        }
    }

    /// Marks nodes named `name` as tappable on behalf of `owner`.
    pub fn interactive(mut self, name: impl Into<String>, owner: impl Into<String>) -> Self {
        self.interactive.push(InteractionTag::new(name, owner));
        self
    }

    pub fn build(&self, asset: Box<dyn SceneNode>, color: [f32; 3]) -> Scene {
        let mut root = ContainerNode::new(FIXUP_NAME).with_transform(
            Instance::new()
                .with_rotation(self.orientation)
                .with_scale(Vector3::new(self.scale, self.scale, self.scale)),
        );
        root.add_child(asset);

        let material = EmissiveMaterial {
            base_color: self.base_color,
            emissive: color,
            emissive_intensity: self.emissive_boost,
        };
        let mut tagged = 0;
        visit_mut(&mut root, &mut |node| {
            if let Some(mesh) = node.mesh_mut() {
                mesh.material = material;
            }
            if let Some(tag) = self.interactive.iter().find(|tag| tag.name == node.name()) {
                node.set_tag(Some(tag.clone()));
                tagged += 1;
            }
        });
        if tagged < self.interactive.len() {
            warn!(
                "Only {tagged} of {} interactive nodes were found in the asset",
                self.interactive.len()
            );
        }
        root.update_world_transform_all();

        Scene {
            root: Box::new(root),
            color,
            spun: Quaternion::one(),
        }
    }
}

/// A built scene. Owns the GPU buffers of its meshes once uploaded.
#[derive(Debug)]
pub struct Scene {
    root: Box<dyn SceneNode>,
    color: [f32; 3],
    /// Rotation accumulated by [`Scene::spin`].
    spun: Quaternion<f32>,
}

impl Scene {
    pub fn root(&self) -> &dyn SceneNode {
        self.root.as_ref()
    }

    pub fn mesh_count(&self) -> usize {
        mesh_count(self.root.as_ref())
    }

    pub fn emissive_color(&self) -> [f32; 3] {
        self.color
    }

    /// Recolours every mesh in place. Geometry and GPU buffers are kept.
    pub fn set_emissive_color(&mut self, color: [f32; 3]) {
        self.color = color;
        visit_mut(self.root.as_mut(), &mut |node| {
            if let Some(mesh) = node.mesh_mut() {
                mesh.material.emissive = color;
            }
        });
    }

    /// Rotates the whole scene about `axis` (world space).
    pub fn spin(&mut self, axis: Vector3<f32>, angle: Rad<f32>) {
        if angle.0 == 0.0 || axis.magnitude2() <= f32::EPSILON {
            return;
        }
        self.rotate(Quaternion::from_axis_angle(axis.normalize(), angle));
    }

    /// Total rotation applied by [`spin`](Self::spin) so far.
    pub fn spin_rotation(&self) -> Quaternion<f32> {
        self.spun
    }

    /// Continues the spin of `previous`, so swapping scenes keeps the star's angle.
    pub fn inherit_spin(&mut self, previous: &Scene) {
        self.rotate(previous.spun);
    }

    fn rotate(&mut self, rotation: Quaternion<f32>) {
        if rotation == Quaternion::one() {
            return;
        }
        self.spun = (rotation * self.spun).normalize();
        let mut local = self.root.get_local_transform();
        local.rotation = (rotation * local.rotation).normalize();
        self.root.set_local_transform(local);
        self.root.update_world_transform_all();
    }

    /// Creates vertex and index buffers for every mesh that has none yet.
    pub fn upload<C: RawContext>(&mut self, ctx: &mut VirtualContext<C>) -> anyhow::Result<()> {
        let mut result = Ok(());
        visit_mut(self.root.as_mut(), &mut |node| {
            if result.is_err() {
                return;
            }
            let name = node.name().to_string();
            if let Some(mesh) = node.mesh_mut().filter(|mesh| mesh.gpu.is_none()) {
                result = upload_mesh(ctx, mesh).with_context(|| format!("uploading mesh '{name}'"));
            }
        });
        result
    }

    /// Issues one draw per uploaded mesh.
    pub fn draw<C: RawContext>(&self, ctx: &mut VirtualContext<C>) -> anyhow::Result<()> {
        let mut calls = Vec::new();
        visit(self.root.as_ref(), &mut |node| {
            let Some(mesh) = node.mesh() else {
                return;
            };
            let Some(gpu) = &mesh.gpu else {
                return;
            };
            match (ctx.resolve(&gpu.vertex), ctx.resolve(&gpu.index)) {
                (Some(vertex), Some(index)) => calls.push(DrawCall {
                    vertex,
                    index,
                    index_count: gpu.index_count,
                    model: node.get_world_transform().to_matrix().into(),
                    base_color: mesh.material.base_color,
                    emissive: mesh.material.emissive,
                    emissive_intensity: mesh.material.emissive_intensity,
                }),
                _ => warn!("Mesh '{}' references deleted buffers", node.name()),
            }
        });
        for call in &calls {
            ctx.draw_indexed(call)?;
        }
        Ok(())
    }

    /// Deletes every buffer the scene owns.
    pub fn release<C: RawContext>(&mut self, ctx: &mut VirtualContext<C>) {
        let mut released = 0;
        visit_mut(self.root.as_mut(), &mut |node| {
            if let Some(gpu) = node.mesh_mut().and_then(|mesh| mesh.gpu.take()) {
                ctx.delete(&gpu.vertex);
                ctx.delete(&gpu.index);
                released += 1;
            }
        });
        debug!("Released buffers of {released} meshes");
    }
}

fn upload_mesh<C: RawContext>(ctx: &mut VirtualContext<C>, mesh: &mut MeshData) -> anyhow::Result<()> {
    let vertex = ctx.create(ResourceKind::Buffer)?;
    let index = match ctx.create(ResourceKind::Buffer) {
        Ok(index) => index,
        Err(err) => {
            ctx.delete(&vertex);
            return Err(err);
        }
    };
    let written = ctx
        .buffer_data(&vertex, BufferUsage::Vertex, bytemuck::cast_slice(&mesh.geometry.vertices))
        .and_then(|()| {
            ctx.buffer_data(&index, BufferUsage::Index, bytemuck::cast_slice(&mesh.geometry.indices))
        });
    if let Err(err) = written {
        ctx.delete(&vertex);
        ctx.delete(&index);
        return Err(err);
    }
    mesh.gpu = Some(GpuMesh {
        vertex,
        index,
        index_count: mesh.geometry.index_count(),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::headless::HeadlessContext,
        data_structures::scene_graph::{Geometry, ModelNode, find_by_name},
    };

    fn asset() -> Box<dyn SceneNode> {
        let geometry = || {
            Geometry::from_positions(
                vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]],
                None,
                None,
            )
        };
        let mut room = ContainerNode::new("room");
        let mut desk = ContainerNode::new("desk");
        desk.add_child(Box::new(ModelNode::new(
            "desk_top",
            MeshData::new(geometry(), EmissiveMaterial::default()),
        )));
        room.add_child(Box::new(desk));
        room.add_child(Box::new(ModelNode::new(
            "floor",
            MeshData::new(geometry(), EmissiveMaterial::default()),
        )));
        Box::new(room)
    }

    fn builder() -> SceneBuilder {
        SceneBuilder::from_config(&ViewConfig::default().with_scale(2.0)).interactive("desk", "messages")
    }

    #[test]
    fn materials_are_swapped_and_nodes_tagged() {
        let scene = builder().build(asset(), [0.2, 0.4, 0.8]);
        assert_eq!(scene.root().name(), FIXUP_NAME);
        assert_eq!(scene.mesh_count(), 2);

        let top = find_by_name(scene.root(), "desk_top").unwrap();
        let material = top.mesh().unwrap().material;
        assert_eq!(material.base_color, [1.0; 4]);
        assert_eq!(material.emissive, [0.2, 0.4, 0.8]);
        assert_eq!(material.emissive_intensity, 2.5);

        let desk = find_by_name(scene.root(), "desk").unwrap();
        assert_eq!(desk.tag(), Some(&InteractionTag::new("desk", "messages")));
        assert!(find_by_name(scene.root(), "floor").unwrap().tag().is_none());
    }

    #[test]
    fn fixup_applies_scale_and_orientation() {
        let scene = builder().build(asset(), [1.0, 1.0, 1.0]);
        let world = find_by_name(scene.root(), "floor").unwrap().get_world_transform();
        assert_eq!(world.scale, Vector3::new(2.0, 2.0, 2.0));
        // -90° about X takes the asset's +Z up onto +Y.
        let up = world.rotation * Vector3::unit_z();
        assert!((up - Vector3::unit_y()).magnitude() < 1e-5);
    }

    #[test]
    fn recolouring_keeps_buffers() {
        let mut ctx = VirtualContext::install(HeadlessContext::new());
        let mut scene = builder().build(asset(), [1.0, 0.0, 0.0]);
        scene.upload(&mut ctx).unwrap();
        let before = ctx.raw().calls().len();

        scene.set_emissive_color([0.0, 1.0, 0.0]);
        assert_eq!(ctx.raw().calls().len(), before);
        let top = find_by_name(scene.root(), "desk_top").unwrap().mesh().unwrap();
        assert_eq!(top.material.emissive, [0.0, 1.0, 0.0]);
        assert!(top.gpu.is_some());
    }

    #[test]
    fn upload_then_release_frees_every_buffer() {
        let mut ctx = VirtualContext::install(HeadlessContext::new());
        let mut scene = builder().build(asset(), [1.0, 1.0, 1.0]);
        scene.upload(&mut ctx).unwrap();
        assert_eq!(ctx.live_count(ResourceKind::Buffer), 4);

        scene.upload(&mut ctx).unwrap();
        assert_eq!(ctx.live_count(ResourceKind::Buffer), 4);

        scene.release(&mut ctx);
        assert_eq!(ctx.live_count(ResourceKind::Buffer), 0);
        assert_eq!(ctx.raw().live(ResourceKind::Buffer), 0);
    }

    #[test]
    fn spin_rotates_the_root_only() {
        let mut scene = builder().build(asset(), [1.0, 1.0, 1.0]);
        let before = find_by_name(scene.root(), "floor").unwrap().get_local_transform();
        scene.spin(Vector3::unit_y(), Rad(0.5));
        let after = find_by_name(scene.root(), "floor").unwrap();
        assert_eq!(after.get_local_transform(), before);
        assert_ne!(scene.root().get_local_transform().rotation, Quaternion::from_angle_x(cgmath::Deg(-90.0f32)));
    }

    #[test]
    fn rebuilt_scene_inherits_the_spin_angle() {
        let mut old = builder().build(asset(), [1.0, 1.0, 1.0]);
        old.spin(Vector3::unit_y(), Rad(0.5));
        old.spin(Vector3::unit_y(), Rad(0.25));

        let mut next = builder().build(asset(), [1.0, 1.0, 1.0]);
        next.inherit_spin(&old);

        assert_eq!(next.spin_rotation(), old.spin_rotation());
        let a = old.root().get_local_transform().rotation;
        let b = next.root().get_local_transform().rotation;
        assert!((a - b).magnitude() < 1e-5);
    }
}
