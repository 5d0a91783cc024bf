//! Placeholder geometry shown while an asset loads, or instead of one that failed.

use cgmath::{InnerSpace, Vector3};

use crate::data_structures::scene_graph::{
    EmissiveMaterial, Geometry, MeshData, MeshVertex, ModelNode, SceneNode,
};

pub const FALLBACK_NAME: &str = "fallback";

/// A flat-shaded octahedron with half-extents `size`.
///
/// A mirroring size (odd number of negative components) keeps the faces
/// counter-clockwise by swapping two corners of each triangle.
pub fn octahedron(size: [f32; 3]) -> Geometry {
    let [sx, sy, sz] = size;
    let px = [sx, 0.0, 0.0];
    let nx = [-sx, 0.0, 0.0];
    let py = [0.0, sy, 0.0];
    let ny = [0.0, -sy, 0.0];
    let pz = [0.0, 0.0, sz];
    let nz = [0.0, 0.0, -sz];
    let faces = [
        [px, py, pz],
        [pz, py, nx],
        [nx, py, nz],
        [nz, py, px],
        [px, pz, ny],
        [pz, nx, ny],
        [nx, nz, ny],
        [nz, px, ny],
    ];
    let mirrored = sx * sy * sz < 0.0;

    let mut vertices = Vec::with_capacity(faces.len() * 3);
    for [a, b, c] in faces {
        let [a, b, c] = if mirrored { [a, c, b] } else { [a, b, c] };
        let (va, vb, vc) = (Vector3::from(a), Vector3::from(b), Vector3::from(c));
        let face = (vb - va).cross(vc - va);
        let normal = if face.magnitude2() > f32::EPSILON {
            face.normalize().into()
        } else {
            [0.0, 1.0, 0.0]
        };
        vertices.extend([a, b, c].map(|position| MeshVertex { position, normal }));
    }
    let indices = (0..vertices.len() as u32).collect();
    Geometry { vertices, indices }
}

/// The single-mesh node substituted for an asset that cannot be shown.
pub fn fallback_node() -> Box<dyn SceneNode> {
    Box::new(ModelNode::new(
        FALLBACK_NAME,
        MeshData::new(octahedron([0.5, 0.5, 0.5]), EmissiveMaterial::default()),
    ))
}
