//! glTF / GLB parsing into a scene template.
//!
//! Only what an emissive scene needs is read: node hierarchy, names,
//! transforms and triangle geometry (positions, normals, indices). Materials,
//! textures and animations in the file are ignored; the scene builder assigns
//! its own material to every mesh.

use anyhow::{Context, bail};
use base64::Engine;
use cgmath::Quaternion;
use log::warn;

use crate::{
    data_structures::{
        instance::Instance,
        scene_graph::{ContainerNode, EmissiveMaterial, Geometry, MeshData, ModelNode, SceneNode},
    },
    resources::fetch::AssetFetcher,
};

/// Parses `bytes` (a `.glb` or a `.gltf` document) into a node tree.
///
/// External buffers are fetched relative to `url` through `fetcher`.
pub async fn load_scene(
    bytes: &[u8],
    url: &str,
    fetcher: &dyn AssetFetcher,
) -> anyhow::Result<Box<dyn SceneNode>> {
    let gltf = gltf::Gltf::from_slice(bytes).context("not a glTF asset")?;
    let buffers = load_buffers(&gltf, url, fetcher).await?;
    build_scene(&gltf.document, &buffers)
}

async fn load_buffers(
    gltf: &gltf::Gltf,
    url: &str,
    fetcher: &dyn AssetFetcher,
) -> anyhow::Result<Vec<Vec<u8>>> {
    let mut buffer_data = Vec::new();
    for buffer in gltf.buffers() {
        let data = match buffer.source() {
            gltf::buffer::Source::Bin => match gltf.blob.as_deref() {
                Some(blob) => blob.to_vec(),
                None => bail!("missing GLB binary chunk"),
            },
            gltf::buffer::Source::Uri(uri) => match decode_data_uri(uri) {
                Some(decoded) => decoded?,
                None => fetcher
                    .fetch(&sibling_url(url, uri))
                    .await
                    .with_context(|| format!("failed to load buffer {uri}"))?,
            },
        };
        if data.len() < buffer.length() {
            bail!(
                "buffer {} holds {} bytes, {} declared",
                buffer.index(),
                data.len(),
                buffer.length()
            );
        }
        buffer_data.push(data);
    }
    Ok(buffer_data)
}

/// `Some` for `data:` URIs. Only base64 payloads are supported.
fn decode_data_uri(uri: &str) -> Option<anyhow::Result<Vec<u8>>> {
    let rest = uri.strip_prefix("data:")?;
    let decoded = match rest.split_once(";base64,") {
        Some((_, payload)) => base64::engine::general_purpose::STANDARD
            .decode(payload)
            .context("invalid base64 buffer"),
        None => Err(anyhow::anyhow!("unsupported data URI encoding")),
    };
    Some(decoded)
}

fn sibling_url(url: &str, relative: &str) -> String {
    match url.rfind('/') {
        Some(idx) => format!("{}{}", &url[..=idx], relative),
        None => relative.to_string(),
    }
}

fn build_scene(document: &gltf::Document, buffers: &[Vec<u8>]) -> anyhow::Result<Box<dyn SceneNode>> {
    let scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .context("asset contains no scene")?;

    let mut models = scene
        .nodes()
        .map(|node| to_scene_node(node, buffers))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let root = if models.len() == 1 {
        models.remove(0)
    } else {
        let mut root = ContainerNode::new(scene.name().unwrap_or("scene"));
        for model in models {
            root.add_child(model);
        }
        Box::new(root)
    };
    Ok(root)
}

fn to_scene_node(node: gltf::Node, buffers: &[Vec<u8>]) -> anyhow::Result<Box<dyn SceneNode>> {
    let name = node
        .name()
        .or_else(|| node.mesh().and_then(|mesh| mesh.name()))
        .map(str::to_string)
        .unwrap_or_else(|| format!("node_{}", node.index()));

    let mut scene_node: Box<dyn SceneNode> = match node.mesh() {
        Some(mesh) => {
            let geometry = read_geometry(&mesh, buffers)?;
            Box::new(ModelNode::new(
                name,
                MeshData::new(geometry, EmissiveMaterial::default()),
            ))
        }
        None => Box::new(ContainerNode::new(name)),
    };

    let (position, rotation, scale) = node.transform().decomposed();
    scene_node.set_local_transform(Instance {
        position: position.into(),
        rotation: Quaternion::new(rotation[3], rotation[0], rotation[1], rotation[2]),
        scale: scale.into(),
    });
    for child in node.children() {
        scene_node.add_child(to_scene_node(child, buffers)?);
    }
    Ok(scene_node)
}

/// Merges every triangle primitive of `mesh` into one geometry.
fn read_geometry(mesh: &gltf::Mesh, buffers: &[Vec<u8>]) -> anyhow::Result<Geometry> {
    let mut positions: Vec<[f32; 3]> = Vec::new();
    let mut normals: Vec<[f32; 3]> = Vec::new();
    let mut indices: Vec<u32> = Vec::new();
    let mut has_normals = true;

    for primitive in mesh.primitives() {
        if primitive.mode() != gltf::mesh::Mode::Triangles {
            warn!(
                "Skipping {:?} primitive of mesh {:?}",
                primitive.mode(),
                mesh.name()
            );
            continue;
        }
        let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(Vec::as_slice));
        let Some(prim_positions) = reader.read_positions() else {
            warn!("Primitive of mesh {:?} has no positions", mesh.name());
            continue;
        };
        let base = positions.len() as u32;
        let prim_positions: Vec<[f32; 3]> = prim_positions.collect();
        let count = prim_positions.len() as u32;

        match reader.read_normals() {
            Some(prim_normals) => normals.extend(prim_normals),
            None => has_normals = false,
        }
        match reader.read_indices() {
            Some(prim_indices) => indices.extend(prim_indices.into_u32().map(|i| i + base)),
            None => indices.extend(base..base + count),
        }
        positions.extend(prim_positions);
    }

    if positions.is_empty() {
        bail!("mesh {:?} has no triangle geometry", mesh.name());
    }
    let normals = (has_normals && normals.len() == positions.len()).then_some(normals);
    Ok(Geometry::from_positions(positions, normals, Some(indices)))
}
