//! Scene data: transforms and the scene graph.
//!
//! - `instance` holds the decomposed local/world transforms
//! - `scene_graph` contains the node tree, meshes, materials and interaction tags

pub mod instance;
pub mod scene_graph;
