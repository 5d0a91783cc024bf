//! flow-room
//!
//! An embeddable renderer for a glowing star or a furnished room, built for
//! native and WASM hosts. A host mounts a view on a graphics context, hands it
//! an asset URL and a colour, feeds it touch input and receives "mesh picked"
//! and "focus complete" events back.
//!
//! High-level modules
//! - `context`: the low-level graphics context trait, a wgpu backend and a headless one
//! - `handles`: identity-stable wrappers around the context's recycled numeric IDs
//! - `resources`: fetch-once asset cache, glTF loading and the fallback primitive
//! - `builder`: turns an asset clone into an emissive, interactable scene
//! - `camera` / `rig`: poses, projection and the camera flight state machine
//! - `pick`: tap-vs-drag detection and ray picking
//! - `render`: the per-frame loop of one mounted view
//! - `flow`: winit driver running a view in a window
//!

pub mod builder;
pub mod camera;
pub mod config;
pub mod context;
pub mod data_structures;
pub mod flow;
pub mod handles;
pub mod pick;
pub mod pipelines;
pub mod render;
pub mod resources;
pub mod rig;

// Re-exports commonly used types for convenience in downstream code.
pub use cgmath::*;
pub use instant::{Duration, Instant};
