#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use flow_room::resources::{LoadFuture, fetch::AssetFetcher};

const GLB_MAGIC: u32 = 0x4654_6C67;
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

/// A GLB with a "room" root holding one 2x2 quad named "desk" in the XY plane,
/// centred on the origin and facing +Z.
pub fn room_glb() -> Vec<u8> {
    let positions: [[f32; 3]; 4] = [
        [-1.0, -1.0, 0.0],
        [1.0, -1.0, 0.0],
        [1.0, 1.0, 0.0],
        [-1.0, 1.0, 0.0],
    ];
    let indices: [u32; 6] = [0, 1, 2, 0, 2, 3];

    let mut bin = Vec::new();
    for p in positions.iter().flatten() {
        bin.extend_from_slice(&p.to_le_bytes());
    }
    for i in indices {
        bin.extend_from_slice(&i.to_le_bytes());
    }

    let json = format!(
        r#"{{
  "asset": {{ "version": "2.0" }},
  "scene": 0,
  "scenes": [{{ "nodes": [0] }}],
  "nodes": [
    {{ "name": "room", "children": [1] }},
    {{ "name": "desk", "mesh": 0 }}
  ],
  "meshes": [{{ "name": "desk_mesh", "primitives": [{{ "attributes": {{ "POSITION": 0 }}, "indices": 1 }}] }}],
  "buffers": [{{ "byteLength": {total} }}],
  "bufferViews": [
    {{ "buffer": 0, "byteOffset": 0, "byteLength": 48, "target": 34962 }},
    {{ "buffer": 0, "byteOffset": 48, "byteLength": 24, "target": 34963 }}
  ],
  "accessors": [
    {{ "bufferView": 0, "componentType": 5126, "count": 4, "type": "VEC3", "min": [-1.0, -1.0, 0.0], "max": [1.0, 1.0, 0.0] }},
    {{ "bufferView": 1, "componentType": 5125, "count": 6, "type": "SCALAR" }}
  ]
}}"#,
        total = bin.len()
    );

    glb(json.into_bytes(), bin)
}

fn glb(mut json: Vec<u8>, mut bin: Vec<u8>) -> Vec<u8> {
    while json.len() % 4 != 0 {
        json.push(b' ');
    }
    while bin.len() % 4 != 0 {
        bin.push(0);
    }
    let total = 12 + 8 + json.len() + 8 + bin.len();

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&GLB_MAGIC.to_le_bytes());
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&(json.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    out.extend_from_slice(&json);
    out.extend_from_slice(&(bin.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_BIN.to_le_bytes());
    out.extend_from_slice(&bin);
    out
}

/// Serves fixed bytes (or fails) after an optional delay and counts requests.
pub struct CountingFetcher {
    bytes: Option<Vec<u8>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl CountingFetcher {
    pub fn serving(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Some(bytes),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            bytes: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl AssetFetcher for CountingFetcher {
    fn fetch(&self, url: &str) -> LoadFuture<'static, anyhow::Result<Vec<u8>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let bytes = self.bytes.clone();
        let delay = self.delay;
        let url = url.to_string();
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            bytes.ok_or_else(|| anyhow::anyhow!("{url} is unreachable"))
        })
    }
}
