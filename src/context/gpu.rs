//! wgpu-backed graphics context.
//!
//! Buffers are the only resource kind the renderer allocates through the
//! context; they are handed out as plain numeric IDs (recycled lowest-first)
//! so the handle layer above sees the same contract as any GL-style driver.
//! Draws are queued between `begin_frame` and `present` and encoded in one
//! render pass when the frame is presented.

use std::{collections::HashMap, sync::Arc};

use anyhow::{Context as _, bail};
use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::{
    context::{
        BufferUsage, DrawCall, EntryPoint, FrameUniforms, IdAllocator, RawContext, ResourceKind,
    },
    pipelines::emissive::{DEPTH_FORMAT, EmissivePipeline},
};

struct DepthTexture {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl DepthTexture {
    fn new(device: &wgpu::Device, size: [u32; 2]) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("depth_texture"),
            size: wgpu::Extent3d {
                width: size[0].max(1),
                height: size[1].max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[DEPTH_FORMAT],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            _texture: texture,
            view,
        }
    }
}

struct PendingFrame {
    uniforms: FrameUniforms,
    draws: Vec<DrawCall>,
}

pub struct GpuContext {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    is_surface_configured: bool,
    depth: DepthTexture,
    pipeline: EmissivePipeline,
    ids: IdAllocator,
    /// `None` until data is uploaded.
    buffers: HashMap<u32, Option<wgpu::Buffer>>,
    pending: Option<PendingFrame>,
}

impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext")
            .field("config", &self.config)
            .field("buffers", &self.buffers.len())
            .finish_non_exhaustive()
    }
}

impl GpuContext {
    pub async fn new(window: Arc<Window>) -> anyhow::Result<Self> {
        let size = window.inner_size();

        log::info!("WGPU setup");
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            #[cfg(not(target_arch = "wasm32"))]
            backends: wgpu::Backends::PRIMARY,
            #[cfg(target_arch = "wasm32")]
            backends: wgpu::Backends::GL,
            ..Default::default()
        });

        let surface = instance.create_surface(window.clone())?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("no graphics adapter for this surface")?;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: None,
                required_features: wgpu::Features::empty(),
                // WebGL doesn't support all of wgpu's features.
                required_limits: if cfg!(target_arch = "wasm32") {
                    wgpu::Limits::downlevel_webgl2_defaults()
                } else {
                    wgpu::Limits::default()
                },
                memory_hints: Default::default(),
                trace: wgpu::Trace::Off,
            })
            .await?;

        let surface_caps = surface.get_capabilities(&adapter);
        let Some(&fallback_format) = surface_caps.formats.first() else {
            bail!("surface reports no supported formats");
        };
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .unwrap_or(fallback_format);
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width,
            height: size.height,
            present_mode: surface_caps
                .present_modes
                .first()
                .copied()
                .unwrap_or(wgpu::PresentMode::Fifo),
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        let depth = DepthTexture::new(&device, [config.width, config.height]);
        let pipeline = EmissivePipeline::new(&device, config.format);

        let mut ctx = Self {
            window,
            surface,
            device,
            queue,
            config,
            is_surface_configured: false,
            depth,
            pipeline,
            ids: IdAllocator::default(),
            buffers: HashMap::new(),
            pending: None,
        };
        ctx.resize(size.width, size.height);
        Ok(ctx)
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }

    pub fn size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    /// Reconfigures surface and depth buffer. Zero sizes (minimized windows) are ignored.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.config.width = width;
            self.config.height = height;
            self.surface.configure(&self.device, &self.config);
            self.depth = DepthTexture::new(&self.device, [width, height]);
            self.is_surface_configured = true;
        }
    }

    fn buffer(&self, id: u32) -> anyhow::Result<&wgpu::Buffer> {
        match self.buffers.get(&id) {
            Some(Some(buffer)) => Ok(buffer),
            Some(None) => bail!("buffer #{id} has no storage"),
            None => bail!("buffer #{id} does not exist"),
        }
    }

    fn encode(&mut self, frame: PendingFrame) -> anyhow::Result<()> {
        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                log::warn!("Surface lost, reconfiguring");
                let size = self.window.inner_size();
                self.resize(size.width, size.height);
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        self.pipeline
            .prepare(&self.device, &self.queue, &frame.uniforms, &frame.draws);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });
        {
            let [r, g, b, a] = frame.uniforms.clear_colour;
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            self.pipeline.bind(&mut render_pass);
            for (slot, call) in frame.draws.iter().enumerate() {
                let vertex = self.buffer(call.vertex)?;
                let index = self.buffer(call.index)?;
                self.pipeline
                    .draw(&mut render_pass, slot, vertex, index, call.index_count);
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        self.window.pre_present_notify();
        output.present();
        Ok(())
    }
}

impl RawContext for GpuContext {
    fn entry_points(&self) -> Vec<EntryPoint> {
        vec![EntryPoint::paired(ResourceKind::Buffer)]
    }

    fn create(&mut self, kind: ResourceKind) -> anyhow::Result<u32> {
        if kind != ResourceKind::Buffer {
            bail!("GPU context cannot create {kind:?}");
        }
        let id = self.ids.allocate()?;
        self.buffers.insert(id, None);
        Ok(id)
    }

    fn delete(&mut self, kind: ResourceKind, id: u32) {
        if kind != ResourceKind::Buffer || !self.ids.release(id) {
            log::warn!("GPU context: {kind:?} #{id} is not allocated");
            return;
        }
        if let Some(Some(buffer)) = self.buffers.remove(&id) {
            buffer.destroy();
        }
    }

    fn buffer_data(&mut self, id: u32, usage: BufferUsage, data: &[u8]) -> anyhow::Result<()> {
        if !self.ids.is_allocated(id) {
            bail!("buffer #{id} does not exist");
        }
        let (label, usage) = match usage {
            BufferUsage::Vertex => ("Vertex Buffer", wgpu::BufferUsages::VERTEX),
            BufferUsage::Index => ("Index Buffer", wgpu::BufferUsages::INDEX),
            BufferUsage::Uniform => ("Uniform Buffer", wgpu::BufferUsages::UNIFORM),
        };
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: data,
                usage: usage | wgpu::BufferUsages::COPY_DST,
            });
        if let Some(Some(old)) = self.buffers.insert(id, Some(buffer)) {
            old.destroy();
        }
        Ok(())
    }

    fn begin_frame(&mut self, frame: &FrameUniforms) -> anyhow::Result<()> {
        self.pending = Some(PendingFrame {
            uniforms: *frame,
            draws: Vec::new(),
        });
        Ok(())
    }

    fn draw_indexed(&mut self, call: &DrawCall) -> anyhow::Result<()> {
        self.buffer(call.vertex)?;
        self.buffer(call.index)?;
        self.pending
            .as_mut()
            .context("draw_indexed called outside of a frame")?
            .draws
            .push(*call);
        Ok(())
    }

    fn present(&mut self) -> anyhow::Result<()> {
        let frame = self
            .pending
            .take()
            .context("present called without begin_frame")?;
        if !self.is_surface_configured {
            return Ok(());
        }
        self.encode(frame)
    }
}
