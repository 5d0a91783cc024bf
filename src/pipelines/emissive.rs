//! The emissive mesh pipeline.
//!
//! Bind group 0 holds the camera, bind group 1 a per-draw uniform addressed
//! with a dynamic offset, so one buffer serves every draw of a frame.

use std::num::NonZeroU64;

use wgpu::util::DeviceExt;

use crate::{
    camera::CameraUniform,
    context::{DrawCall, FrameUniforms},
    data_structures::scene_graph::MeshVertex,
    pipelines::mk_render_pipeline,
};

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawUniform {
    model: [[f32; 4]; 4],
    base_color: [f32; 4],
    emissive: [f32; 4],
}

impl From<&DrawCall> for DrawUniform {
    fn from(call: &DrawCall) -> Self {
        let [r, g, b] = call.emissive;
        Self {
            model: call.model,
            base_color: call.base_color,
            emissive: [r, g, b, call.emissive_intensity],
        }
    }
}

impl MeshVertex {
    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        use std::mem;
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<MeshVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x3,
                },
            ],
        }
    }
}

pub struct EmissivePipeline {
    pipeline: wgpu::RenderPipeline,
    camera_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
    draw_layout: wgpu::BindGroupLayout,
    draw_buffer: wgpu::Buffer,
    draw_bind_group: wgpu::BindGroup,
    /// Number of draws `draw_buffer` has room for.
    draw_capacity: usize,
    stride: u64,
}

impl EmissivePipeline {
    pub fn new(device: &wgpu::Device, color_format: wgpu::TextureFormat) -> Self {
        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Camera Buffer"),
            contents: bytemuck::cast_slice(&[CameraUniform::new()]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let camera_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
            label: Some("camera_bind_group_layout"),
        });
        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &camera_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
            label: Some("camera_bind_group"),
        });

        let draw_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(size_of::<DrawUniform>() as u64),
                },
                count: None,
            }],
            label: Some("draw_bind_group_layout"),
        });

        let alignment = u64::from(device.limits().min_uniform_buffer_offset_alignment);
        let stride = (size_of::<DrawUniform>() as u64).div_ceil(alignment) * alignment;
        let draw_capacity = 16;
        let (draw_buffer, draw_bind_group) =
            Self::mk_draw_buffer(device, &draw_layout, stride, draw_capacity);

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Emissive Pipeline Layout"),
            bind_group_layouts: &[&camera_layout, &draw_layout],
            push_constant_ranges: &[],
        });
        let shader = wgpu::ShaderModuleDescriptor {
            label: Some("Emissive Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("emissive.wgsl").into()),
        };
        let pipeline = mk_render_pipeline(
            device,
            &layout,
            color_format,
            Some(wgpu::BlendState {
                alpha: wgpu::BlendComponent::REPLACE,
                color: wgpu::BlendComponent::REPLACE,
            }),
            Some(DEPTH_FORMAT),
            &[MeshVertex::desc()],
            shader,
        );

        Self {
            pipeline,
            camera_buffer,
            camera_bind_group,
            draw_layout,
            draw_buffer,
            draw_bind_group,
            draw_capacity,
            stride,
        }
    }

    fn mk_draw_buffer(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        stride: u64,
        capacity: usize,
    ) -> (wgpu::Buffer, wgpu::BindGroup) {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Draw Uniform Buffer"),
            size: stride * capacity as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(size_of::<DrawUniform>() as u64),
                }),
            }],
            label: Some("draw_bind_group"),
        });
        (buffer, bind_group)
    }

    /// Writes the camera and all per-draw uniforms of a frame, growing the
    /// draw buffer when needed.
    pub fn prepare(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        frame: &FrameUniforms,
        draws: &[DrawCall],
    ) {
        let [x, y, z] = frame.eye;
        let camera = CameraUniform {
            view_proj: frame.view_proj,
            eye: [x, y, z, 1.0],
        };
        queue.write_buffer(&self.camera_buffer, 0, bytemuck::cast_slice(&[camera]));

        if draws.len() > self.draw_capacity {
            self.draw_capacity = draws.len().next_power_of_two();
            log::debug!("Growing draw uniform buffer to {} draws", self.draw_capacity);
            (self.draw_buffer, self.draw_bind_group) =
                Self::mk_draw_buffer(device, &self.draw_layout, self.stride, self.draw_capacity);
        }

        let stride = self.stride as usize;
        let mut bytes = vec![0u8; stride * draws.len()];
        for (chunk, call) in bytes.chunks_exact_mut(stride).zip(draws) {
            let uniform = DrawUniform::from(call);
            chunk[..size_of::<DrawUniform>()].copy_from_slice(bytemuck::bytes_of(&uniform));
        }
        if !bytes.is_empty() {
            queue.write_buffer(&self.draw_buffer, 0, &bytes);
        }
    }

    pub fn bind(&self, render_pass: &mut wgpu::RenderPass<'_>) {
        render_pass.set_pipeline(&self.pipeline);
        render_pass.set_bind_group(0, &self.camera_bind_group, &[]);
    }

    /// Draws the `slot`-th call passed to [`prepare`](Self::prepare).
    pub fn draw(
        &self,
        render_pass: &mut wgpu::RenderPass<'_>,
        slot: usize,
        vertex: &wgpu::Buffer,
        index: &wgpu::Buffer,
        index_count: u32,
    ) {
        let offset = (slot as u64 * self.stride) as wgpu::DynamicOffset;
        render_pass.set_bind_group(1, &self.draw_bind_group, &[offset]);
        render_pass.set_vertex_buffer(0, vertex.slice(..));
        render_pass.set_index_buffer(index.slice(..), wgpu::IndexFormat::Uint32);
        render_pass.draw_indexed(0..index_count, 0, 0..1);
    }
}
