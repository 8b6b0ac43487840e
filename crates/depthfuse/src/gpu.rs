//! wgpu buffers mirroring the particle ring and the per-frame uniforms.
//!
//! The storage buffer holds `capacity` particles; at the default capacity it
//! exceeds wgpu's default `max_storage_buffer_binding_size`, so the device must
//! be requested with raised limits.

use crate::engine::FusionEngine;
use crate::error::Result;
use crate::particle::Particle;
use crate::ring::DirtyRanges;
use crate::uniforms::{PointCloudUniformsStd140, UniformSlots};

/// GPU-side copy of the point cloud plus triple-buffered uniforms.
pub struct GpuPointCloud {
    pub particles: wgpu::Buffer,
    pub uniforms: wgpu::Buffer,
    pub layout: wgpu::BindGroupLayout,
    pub bind: wgpu::BindGroup,
    slots: UniformSlots,
    /// Ring write count at the last upload.
    uploaded_writes: u64,
}

impl GpuPointCloud {
    pub fn new(device: &wgpu::Device, capacity: usize) -> Self {
        let particles = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Particle Ring"),
            size: (capacity * std::mem::size_of::<Particle>()) as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::VERTEX
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Point Cloud Uniform Slots"),
            size: UniformSlots::BUFFER_SIZE as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let uniform_size = wgpu::BufferSize::new(
            std::mem::size_of::<PointCloudUniformsStd140>() as u64,
        );

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Point Cloud Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: uniform_size,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<Particle>() as u64,
                        ),
                    },
                    count: None,
                },
            ],
        });

        let bind = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Point Cloud BindGroup"),
            layout: &layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &uniforms,
                        offset: 0,
                        size: uniform_size,
                    }),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: particles.as_entire_binding(),
                },
            ],
        });

        Self {
            particles,
            uniforms,
            layout,
            bind,
            slots: UniformSlots::new(),
            uploaded_writes: 0,
        }
    }

    /// Copies particles written since the last upload and this frame's
    /// uniforms. Returns the dynamic offset to bind the uniform slot with.
    pub fn upload(&mut self, queue: &wgpu::Queue, engine: &FusionEngine) -> Result<u32> {
        let uniforms = engine.export()?;
        let snapshot = engine.snapshot();

        let dirty = DirtyRanges::between(
            self.uploaded_writes,
            snapshot.total_writes(),
            snapshot.capacity(),
        );
        for range in dirty.iter() {
            let offset = (range.start * std::mem::size_of::<Particle>()) as u64;
            let bytes: &[u8] = bytemuck::cast_slice(&snapshot.particles()[range]);
            queue.write_buffer(&self.particles, offset, bytes);
        }
        self.uploaded_writes = snapshot.total_writes();

        let offset = self.slots.advance();
        queue.write_buffer(
            &self.uniforms,
            offset as u64,
            bytemuck::bytes_of(&uniforms.to_std140()),
        );

        tracing::trace!(
            dirty = dirty.len(),
            slot_offset = offset,
            "uploaded point cloud"
        );

        Ok(offset as u32)
    }
}
