//! wgpu render context.

use std::fmt;
use std::num::NonZeroU64;

use transkit_codec::{Frame, InputSurface};

use super::filter::{FilterUniforms, SHADER};
use super::{FrameFilter, Mat4, RenderContext, nothing_drawn};
use crate::VideoError;

const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

fn gpu_err(what: &str, e: impl fmt::Display) -> VideoError {
    VideoError::Gpu(format!("{what}: {e}"))
}

/// Instance and adapter. The first stage of a [`GpuContext`].
pub struct GpuDisplay {
    adapter: wgpu::Adapter,
    _instance: wgpu::Instance,
}

impl GpuDisplay {
    /// Find a GPU adapter.
    ///
    /// # Errors
    ///
    /// Returns `VideoError::Gpu` if no adapter is available.
    pub fn acquire() -> Result<Self, VideoError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(
            instance.request_adapter(&wgpu::RequestAdapterOptions::default()),
        )
        .map_err(|e| gpu_err("no adapter", e))?;
        log::debug!("using GPU adapter {}", adapter.get_info().name);
        Ok(Self {
            adapter,
            _instance: instance,
        })
    }

    /// Adapter name.
    #[must_use]
    pub fn adapter_name(&self) -> String {
        self.adapter.get_info().name
    }
}

impl fmt::Debug for GpuDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuDisplay")
            .field("adapter", &self.adapter_name())
            .finish_non_exhaustive()
    }
}

/// Device, queue and the compiled filter program.
struct FilterProgram {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    uniforms: wgpu::Buffer,
}

impl FilterProgram {
    fn new(display: &GpuDisplay) -> Result<Self, VideoError> {
        let (device, queue): (wgpu::Device, wgpu::Queue) = pollster::block_on(
            display.adapter.request_device(&wgpu::DeviceDescriptor {
                label: Some("transkit_device"),
                ..Default::default()
            }),
        )
        .map_err(|e| gpu_err("device", e))?;

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("frame_sampler"),
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("filter_uniforms"),
            size: std::mem::size_of::<FilterUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("frame_bind_group_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: NonZeroU64::new(
                            std::mem::size_of::<FilterUniforms>() as u64
                        ),
                    },
                    count: None,
                },
            ],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("frame_filter"),
            source: wgpu::ShaderSource::Wgsl(SHADER.into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("frame_filter_layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("frame_filter_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TEXTURE_FORMAT,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        Ok(Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            sampler,
            uniforms,
        })
    }

    fn texture(&self, label: &str, width: u32, height: u32, usage: wgpu::TextureUsages) -> wgpu::Texture {
        self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage,
            view_formats: &[],
        })
    }
}

/// Texture the decoded frame is uploaded into. Recreated when the frame size
/// changes.
struct SourceTexture {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    width: u32,
    height: u32,
}

impl SourceTexture {
    fn new(program: &FilterProgram, width: u32, height: u32) -> Self {
        let texture = program.texture(
            "frame_texture",
            width,
            height,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = program.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("frame_bind_group"),
            layout: &program.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&program.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: program.uniforms.as_entire_binding(),
                },
            ],
        });
        Self {
            texture,
            bind_group,
            width,
            height,
        }
    }
}

/// Render target plus the readback buffer feeding the encoder surface.
struct TargetSurface {
    texture: wgpu::Texture,
    readback: wgpu::Buffer,
    width: u32,
    height: u32,
    padded_row: u32,
    output: InputSurface,
}

impl TargetSurface {
    fn new(program: &FilterProgram, output: InputSurface, width: u32, height: u32) -> Self {
        let texture = program.texture(
            "target_texture",
            width,
            height,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        );
        let padded_row = (width * 4).next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let readback = program.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("target_readback"),
            size: u64::from(padded_row) * u64::from(height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            texture,
            readback,
            width,
            height,
            padded_row,
            output,
        }
    }

    fn read_pixels(&self, device: &wgpu::Device) -> Result<Vec<u8>, VideoError> {
        let slice = self.readback.slice(..);
        let (tx, rx) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| gpu_err("poll", e))?;
        rx.recv()
            .map_err(|e| gpu_err("readback", e))?
            .map_err(|e| gpu_err("readback", e))?;

        let row = self.width as usize * 4;
        let mut pixels = Vec::with_capacity(row * self.height as usize);
        {
            let mapped = slice.get_mapped_range();
            for line in mapped.chunks_exact(self.padded_row as usize) {
                pixels.extend_from_slice(&line[..row]);
            }
        }
        self.readback.unmap();
        Ok(pixels)
    }
}

/// wgpu render context bound to an encoder input surface.
///
/// Acquired in three stages (display, filter program, target surface) and
/// released in reverse, including when a later stage fails to initialize.
pub struct GpuContext {
    // Field order is drop order.
    target: TargetSurface,
    source: Option<SourceTexture>,
    program: FilterProgram,
    display: GpuDisplay,
    filter: FrameFilter,
    timestamp_ns: i64,
    drawn: bool,
}

impl GpuContext {
    /// Create a context rendering `width` x `height` frames into `output`.
    ///
    /// # Errors
    ///
    /// Returns `VideoError::Gpu` if no adapter or device is available.
    pub fn new(
        output: InputSurface,
        width: u32,
        height: u32,
        filter: FrameFilter,
    ) -> Result<Self, VideoError> {
        Self::with_display(GpuDisplay::acquire()?, output, width, height, filter)
    }

    /// Create a context on an already acquired display.
    ///
    /// # Errors
    ///
    /// Returns `VideoError::Gpu` if the device cannot be created.
    pub fn with_display(
        display: GpuDisplay,
        output: InputSurface,
        width: u32,
        height: u32,
        filter: FrameFilter,
    ) -> Result<Self, VideoError> {
        if width == 0 || height == 0 {
            return Err(VideoError::Gpu(format!("invalid surface size {width}x{height}")));
        }
        let program = FilterProgram::new(&display)?;
        let target = TargetSurface::new(&program, output, width, height);
        log::debug!("GPU render surface {width}x{height}");
        Ok(Self {
            target,
            source: None,
            program,
            display,
            filter,
            timestamp_ns: 0,
            drawn: false,
        })
    }

    /// The filter this context renders with.
    #[must_use]
    pub const fn filter(&self) -> &FrameFilter {
        &self.filter
    }

    fn upload(&mut self, frame: &Frame) {
        let stale = self
            .source
            .as_ref()
            .is_none_or(|s| s.width != frame.width || s.height != frame.height);
        if stale {
            log::debug!("frame texture resized to {}x{}", frame.width, frame.height);
            self.source = Some(SourceTexture::new(&self.program, frame.width, frame.height));
        }
        let Some(source) = &self.source else {
            return;
        };

        let rgba = frame.to_rgba();
        self.program.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &source.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(frame.width * 4),
                rows_per_image: Some(frame.height),
            },
            wgpu::Extent3d {
                width: frame.width,
                height: frame.height,
                depth_or_array_layers: 1,
            },
        );
    }
}

impl fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuContext")
            .field("display", &self.display)
            .field("width", &self.target.width)
            .field("height", &self.target.height)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl RenderContext for GpuContext {
    fn size(&self) -> (u32, u32) {
        (self.target.width, self.target.height)
    }

    fn draw(&mut self, frame: &Frame, tex_matrix: &Mat4) -> Result<(), VideoError> {
        if frame.width == 0 || frame.height == 0 {
            return Err(VideoError::Gpu("empty frame".into()));
        }
        self.upload(frame);
        let Some(source) = &self.source else {
            return Err(VideoError::Gpu("frame texture missing".into()));
        };

        let uniforms = FilterUniforms::new(&self.filter, tex_matrix);
        self.program
            .queue
            .write_buffer(&self.program.uniforms, 0, bytemuck::bytes_of(&uniforms));

        let view = self
            .target
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .program
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("frame_filter_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            pass.set_pipeline(&self.program.pipeline);
            pass.set_bind_group(0, &source.bind_group, &[]);
            pass.draw(0..6, 0..1);
        }

        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.target.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.target.padded_row),
                    rows_per_image: Some(self.target.height),
                },
            },
            wgpu::Extent3d {
                width: self.target.width,
                height: self.target.height,
                depth_or_array_layers: 1,
            },
        );

        self.program.queue.submit(std::iter::once(encoder.finish()));
        self.drawn = true;
        Ok(())
    }

    fn set_presentation_time(&mut self, timestamp_ns: i64) {
        self.timestamp_ns = timestamp_ns;
    }

    fn swap_buffers(&mut self) -> Result<(), VideoError> {
        if !self.drawn {
            return Err(nothing_drawn());
        }
        self.drawn = false;
        let pixels = self.target.read_pixels(&self.program.device)?;
        let frame = Frame::rgba(pixels, self.target.width, self.target.height, self.timestamp_ns);
        self.target.output.submit(frame)?;
        Ok(())
    }
}
