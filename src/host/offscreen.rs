//! Offscreen host: feeds decoded frames to a filter and reads the result back.
//!
//! The host owns a two-node graph. Node 0 is the frame source; node 1 is the
//! filter applied to it. Each call to [`OffscreenHost::process`] uploads one
//! frame, lets the filter render into an offscreen target while the graphics
//! context is entered, and copies the target back to system memory.

use crate::filter::{FilterHost, FilterRuntime, NodeId, ParamBinding, ParamValue, RenderMode};
use crate::frame::{PixelFormat, VideoFrame};
use crate::shader::reflect::{EffectLayout, ParamKind, UniformType};
use crate::shader::{enter_graphics, ColorFormat, GpuContext, WgpuProgram, OUTPUT_FORMAT};
use anyhow::{anyhow, Result};
use tracing::{debug, warn};

/// Texture parameter the host fills with the filter input when the filter leaves it unbound.
const IMAGE_PARAM: &str = "image";

const SOURCE_NODE: NodeId = NodeId(0);
const FILTER_NODE: NodeId = NodeId(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Pending,
    Drawn,
    Skipped,
}

/// GPU resources sized for the current frame.
struct FrameTargets {
    width: u32,
    height: u32,
    input: wgpu::Texture,
    output: wgpu::Texture,
    readback: wgpu::Buffer,
    padded_bytes_per_row: u32,
}

pub struct OffscreenHost {
    gpu: GpuContext,
    targets: Option<FrameTargets>,
    /// 1x1 transparent texture bound in place of unset texture parameters.
    fallback: wgpu::Texture,
    outcome: Outcome,
}

impl OffscreenHost {
    pub fn new(gpu: GpuContext) -> Self {
        let fallback = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Fallback Texture"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: ColorFormat::Rgba8.to_wgpu(),
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        gpu.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &fallback,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[0, 0, 0, 0],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );

        Self {
            gpu,
            targets: None,
            fallback,
            outcome: Outcome::Pending,
        }
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    /// Node filters should be attached to.
    pub fn filter_node(&self) -> NodeId {
        FILTER_NODE
    }

    /// Runs `frame` through `runtime`. Frames the filter does not draw pass through unchanged.
    pub fn process(
        &mut self,
        runtime: &mut dyn FilterRuntime<Self>,
        frame: &VideoFrame,
    ) -> Result<VideoFrame> {
        let rgba = frame.to_rgba();
        self.ensure_targets(rgba.width, rgba.height)?;
        self.upload(&rgba)?;

        self.outcome = Outcome::Pending;
        {
            let _gfx = enter_graphics();
            runtime.render(self);
        }

        match self.outcome {
            Outcome::Drawn => self.read_back(),
            Outcome::Pending | Outcome::Skipped => {
                debug!("Filter did not draw, passing frame through");
                Ok(rgba)
            }
        }
    }

    fn ensure_targets(&mut self, width: u32, height: u32) -> Result<()> {
        if matches!(&self.targets, Some(t) if t.width == width && t.height == height) {
            return Ok(());
        }

        let max = self.gpu.max_texture_dimension();
        if width == 0 || height == 0 || width > max || height > max {
            return Err(anyhow!(
                "Unsupported frame size {}x{} (limit {})",
                width,
                height,
                max
            ));
        }

        debug!("Allocating {}x{} frame targets", width, height);
        let device = &self.gpu.device;
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };

        let input = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Filter Input"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: ColorFormat::Rgba8.to_wgpu(),
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        let output = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Filter Output"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: OUTPUT_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        let padded_bytes_per_row = padded_bytes_per_row(width);
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: padded_bytes_per_row as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        self.targets = Some(FrameTargets {
            width,
            height,
            input,
            output,
            readback,
            padded_bytes_per_row,
        });
        Ok(())
    }

    fn upload(&self, frame: &VideoFrame) -> Result<()> {
        let targets = self
            .targets
            .as_ref()
            .ok_or_else(|| anyhow!("Frame targets not allocated"))?;
        let expected = frame.width as usize * frame.height as usize * 4;
        if frame.data.len() != expected {
            return Err(anyhow!(
                "Frame holds {} bytes, expected {}",
                frame.data.len(),
                expected
            ));
        }

        self.gpu.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &targets.input,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &frame.data,
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
        Ok(())
    }

    fn draw(
        &self,
        targets: &FrameTargets,
        program: &WgpuProgram,
        pipeline: &wgpu::RenderPipeline,
        offset: (u32, u32),
        bindings: &[ParamBinding<'_, wgpu::Texture>],
    ) {
        let device = &self.gpu.device;
        let layout = program.layout();

        let uniform = program.uniform_buffer().zip(layout.uniform);
        if let Some((buffer, block)) = uniform {
            let data = pack_uniforms(layout, block.size, bindings);
            self.gpu.queue.write_buffer(buffer, 0, &data);
        }

        let views: Vec<(u32, wgpu::TextureView)> = layout
            .params
            .iter()
            .enumerate()
            .filter_map(|(index, param)| {
                let ParamKind::Texture { binding } = param.kind else {
                    return None;
                };
                let bound = bindings
                    .iter()
                    .find(|b| b.param.index() == index)
                    .map(|b| &b.value);
                let texture = match bound {
                    Some(ParamValue::Texture(Some(texture))) => *texture,
                    None if param.name == IMAGE_PARAM => &targets.input,
                    _ => &self.fallback,
                };
                Some((binding, texture.create_view(&wgpu::TextureViewDescriptor::default())))
            })
            .collect();

        let mut entries: Vec<wgpu::BindGroupEntry> = views
            .iter()
            .map(|(binding, view)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: wgpu::BindingResource::TextureView(view),
            })
            .collect();
        for param in &layout.params {
            if let ParamKind::Sampler { binding } = param.kind {
                entries.push(wgpu::BindGroupEntry {
                    binding,
                    resource: wgpu::BindingResource::Sampler(program.sampler()),
                });
            }
        }
        if let Some((buffer, block)) = uniform {
            entries.push(wgpu::BindGroupEntry {
                binding: block.binding,
                resource: buffer.as_entire_binding(),
            });
        }

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Filter Bind Group"),
            layout: program.bind_group_layout(),
            entries: &entries,
        });

        let output_view = targets
            .output
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Filter Encoder"),
        });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Filter Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &output_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            let x = offset.0.min(targets.width - 1);
            let y = offset.1.min(targets.height - 1);
            render_pass.set_viewport(
                x as f32,
                y as f32,
                (targets.width - x) as f32,
                (targets.height - y) as f32,
                0.0,
                1.0,
            );

            let (vertex_buffer, index_buffer) = program.buffers();
            render_pass.set_pipeline(pipeline);
            render_pass.set_bind_group(0, &bind_group, &[]);
            render_pass.set_vertex_buffer(0, vertex_buffer.slice(..));
            render_pass.set_index_buffer(index_buffer.slice(..), wgpu::IndexFormat::Uint16);
            render_pass.draw_indexed(0..6, 0, 0..1);
        }
        self.gpu.queue.submit(std::iter::once(encoder.finish()));
    }

    fn read_back(&self) -> Result<VideoFrame> {
        let targets = self
            .targets
            .as_ref()
            .ok_or_else(|| anyhow!("Frame targets not allocated"))?;

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &targets.output,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &targets.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(targets.padded_bytes_per_row),
                    rows_per_image: Some(targets.height),
                },
            },
            wgpu::Extent3d {
                width: targets.width,
                height: targets.height,
                depth_or_array_layers: 1,
            },
        );
        self.gpu.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = targets.readback.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.gpu.device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        })?;
        receiver.recv()??;

        let data = buffer_slice.get_mapped_range();
        let pixels = unpad_rows(
            &data,
            targets.width as usize * 4,
            targets.padded_bytes_per_row as usize,
            targets.height as usize,
        );
        drop(data);
        targets.readback.unmap();

        Ok(VideoFrame::from_data(
            targets.width,
            targets.height,
            PixelFormat::Rgba,
            pixels,
        ))
    }
}

impl FilterHost for OffscreenHost {
    type Graphics = GpuContext;

    fn graphics(&self) -> &GpuContext {
        &self.gpu
    }

    fn begin_filter(&mut self, context: NodeId, _format: ColorFormat, _mode: RenderMode) -> bool {
        context == FILTER_NODE && self.targets.is_some()
    }

    fn filter_target(&self, context: NodeId) -> Option<NodeId> {
        (context == FILTER_NODE).then_some(SOURCE_NODE)
    }

    fn node_size(&self, node: NodeId) -> (u32, u32) {
        match &self.targets {
            Some(t) if node == SOURCE_NODE || node == FILTER_NODE => (t.width, t.height),
            _ => (0, 0),
        }
    }

    fn filter_texture(&self, context: NodeId) -> Option<&wgpu::Texture> {
        if context != FILTER_NODE {
            return None;
        }
        self.targets.as_ref().map(|t| &t.input)
    }

    fn end_filter(
        &mut self,
        _context: NodeId,
        program: &WgpuProgram,
        offset: (u32, u32),
        technique: &str,
        selector: &str,
        bindings: &[ParamBinding<'_, wgpu::Texture>],
    ) {
        let Some(pipeline) = program
            .pipeline(technique)
            .or_else(|| program.pipeline(selector))
        else {
            warn!(
                "Effect has neither {} nor {}, passing frame through",
                technique, selector
            );
            self.outcome = Outcome::Skipped;
            return;
        };
        let Some(targets) = self.targets.as_ref() else {
            self.outcome = Outcome::Skipped;
            return;
        };

        self.draw(targets, program, pipeline, offset, bindings);
        self.outcome = Outcome::Drawn;
    }

    fn skip_filter(&mut self, _context: NodeId) {
        self.outcome = Outcome::Skipped;
    }
}

/// Row pitch of the readback buffer for a `width` pixel RGBA row.
fn padded_bytes_per_row(width: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    (width * 4).div_ceil(align) * align
}

fn unpad_rows(data: &[u8], row_bytes: usize, padded_row_bytes: usize, height: usize) -> Vec<u8> {
    data.chunks(padded_row_bytes)
        .take(height)
        .flat_map(|row| &row[..row_bytes])
        .copied()
        .collect()
}

/// Lays out uniform bindings at the offsets reflected from the effect.
fn pack_uniforms<T>(layout: &EffectLayout, size: u32, bindings: &[ParamBinding<'_, T>]) -> Vec<u8> {
    let mut data = vec![0u8; size as usize];
    for binding in bindings {
        let Some(param) = layout.params.get(binding.param.index()) else {
            continue;
        };
        let ParamKind::Uniform { offset, ty } = param.kind else {
            continue;
        };
        let bytes: &[u8] = match (&binding.value, ty) {
            (ParamValue::Int(v), UniformType::Int) => bytemuck::bytes_of(v),
            (ParamValue::Vec2(v), UniformType::Vec2) => bytemuck::bytes_of(v),
            _ => {
                warn!("Value for {} does not match its {:?} uniform", param.name, ty);
                continue;
            }
        };
        let start = offset as usize;
        match data.get_mut(start..start + bytes.len()) {
            Some(slot) => slot.copy_from_slice(bytes),
            None => warn!("Uniform {} lies outside its block", param.name),
        }
    }
    data
}
