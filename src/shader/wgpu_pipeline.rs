//! wgpu-backed effect programs and the `Graphics` implementation for `GpuContext`.

use super::reflect::{EffectLayout, ParamKind, VERTEX_ENTRY_POINT};
use super::{
    ColorFormat, GpuContext, Graphics, ParamHandle, Program, ShaderSource, TextureInfo,
    TextureUsage,
};
use crate::error::{FilterError, Result};
use crate::frame::QuadVertex;
use std::borrow::Cow;
use std::collections::HashMap;
use tracing::{debug, info};
use wgpu::util::DeviceExt;

/// Format every technique renders into.
pub const OUTPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// A compiled effect: one render pipeline per technique sharing a bind group layout.
pub struct WgpuProgram {
    layout: EffectLayout,
    pipelines: HashMap<String, wgpu::RenderPipeline>,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: Option<wgpu::Buffer>,
    sampler: wgpu::Sampler,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
}

impl WgpuProgram {
    /// Reflects and builds `source` on `device`.
    pub fn new(device: &wgpu::Device, source: &ShaderSource) -> Result<Self> {
        let layout = EffectLayout::from_wgsl(&source.code).map_err(|e| source.compile_error(e))?;
        info!(
            "Compiling effect {:?} with techniques {:?}",
            source.path,
            layout.techniques
        );

        // Naga accepts some effects the device still rejects (e.g. a binding whose
        // sample type differs from the reflected layout).
        let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Effect Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(&*source.code)),
        });

        let mut entries = Vec::new();
        for param in &layout.params {
            match param.kind {
                ParamKind::Texture { binding } => entries.push(wgpu::BindGroupLayoutEntry {
                    binding,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                }),
                ParamKind::Sampler { binding } => entries.push(wgpu::BindGroupLayoutEntry {
                    binding,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                }),
                ParamKind::Uniform { .. } => {}
            }
        }
        if let Some(block) = layout.uniform {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: block.binding,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            });
        }

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Effect Bind Group Layout"),
            entries: &entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Effect Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let mut pipelines = HashMap::new();
        for technique in &layout.techniques {
            let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(technique.as_str()),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some(VERTEX_ENTRY_POINT),
                    buffers: &[QuadVertex::layout()],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some(technique.as_str()),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: OUTPUT_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            });
            pipelines.insert(technique.clone(), pipeline);
        }

        if let Some(e) = pollster::block_on(scope.pop()) {
            return Err(source.compile_error(format!("device rejected effect: {}", e)));
        }

        let uniform_buffer = layout.uniform.map(|block| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Effect Uniform Buffer"),
                size: block.size as wgpu::BufferAddress,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Effect Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Vertex Buffer"),
            contents: bytemuck::cast_slice(QuadVertex::VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Index Buffer"),
            contents: bytemuck::cast_slice(QuadVertex::INDICES),
            usage: wgpu::BufferUsages::INDEX,
        });

        Ok(Self {
            layout,
            pipelines,
            bind_group_layout,
            uniform_buffer,
            sampler,
            vertex_buffer,
            index_buffer,
        })
    }

    pub fn pipeline(&self, technique: &str) -> Option<&wgpu::RenderPipeline> {
        self.pipelines.get(technique)
    }

    pub fn layout(&self) -> &EffectLayout {
        &self.layout
    }

    pub fn param_kind(&self, param: ParamHandle) -> Option<ParamKind> {
        self.layout.params.get(param.0).map(|p| p.kind)
    }

    pub fn bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.bind_group_layout
    }

    pub fn uniform_buffer(&self) -> Option<&wgpu::Buffer> {
        self.uniform_buffer.as_ref()
    }

    pub fn sampler(&self) -> &wgpu::Sampler {
        &self.sampler
    }

    pub fn buffers(&self) -> (&wgpu::Buffer, &wgpu::Buffer) {
        (&self.vertex_buffer, &self.index_buffer)
    }
}

impl Program for WgpuProgram {
    fn param_by_name(&self, name: &str) -> Option<ParamHandle> {
        self.layout.param_index(name).map(ParamHandle)
    }

    fn has_technique(&self, name: &str) -> bool {
        self.pipelines.contains_key(name)
    }

    fn techniques(&self) -> Vec<&str> {
        self.layout.techniques.iter().map(String::as_str).collect()
    }
}

impl Graphics for GpuContext {
    type Texture = wgpu::Texture;
    type Program = WgpuProgram;

    fn create_program(&self, source: &ShaderSource) -> Result<WgpuProgram> {
        WgpuProgram::new(&self.device, source)
    }

    fn create_texture(&self, info: TextureInfo, usage: TextureUsage) -> Result<wgpu::Texture> {
        let max = self.max_texture_dimension();
        if info.width == 0 || info.height == 0 || info.width > max || info.height > max {
            return Err(FilterError::Resource(format!(
                "cannot create {}x{} texture (limit {})",
                info.width, info.height, max
            )));
        }

        let usage = match usage {
            TextureUsage::Dynamic => {
                wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_DST
                    | wgpu::TextureUsages::COPY_SRC
            }
            TextureUsage::RenderTarget => {
                wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC
            }
        };

        Ok(self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Filter Texture"),
            size: wgpu::Extent3d {
                width: info.width,
                height: info.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: info.format.to_wgpu(),
            usage,
            view_formats: &[],
        }))
    }

    fn texture_info(&self, texture: &wgpu::Texture) -> Result<TextureInfo> {
        let format = ColorFormat::from_wgpu(texture.format()).ok_or_else(|| {
            FilterError::Resource(format!("unsupported texture format {:?}", texture.format()))
        })?;
        Ok(TextureInfo {
            width: texture.width(),
            height: texture.height(),
            format,
        })
    }

    fn copy_texture(&self, dst: &wgpu::Texture, src: &wgpu::Texture) {
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Copy Encoder"),
        });
        encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: src,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: dst,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: src.width().min(dst.width()),
                height: src.height().min(dst.height()),
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn destroy_texture(&self, texture: wgpu::Texture) {
        debug!("Destroying {}x{} texture", texture.width(), texture.height());
        texture.destroy();
    }
}
