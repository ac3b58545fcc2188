//! GPU abstraction used by filters, and its wgpu implementation.

mod gpu_context;
mod lock;
pub mod reflect;
mod wgpu_pipeline;

pub use gpu_context::GpuContext;
pub use lock::{enter_graphics, graphics_entered, GraphicsGuard};
pub use wgpu_pipeline::{WgpuProgram, OUTPUT_FORMAT};

use crate::error::{FilterError, Result};
use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

/// Effect file bundled with the crate.
const BUILTIN_EFFECT: &str = include_str!("../../data/deinterlace_filter.wgsl");

/// Source of an effect program.
#[derive(Debug, Clone)]
pub struct ShaderSource {
    pub code: Cow<'static, str>,
    /// File the code was read from, for diagnostics.
    pub path: Option<PathBuf>,
}

impl ShaderSource {
    /// The bundled deinterlacing effect.
    pub fn builtin() -> Self {
        Self {
            code: Cow::Borrowed(BUILTIN_EFFECT),
            path: None,
        }
    }

    /// Reads an effect file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let code = fs::read_to_string(path).map_err(|e| FilterError::Compile {
            path: Some(path.to_path_buf()),
            message: e.to_string(),
        })?;
        Ok(Self {
            code: Cow::Owned(code),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn compile_error(&self, message: impl Into<String>) -> FilterError {
        FilterError::Compile {
            path: self.path.clone(),
            message: message.into(),
        }
    }
}

/// Pixel layout of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorFormat {
    Rgba8,
    Bgra8,
}

impl ColorFormat {
    pub fn to_wgpu(self) -> wgpu::TextureFormat {
        match self {
            ColorFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
            ColorFormat::Bgra8 => wgpu::TextureFormat::Bgra8Unorm,
        }
    }

    pub fn from_wgpu(format: wgpu::TextureFormat) -> Option<Self> {
        match format {
            wgpu::TextureFormat::Rgba8Unorm => Some(ColorFormat::Rgba8),
            wgpu::TextureFormat::Bgra8Unorm => Some(ColorFormat::Bgra8),
            _ => None,
        }
    }
}

/// Size and format of a 2D texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureInfo {
    pub width: u32,
    pub height: u32,
    pub format: ColorFormat,
}

/// How a texture will be used after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureUsage {
    /// Sampled by shaders, rewritten often (copy destination and source).
    Dynamic,
    /// Drawn into by a render pass.
    RenderTarget,
}

/// Opaque reference to a named effect parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamHandle(pub(crate) usize);

impl ParamHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A compiled effect: a set of techniques plus named parameters.
pub trait Program {
    fn param_by_name(&self, name: &str) -> Option<ParamHandle>;

    fn has_technique(&self, name: &str) -> bool;

    fn techniques(&self) -> Vec<&str>;
}

/// Graphics device operations needed by filters.
///
/// `Texture` and `Program` are owning handles: dropping one releases the
/// underlying GPU object. Creation and destruction must happen while the
/// graphics context is entered (see [`enter_graphics`]).
pub trait Graphics: 'static {
    type Texture: 'static;
    type Program: Program + 'static;

    fn create_program(&self, source: &ShaderSource) -> Result<Self::Program>;

    fn create_texture(&self, info: TextureInfo, usage: TextureUsage) -> Result<Self::Texture>;

    /// Size and format of `texture`. Fails for formats filters cannot copy.
    fn texture_info(&self, texture: &Self::Texture) -> Result<TextureInfo>;

    /// Copies the full contents of `src` into `dst`. Both must share size and format.
    fn copy_texture(&self, dst: &Self::Texture, src: &Self::Texture);

    fn destroy_texture(&self, texture: Self::Texture) {
        drop(texture);
    }
}
