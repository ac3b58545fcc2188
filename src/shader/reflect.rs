//! Effect reflection: techniques and parameters discovered from WGSL with naga.

use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{AddressSpace, ScalarKind, ShaderStage, TypeInner, VectorSize};

/// Entry point every effect uses for its vertex stage.
pub const VERTEX_ENTRY_POINT: &str = "vs_main";

/// Scalar or vector type of a uniform block member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformType {
    Int,
    Float,
    Vec2,
}

impl UniformType {
    pub fn size(&self) -> usize {
        match self {
            UniformType::Int | UniformType::Float => 4,
            UniformType::Vec2 => 8,
        }
    }
}

/// Where a parameter lives in the effect's bind group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Texture { binding: u32 },
    Sampler { binding: u32 },
    Uniform { offset: u32, ty: UniformType },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectParam {
    pub name: String,
    pub kind: ParamKind,
}

/// The uniform block backing all `ParamKind::Uniform` parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformBlock {
    pub binding: u32,
    pub size: u32,
}

/// Everything the wgpu backend needs to know to build and drive an effect.
#[derive(Debug, Clone)]
pub struct EffectLayout {
    pub techniques: Vec<String>,
    pub params: Vec<EffectParam>,
    pub uniform: Option<UniformBlock>,
}

impl EffectLayout {
    /// Parses and validates `code`, then reflects its techniques and parameters.
    pub fn from_wgsl(code: &str) -> Result<Self, String> {
        let module = naga::front::wgsl::parse_str(code).map_err(|e| e.emit_to_string(code))?;

        let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
        validator
            .validate(&module)
            .map_err(|e| format!("Shader validation error: {:?}", e))?;

        Self::from_module(&module)
    }

    fn from_module(module: &naga::Module) -> Result<Self, String> {
        let mut has_vertex = false;
        let mut techniques = Vec::new();
        for entry in &module.entry_points {
            match entry.stage {
                ShaderStage::Vertex if entry.name == VERTEX_ENTRY_POINT => has_vertex = true,
                ShaderStage::Fragment => techniques.push(entry.name.clone()),
                _ => {}
            }
        }
        if !has_vertex {
            return Err(format!("missing vertex entry point `{}`", VERTEX_ENTRY_POINT));
        }
        if techniques.is_empty() {
            return Err("effect defines no fragment techniques".to_string());
        }

        let mut params = Vec::new();
        let mut uniform = None;
        for (_, var) in module.global_variables.iter() {
            let Some(binding) = &var.binding else { continue };
            if binding.group != 0 {
                return Err(format!(
                    "effect global {:?} is bound outside bind group 0",
                    var.name
                ));
            }

            match (&var.space, &module.types[var.ty].inner) {
                (AddressSpace::Handle, TypeInner::Image { .. }) => {
                    params.push(EffectParam {
                        name: var.name.clone().unwrap_or_default(),
                        kind: ParamKind::Texture { binding: binding.binding },
                    });
                }
                (AddressSpace::Handle, TypeInner::Sampler { .. }) => {
                    params.push(EffectParam {
                        name: var.name.clone().unwrap_or_default(),
                        kind: ParamKind::Sampler { binding: binding.binding },
                    });
                }
                (AddressSpace::Uniform, TypeInner::Struct { members, span }) => {
                    if uniform.is_some() {
                        return Err(format!(
                            "effect declares more than one uniform block ({:?})",
                            var.name
                        ));
                    }
                    uniform = Some(UniformBlock {
                        binding: binding.binding,
                        size: *span,
                    });
                    for member in members {
                        let (Some(name), Some(ty)) =
                            (&member.name, uniform_type(&module.types[member.ty].inner))
                        else {
                            continue;
                        };
                        params.push(EffectParam {
                            name: name.clone(),
                            kind: ParamKind::Uniform { offset: member.offset, ty },
                        });
                    }
                }
                _ => {
                    return Err(format!(
                        "unsupported effect global {:?}; uniforms must live in one struct",
                        var.name
                    ))
                }
            }
        }

        Ok(Self {
            techniques,
            params,
            uniform,
        })
    }

    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }
}

fn uniform_type(inner: &TypeInner) -> Option<UniformType> {
    match inner {
        TypeInner::Scalar(scalar) if scalar.width == 4 => match scalar.kind {
            ScalarKind::Sint => Some(UniformType::Int),
            ScalarKind::Float => Some(UniformType::Float),
            _ => None,
        },
        TypeInner::Vector {
            size: VectorSize::Bi,
            scalar,
        } if scalar.kind == ScalarKind::Float && scalar.width == 4 => Some(UniformType::Vec2),
        _ => None,
    }
}
