//! In-memory graphics device and host for filter tests.

use super::{FilterHost, NodeId, ParamBinding, ParamValue, RenderMode};
use crate::error::{FilterError, Result};
use crate::settings::Technique;
use crate::shader::{
    graphics_entered, ColorFormat, Graphics, ParamHandle, Program, ShaderSource, TextureInfo,
    TextureUsage,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
pub enum GfxEvent {
    CompileProgram {
        in_graphics: bool,
    },
    ReleaseProgram {
        in_graphics: bool,
    },
    CreateTexture {
        id: u64,
        info: TextureInfo,
        usage: TextureUsage,
        in_graphics: bool,
    },
    CopyTexture {
        dst: u64,
        src: u64,
    },
    ReleaseTexture {
        id: u64,
        in_graphics: bool,
    },
}

type EventLog = Rc<RefCell<Vec<GfxEvent>>>;

/// Texture handle. Only textures created through `MockGraphics` are tracked.
#[derive(Debug)]
pub struct MockTexture {
    pub id: u64,
    pub info: TextureInfo,
    log: Option<EventLog>,
}

impl Drop for MockTexture {
    fn drop(&mut self) {
        if let Some(log) = &self.log {
            log.borrow_mut().push(GfxEvent::ReleaseTexture {
                id: self.id,
                in_graphics: graphics_entered(),
            });
        }
    }
}

pub struct MockProgram {
    params: Vec<String>,
    techniques: Vec<String>,
    log: EventLog,
}

impl MockProgram {
    pub fn param_name(&self, param: ParamHandle) -> &str {
        &self.params[param.index()]
    }
}

impl Program for MockProgram {
    fn param_by_name(&self, name: &str) -> Option<ParamHandle> {
        self.params.iter().position(|p| p == name).map(ParamHandle)
    }

    fn has_technique(&self, name: &str) -> bool {
        self.techniques.iter().any(|t| t == name)
    }

    fn techniques(&self) -> Vec<&str> {
        self.techniques.iter().map(String::as_str).collect()
    }
}

impl Drop for MockProgram {
    fn drop(&mut self) {
        self.log.borrow_mut().push(GfxEvent::ReleaseProgram {
            in_graphics: graphics_entered(),
        });
    }
}

pub struct MockGraphics {
    log: EventLog,
    next_id: Cell<u64>,
    /// Live textures carried over from cleared events.
    live_offset: Cell<usize>,
    /// Parameter names exposed by compiled programs.
    pub params: Vec<&'static str>,
    pub fail_compile: bool,
    pub fail_allocation: Cell<bool>,
    /// Makes `texture_info` reject every texture.
    pub unsupported_format: Cell<bool>,
}

impl MockGraphics {
    pub fn new() -> Self {
        Self {
            log: Rc::new(RefCell::new(Vec::new())),
            next_id: Cell::new(1),
            live_offset: Cell::new(0),
            params: vec!["image", "previous_image", "field_order", "dimensions"],
            fail_compile: false,
            fail_allocation: Cell::new(false),
            unsupported_format: Cell::new(false),
        }
    }

    pub fn events(&self) -> Vec<GfxEvent> {
        self.log.borrow().clone()
    }

    pub fn clear_events(&self) {
        let created = self.live_textures();
        self.log.borrow_mut().clear();
        self.live_offset.set(created);
    }

    /// Tracked textures created and not yet released.
    pub fn live_textures(&self) -> usize {
        let log = self.log.borrow();
        let created = log
            .iter()
            .filter(|e| matches!(e, GfxEvent::CreateTexture { .. }))
            .count();
        let released = log
            .iter()
            .filter(|e| matches!(e, GfxEvent::ReleaseTexture { .. }))
            .count();
        (self.live_offset.get() + created).saturating_sub(released)
    }

    /// A host-owned texture that is not counted as a filter allocation.
    pub fn host_texture(&self, width: u32, height: u32) -> MockTexture {
        MockTexture {
            id: self.next_id(),
            info: TextureInfo {
                width,
                height,
                format: ColorFormat::Rgba8,
            },
            log: None,
        }
    }

    fn next_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }
}

impl Graphics for MockGraphics {
    type Texture = MockTexture;
    type Program = MockProgram;

    fn create_program(&self, source: &ShaderSource) -> Result<MockProgram> {
        self.log.borrow_mut().push(GfxEvent::CompileProgram {
            in_graphics: graphics_entered(),
        });
        if self.fail_compile {
            return Err(source.compile_error("mock compile failure"));
        }
        Ok(MockProgram {
            params: self.params.iter().map(|p| p.to_string()).collect(),
            techniques: Technique::ALL.iter().map(|t| t.name().to_string()).collect(),
            log: self.log.clone(),
        })
    }

    fn create_texture(&self, info: TextureInfo, usage: TextureUsage) -> Result<MockTexture> {
        if self.fail_allocation.get() {
            return Err(FilterError::Resource("mock allocation failure".to_string()));
        }
        let id = self.next_id();
        self.log.borrow_mut().push(GfxEvent::CreateTexture {
            id,
            info,
            usage,
            in_graphics: graphics_entered(),
        });
        Ok(MockTexture {
            id,
            info,
            log: Some(self.log.clone()),
        })
    }

    fn texture_info(&self, texture: &MockTexture) -> Result<TextureInfo> {
        if self.unsupported_format.get() {
            return Err(FilterError::Resource("mock unsupported format".to_string()));
        }
        Ok(texture.info)
    }

    fn copy_texture(&self, dst: &MockTexture, src: &MockTexture) {
        self.log.borrow_mut().push(GfxEvent::CopyTexture {
            dst: dst.id,
            src: src.id,
        });
    }
}

/// A parameter value as the host saw it, textures reduced to their ids.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundValue {
    Texture(Option<u64>),
    Int(i32),
    Vec2([f32; 2]),
}

#[derive(Debug, Clone)]
pub struct EndCall {
    pub context: NodeId,
    pub technique: String,
    pub selector: String,
    pub offset: (u32, u32),
    pub params: Vec<(String, BoundValue)>,
}

impl EndCall {
    pub fn param(&self, name: &str) -> Option<&BoundValue> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// Host with one source node feeding one filter node.
pub struct MockHost {
    pub graphics: MockGraphics,
    pub source_node: NodeId,
    pub filter_node: NodeId,
    pub source_size: (u32, u32),
    /// Size the filter node reports for itself.
    pub filter_size: (u32, u32),
    pub input: Option<MockTexture>,
    pub accept_begin: bool,
    pub begins: Vec<(NodeId, ColorFormat, RenderMode)>,
    pub ends: Vec<EndCall>,
    pub skips: usize,
}

impl MockHost {
    pub fn new(width: u32, height: u32) -> Self {
        let graphics = MockGraphics::new();
        let input = graphics.host_texture(width, height);
        Self {
            graphics,
            source_node: NodeId(1),
            filter_node: NodeId(2),
            source_size: (width, height),
            filter_size: (width, height),
            input: Some(input),
            accept_begin: true,
            begins: Vec::new(),
            ends: Vec::new(),
            skips: 0,
        }
    }
}

impl FilterHost for MockHost {
    type Graphics = MockGraphics;

    fn graphics(&self) -> &MockGraphics {
        &self.graphics
    }

    fn begin_filter(&mut self, context: NodeId, format: ColorFormat, mode: RenderMode) -> bool {
        self.begins.push((context, format, mode));
        self.accept_begin
    }

    fn filter_target(&self, context: NodeId) -> Option<NodeId> {
        (context == self.filter_node).then_some(self.source_node)
    }

    fn node_size(&self, node: NodeId) -> (u32, u32) {
        if node == self.source_node {
            self.source_size
        } else if node == self.filter_node {
            self.filter_size
        } else {
            (0, 0)
        }
    }

    fn filter_texture(&self, _context: NodeId) -> Option<&MockTexture> {
        self.input.as_ref()
    }

    fn end_filter(
        &mut self,
        context: NodeId,
        program: &MockProgram,
        offset: (u32, u32),
        technique: &str,
        selector: &str,
        bindings: &[ParamBinding<'_, MockTexture>],
    ) {
        let params = bindings
            .iter()
            .map(|b| {
                let value = match &b.value {
                    ParamValue::Texture(t) => BoundValue::Texture(t.map(|t| t.id)),
                    ParamValue::Int(v) => BoundValue::Int(*v),
                    ParamValue::Vec2(v) => BoundValue::Vec2(*v),
                };
                (program.param_name(b.param).to_string(), value)
            })
            .collect();
        self.ends.push(EndCall {
            context,
            technique: technique.to_string(),
            selector: selector.to_string(),
            offset,
            params,
        });
    }

    fn skip_filter(&mut self, _context: NodeId) {
        self.skips += 1;
    }
}
