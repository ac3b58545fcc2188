//! Filter stages and the host callback surface they run against.
//!
//! A host (the renderer owning the node graph) drives each attached filter
//! through [`FilterRuntime`]: `reconfigure` on settings changes, `render` once
//! per frame, `detach` on removal. Filters are created from a
//! [`FilterDefinition`] registered in a [`FilterRegistry`].

mod deinterlace;
#[cfg(test)]
pub(crate) mod mock;
mod registry;

pub use deinterlace::{DeinterlaceDefinition, DeinterlaceFilter, DEINTERLACE_FILTER_ID};
pub use registry::{merge_defaults, FilterRegistry};

use crate::error::Result;
use crate::settings::Property;
use crate::shader::{ColorFormat, Graphics, ParamHandle};
use serde_yaml::Value;

/// Opaque handle to a node in the host's source/filter graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

/// Whether the host may skip its intermediate render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    AllowDirect,
    NoDirect,
}

/// Value bound to an effect parameter for one draw.
#[derive(Debug)]
pub enum ParamValue<'a, T> {
    /// `None` leaves the texture unbound.
    Texture(Option<&'a T>),
    Int(i32),
    Vec2([f32; 2]),
}

#[derive(Debug)]
pub struct ParamBinding<'a, T> {
    pub param: ParamHandle,
    pub value: ParamValue<'a, T>,
}

impl<'a, T> ParamBinding<'a, T> {
    pub fn texture(param: ParamHandle, texture: Option<&'a T>) -> Self {
        Self {
            param,
            value: ParamValue::Texture(texture),
        }
    }

    pub fn int(param: ParamHandle, value: i32) -> Self {
        Self {
            param,
            value: ParamValue::Int(value),
        }
    }

    pub fn vec2(param: ParamHandle, value: [f32; 2]) -> Self {
        Self {
            param,
            value: ParamValue::Vec2(value),
        }
    }
}

/// Renderer callbacks a filter uses while drawing.
pub trait FilterHost {
    type Graphics: Graphics + 'static;

    fn graphics(&self) -> &Self::Graphics;

    /// Prepares the filter's input. Returns false if the frame must be skipped.
    fn begin_filter(&mut self, context: NodeId, format: ColorFormat, mode: RenderMode) -> bool;

    /// The upstream node this filter is applied to.
    fn filter_target(&self, context: NodeId) -> Option<NodeId>;

    /// Reported width and height of a node.
    fn node_size(&self, node: NodeId) -> (u32, u32);

    /// Input texture for the filter's current render, owned by the host.
    fn filter_texture(
        &self,
        context: NodeId,
    ) -> Option<&<Self::Graphics as Graphics>::Texture>;

    /// Draws the input through `technique` of `program` with `bindings` applied.
    /// `selector` is an alternative technique name the host may prefer.
    fn end_filter(
        &mut self,
        context: NodeId,
        program: &<Self::Graphics as Graphics>::Program,
        offset: (u32, u32),
        technique: &str,
        selector: &str,
        bindings: &[ParamBinding<'_, <Self::Graphics as Graphics>::Texture>],
    );

    /// Passes the input through untouched after a `begin_filter`.
    fn skip_filter(&mut self, _context: NodeId) {}
}

/// Static description of a filter type plus its factory.
pub trait FilterDefinition<H: FilterHost>: Send + Sync {
    /// Unique identifier (e.g. "deinterlace_filter").
    fn id(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    /// Settings applied underneath whatever the user configured.
    fn defaults(&self) -> Value;

    fn properties(&self) -> Vec<Property>;

    /// Creates a filter instance for `context`.
    fn attach(
        &self,
        settings: &Value,
        context: NodeId,
        graphics: &H::Graphics,
    ) -> Result<Box<dyn FilterRuntime<H>>>;
}

/// A live filter instance.
pub trait FilterRuntime<H: FilterHost> {
    /// Applies new settings. Never touches the GPU.
    fn reconfigure(&mut self, settings: &Value);

    /// Draws one frame. The caller holds the graphics context.
    fn render(&mut self, host: &mut H);

    /// Releases every GPU resource held by the instance.
    fn detach(self: Box<Self>);
}
