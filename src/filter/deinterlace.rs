//! Temporal deinterlacing filter.
//!
//! Each frame is drawn through the selected technique of the deinterlace
//! effect with the previous frame bound alongside it. After drawing, a copy
//! of the current input is retained as the next frame's `previous_image`.

use super::{FilterDefinition, FilterHost, FilterRuntime, NodeId, ParamBinding, RenderMode};
use crate::error::{FilterError, Result};
use crate::settings::{self, DeinterlaceSettings, Property, Technique};
use crate::shader::{
    enter_graphics, ColorFormat, Graphics, ParamHandle, Program, ShaderSource, TextureUsage,
};
use serde_yaml::Value;
use tracing::{debug, error, info, warn};

pub const DEINTERLACE_FILTER_ID: &str = "deinterlace_filter";

const PARAM_PREVIOUS_IMAGE: &str = "previous_image";
const PARAM_FIELD_ORDER: &str = "field_order";
const PARAM_DIMENSIONS: &str = "dimensions";

/// Handles of the parameters bound on every draw.
#[derive(Debug, Clone, Copy)]
struct EffectParams {
    previous_image: ParamHandle,
    field_order: ParamHandle,
    dimensions: ParamHandle,
}

impl EffectParams {
    fn resolve<P: Program>(program: &P) -> Result<Self> {
        let lookup = |name: &'static str| {
            program
                .param_by_name(name)
                .ok_or(FilterError::MissingParameter(name))
        };
        Ok(Self {
            previous_image: lookup(PARAM_PREVIOUS_IMAGE)?,
            field_order: lookup(PARAM_FIELD_ORDER)?,
            dimensions: lookup(PARAM_DIMENSIONS)?,
        })
    }
}

/// One attached deinterlace filter.
pub struct DeinterlaceFilter<G: Graphics> {
    context: NodeId,
    program: Option<G::Program>,
    params: EffectParams,
    /// Technique name exactly as configured.
    technique_name: String,
    /// Technique actually drawn; the default when the configured name is unknown.
    technique: Technique,
    selector: String,
    /// Inverse of the configured "top field first" flag.
    field_order: bool,
    previous_frame: Option<G::Texture>,
}

impl<G: Graphics> DeinterlaceFilter<G> {
    /// Compiles the effect and creates a filter for `context`.
    pub fn attach(
        source: &ShaderSource,
        settings: &Value,
        context: NodeId,
        graphics: &G,
    ) -> Result<Self> {
        let (program, params) = {
            let _gfx = enter_graphics();
            let program = graphics.create_program(source)?;
            let params = EffectParams::resolve(&program)?;
            (program, params)
        };

        for technique in Technique::ALL {
            if !program.has_technique(technique.name()) {
                warn!("Effect {:?} has no technique {}", source.path, technique.name());
            }
        }

        let technique = Technique::default();
        let mut filter = Self {
            context,
            program: Some(program),
            params,
            technique_name: technique.name().to_string(),
            technique,
            selector: matrix_selector(technique.name()),
            field_order: true,
            previous_frame: None,
        };
        filter.reconfigure(settings);
        info!(
            "Attached deinterlace filter to {:?} ({}, top field first: {})",
            context, filter.technique_name, !filter.field_order
        );
        Ok(filter)
    }

    /// Applies a settings mapping. Malformed settings are logged and ignored.
    pub fn reconfigure(&mut self, settings: &Value) {
        match DeinterlaceSettings::from_value(settings) {
            Ok(settings) => self.apply(&settings),
            Err(e) => warn!("Ignoring malformed deinterlace settings: {}", e),
        }
    }

    pub fn apply(&mut self, settings: &DeinterlaceSettings) {
        if self.technique_name != settings.deinterlacer {
            self.technique = Technique::from_name(&settings.deinterlacer).unwrap_or_else(|| {
                warn!(
                    "Unknown deinterlacer {:?}, drawing {} instead",
                    settings.deinterlacer,
                    Technique::default().name()
                );
                Technique::default()
            });
            self.technique_name = settings.deinterlacer.clone();
            self.selector = matrix_selector(&settings.deinterlacer);
            debug!("Deinterlacer set to {}", self.technique_name);
        }
        self.field_order = !settings.field_order;
    }

    /// Draws the current frame and retains a copy of it for the next call.
    pub fn render<H: FilterHost<Graphics = G>>(&mut self, host: &mut H) {
        let Some(program) = self.program.as_ref() else {
            return;
        };

        if !host.begin_filter(self.context, ColorFormat::Rgba8, RenderMode::AllowDirect) {
            debug!("Host declined filter render for {:?}", self.context);
            return;
        }

        let (width, height) = host
            .filter_target(self.context)
            .map(|target| host.node_size(target))
            .unwrap_or((0, 0));
        let dimensions = [width as f32, height as f32];

        let current = match host.filter_texture(self.context) {
            Some(input) => {
                let graphics = host.graphics();
                let copy = graphics
                    .texture_info(input)
                    .and_then(|info| graphics.create_texture(info, TextureUsage::Dynamic));
                match copy {
                    Ok(copy) => {
                        graphics.copy_texture(&copy, input);
                        Some(copy)
                    }
                    Err(e) => {
                        error!("Dropping previous frame for {:?}: {}", self.context, e);
                        None
                    }
                }
            }
            None => {
                debug!("No input texture for {:?}, skipping", self.context);
                host.skip_filter(self.context);
                return;
            }
        };

        let bindings = [
            ParamBinding::texture(self.params.previous_image, self.previous_frame.as_ref()),
            ParamBinding::int(self.params.field_order, if self.field_order { 0 } else { 1 }),
            ParamBinding::vec2(self.params.dimensions, dimensions),
        ];
        host.end_filter(
            self.context,
            program,
            (0, 0),
            self.technique.name(),
            &self.selector,
            &bindings,
        );

        if let Some(old) = std::mem::replace(&mut self.previous_frame, current) {
            host.graphics().destroy_texture(old);
        }
    }

    /// Releases the retained frame and the program.
    pub fn detach(self) {
        info!("Detaching deinterlace filter from {:?}", self.context);
    }

    pub fn context(&self) -> NodeId {
        self.context
    }

    pub fn technique_name(&self) -> &str {
        &self.technique_name
    }

    pub fn technique(&self) -> Technique {
        self.technique
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// Stored field order flag: true when the bottom field comes first.
    pub fn field_order(&self) -> bool {
        self.field_order
    }

    pub fn previous_frame(&self) -> Option<&G::Texture> {
        self.previous_frame.as_ref()
    }
}

impl<G: Graphics> Drop for DeinterlaceFilter<G> {
    fn drop(&mut self) {
        let _gfx = enter_graphics();
        self.previous_frame.take();
        self.program.take();
    }
}

fn matrix_selector(technique_name: &str) -> String {
    format!("{}Matrix", technique_name)
}

impl<H: FilterHost> FilterRuntime<H> for DeinterlaceFilter<H::Graphics> {
    fn reconfigure(&mut self, settings: &Value) {
        DeinterlaceFilter::reconfigure(self, settings);
    }

    fn render(&mut self, host: &mut H) {
        DeinterlaceFilter::render(self, host);
    }

    fn detach(self: Box<Self>) {
        DeinterlaceFilter::detach(*self);
    }
}

/// Registers the deinterlace filter with a host.
#[derive(Debug, Clone)]
pub struct DeinterlaceDefinition {
    source: ShaderSource,
}

impl DeinterlaceDefinition {
    pub fn new(source: ShaderSource) -> Self {
        Self { source }
    }
}

impl Default for DeinterlaceDefinition {
    fn default() -> Self {
        Self::new(ShaderSource::builtin())
    }
}

impl<H: FilterHost> FilterDefinition<H> for DeinterlaceDefinition {
    fn id(&self) -> &'static str {
        DEINTERLACE_FILTER_ID
    }

    fn display_name(&self) -> &'static str {
        "Deinterlacing"
    }

    fn defaults(&self) -> Value {
        settings::defaults()
    }

    fn properties(&self) -> Vec<Property> {
        settings::properties()
    }

    fn attach(
        &self,
        settings: &Value,
        context: NodeId,
        graphics: &H::Graphics,
    ) -> Result<Box<dyn FilterRuntime<H>>> {
        let filter = DeinterlaceFilter::<H::Graphics>::attach(&self.source, settings, context, graphics)?;
        Ok(Box::new(filter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::mock::{BoundValue, GfxEvent, MockGraphics, MockHost};
    use crate::shader::TextureInfo;

    fn settings(yaml: &str) -> Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn attach(host: &MockHost, yaml: &str) -> DeinterlaceFilter<MockGraphics> {
        DeinterlaceFilter::attach(
            &ShaderSource::builtin(),
            &settings(yaml),
            host.filter_node,
            &host.graphics,
        )
        .unwrap()
    }

    fn render(filter: &mut DeinterlaceFilter<MockGraphics>, host: &mut MockHost) {
        let _gfx = enter_graphics();
        filter.render(host);
    }

    fn created_textures(events: &[GfxEvent]) -> Vec<u64> {
        events
            .iter()
            .filter_map(|e| match e {
                GfxEvent::CreateTexture { id, .. } => Some(*id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_attach_compiles_inside_graphics_section() {
        let host = MockHost::new(64, 32);
        let filter = attach(&host, "{}");

        assert_eq!(
            host.graphics.events()[0],
            GfxEvent::CompileProgram { in_graphics: true }
        );
        assert_eq!(filter.technique(), Technique::YadifMode0);
        assert_eq!(filter.technique_name(), "DrawYadifMode0");
        assert_eq!(filter.selector(), "DrawYadifMode0Matrix");
        assert!(filter.field_order());
        assert!(filter.previous_frame().is_none());
    }

    #[test]
    fn test_attach_reports_compile_failure() {
        let mut host = MockHost::new(64, 32);
        host.graphics.fail_compile = true;

        let err = DeinterlaceFilter::attach(
            &ShaderSource::builtin(),
            &Value::Null,
            host.filter_node,
            &host.graphics,
        )
        .err()
        .unwrap();
        assert!(err.is_compile_error());
    }

    #[test]
    fn test_attach_rejects_missing_parameter_and_releases_program() {
        let mut host = MockHost::new(64, 32);
        host.graphics.params = vec!["image", "previous_image", "dimensions"];

        let err = DeinterlaceFilter::attach(
            &ShaderSource::builtin(),
            &Value::Null,
            host.filter_node,
            &host.graphics,
        )
        .err()
        .unwrap();
        assert!(matches!(err, FilterError::MissingParameter("field_order")));
        assert!(err.is_compile_error());
        assert!(host
            .graphics
            .events()
            .contains(&GfxEvent::ReleaseProgram { in_graphics: true }));
    }

    #[test]
    fn test_first_frame_binds_no_previous_image() {
        let mut host = MockHost::new(64, 32);
        let mut filter = attach(&host, "{}");

        render(&mut filter, &mut host);

        assert_eq!(host.ends.len(), 1);
        assert_eq!(
            host.ends[0].param("previous_image"),
            Some(&BoundValue::Texture(None))
        );
        assert!(filter.previous_frame().is_some());
    }

    #[test]
    fn test_exactly_one_retained_frame() {
        let mut host = MockHost::new(64, 32);
        let mut filter = attach(&host, "{}");

        for _ in 0..5 {
            render(&mut filter, &mut host);
            assert_eq!(host.graphics.live_textures(), 1);
        }

        let created = created_textures(&host.graphics.events());
        assert_eq!(created.len(), 5);
        assert_eq!(filter.previous_frame().map(|t| t.id), created.last().copied());
    }

    #[test]
    fn test_old_frame_released_after_new_one_exists() {
        let mut host = MockHost::new(64, 32);
        let mut filter = attach(&host, "{}");
        render(&mut filter, &mut host);
        let first = filter.previous_frame().unwrap().id;
        host.graphics.clear_events();

        render(&mut filter, &mut host);

        let events = host.graphics.events();
        let created = events
            .iter()
            .position(|e| matches!(e, GfxEvent::CreateTexture { .. }))
            .unwrap();
        let released = events
            .iter()
            .position(|e| matches!(e, GfxEvent::ReleaseTexture { id, .. } if *id == first))
            .unwrap();
        assert!(created < released);
        assert_eq!(host.graphics.live_textures(), 1);
    }

    #[test]
    fn test_copy_matches_input_texture() {
        let mut host = MockHost::new(720, 480);
        let input_id = host.input.as_ref().unwrap().id;
        let mut filter = attach(&host, "{}");

        render(&mut filter, &mut host);

        let events = host.graphics.events();
        let (copy_id, info, usage) = events
            .iter()
            .find_map(|e| match e {
                GfxEvent::CreateTexture { id, info, usage, .. } => Some((*id, *info, *usage)),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            info,
            TextureInfo {
                width: 720,
                height: 480,
                format: ColorFormat::Rgba8
            }
        );
        assert_eq!(usage, TextureUsage::Dynamic);
        assert!(events.contains(&GfxEvent::CopyTexture {
            dst: copy_id,
            src: input_id
        }));
    }

    #[test]
    fn test_field_order_binding_follows_configured_flag() {
        for (top_field_first, bound) in [(true, 1), (false, 0)] {
            let mut host = MockHost::new(64, 32);
            let mut filter = attach(&host, &format!("field_order: {}", top_field_first));
            assert_eq!(filter.field_order(), !top_field_first);

            render(&mut filter, &mut host);

            assert_eq!(host.ends[0].param("field_order"), Some(&BoundValue::Int(bound)));
        }
    }

    #[test]
    fn test_reconfigure_is_idempotent_and_gpu_free() {
        let host = MockHost::new(64, 32);
        let mut filter = attach(&host, "{}");
        host.graphics.clear_events();
        let new_settings = settings("deinterlacer: DrawLinear\nfield_order: true");

        filter.reconfigure(&new_settings);
        let first = (
            filter.technique_name().to_string(),
            filter.technique(),
            filter.selector().to_string(),
            filter.field_order(),
        );
        filter.reconfigure(&new_settings);
        let second = (
            filter.technique_name().to_string(),
            filter.technique(),
            filter.selector().to_string(),
            filter.field_order(),
        );

        assert_eq!(first, second);
        assert_eq!(first.1, Technique::Linear);
        assert!(!first.3);
        assert!(host.graphics.events().is_empty());
    }

    #[test]
    fn test_dimensions_come_from_filter_target() {
        let mut host = MockHost::new(64, 32);
        host.filter_size = (320, 240);
        host.source_size = (1920, 1080);
        let mut filter = attach(&host, "{}");

        render(&mut filter, &mut host);

        assert_eq!(
            host.ends[0].param("dimensions"),
            Some(&BoundValue::Vec2([1920.0, 1080.0]))
        );
    }

    #[test]
    fn test_default_scenario_over_two_frames() {
        let mut host = MockHost::new(64, 32);
        let mut filter = attach(&host, "{}");

        render(&mut filter, &mut host);
        let first_copy = created_textures(&host.graphics.events())[0];
        render(&mut filter, &mut host);

        assert_eq!(
            host.begins,
            vec![
                (host.filter_node, ColorFormat::Rgba8, RenderMode::AllowDirect),
                (host.filter_node, ColorFormat::Rgba8, RenderMode::AllowDirect),
            ]
        );
        let first = &host.ends[0];
        assert_eq!(first.technique, "DrawYadifMode0");
        assert_eq!(first.selector, "DrawYadifMode0Matrix");
        assert_eq!(first.offset, (0, 0));
        assert_eq!(first.param("field_order"), Some(&BoundValue::Int(0)));

        assert_eq!(
            host.ends[1].param("previous_image"),
            Some(&BoundValue::Texture(Some(first_copy)))
        );
    }

    #[test]
    fn test_unknown_technique_falls_back_to_default() {
        let mut host = MockHost::new(64, 32);
        let mut filter = attach(&host, "deinterlacer: DrawLinear");
        filter.reconfigure(&settings("deinterlacer: DrawNonsense"));

        assert_eq!(filter.technique_name(), "DrawNonsense");
        assert_eq!(filter.technique(), Technique::YadifMode0);
        assert_eq!(filter.selector(), "DrawNonsenseMatrix");

        render(&mut filter, &mut host);
        assert_eq!(host.ends[0].technique, "DrawYadifMode0");
        assert_eq!(host.ends[0].selector, "DrawNonsenseMatrix");
    }

    #[test]
    fn test_malformed_settings_keep_previous_state() {
        let host = MockHost::new(64, 32);
        let mut filter = attach(&host, "deinterlacer: DrawBlend\nfield_order: true");

        filter.reconfigure(&settings("field_order: [1, 2]"));

        assert_eq!(filter.technique(), Technique::Blend);
        assert!(!filter.field_order());
    }

    #[test]
    fn test_missing_input_skips_frame() {
        let mut host = MockHost::new(64, 32);
        host.input = None;
        let mut filter = attach(&host, "{}");

        render(&mut filter, &mut host);

        assert_eq!(host.skips, 1);
        assert!(host.ends.is_empty());
        assert_eq!(host.graphics.live_textures(), 0);
    }

    #[test]
    fn test_declined_begin_draws_nothing() {
        let mut host = MockHost::new(64, 32);
        host.accept_begin = false;
        let mut filter = attach(&host, "{}");

        render(&mut filter, &mut host);

        assert!(host.ends.is_empty());
        assert_eq!(host.skips, 0);
        assert!(filter.previous_frame().is_none());
    }

    #[test]
    fn test_allocation_failure_still_draws_and_drops_history() {
        let mut host = MockHost::new(64, 32);
        let mut filter = attach(&host, "{}");
        render(&mut filter, &mut host);

        host.graphics.fail_allocation.set(true);
        render(&mut filter, &mut host);
        assert_eq!(host.ends.len(), 2);
        assert!(filter.previous_frame().is_none());
        assert_eq!(host.graphics.live_textures(), 0);

        host.graphics.fail_allocation.set(false);
        render(&mut filter, &mut host);
        assert_eq!(
            host.ends[2].param("previous_image"),
            Some(&BoundValue::Texture(None))
        );
    }

    #[test]
    fn test_unsupported_input_format_still_draws_without_copy() {
        let mut host = MockHost::new(64, 32);
        let mut filter = attach(&host, "{}");
        render(&mut filter, &mut host);
        host.graphics.clear_events();

        host.graphics.unsupported_format.set(true);
        render(&mut filter, &mut host);

        assert_eq!(host.ends.len(), 2);
        assert!(filter.previous_frame().is_none());
        assert!(!host
            .graphics
            .events()
            .iter()
            .any(|e| matches!(e, GfxEvent::CreateTexture { .. } | GfxEvent::CopyTexture { .. })));
        assert_eq!(host.graphics.live_textures(), 0);
    }

    #[test]
    fn test_detach_releases_everything_inside_graphics_section() {
        let mut host = MockHost::new(64, 32);
        let mut filter = attach(&host, "{}");
        render(&mut filter, &mut host);
        render(&mut filter, &mut host);
        let retained = filter.previous_frame().unwrap().id;
        host.graphics.clear_events();

        filter.detach();

        let events = host.graphics.events();
        assert!(events.contains(&GfxEvent::ReleaseTexture {
            id: retained,
            in_graphics: true
        }));
        assert!(events.contains(&GfxEvent::ReleaseProgram { in_graphics: true }));
        assert_eq!(host.graphics.live_textures(), 0);
    }

    #[test]
    fn test_runtime_trait_object_drives_filter() {
        let mut host = MockHost::new(64, 32);
        let definition = DeinterlaceDefinition::default();
        let mut runtime = FilterDefinition::<MockHost>::attach(
            &definition,
            &settings("deinterlacer: DrawDiscard"),
            host.filter_node,
            &host.graphics,
        )
        .unwrap();

        {
            let _gfx = enter_graphics();
            runtime.render(&mut host);
        }
        runtime.reconfigure(&settings("deinterlacer: DrawYadifMode2"));
        {
            let _gfx = enter_graphics();
            runtime.render(&mut host);
        }
        runtime.detach();

        assert_eq!(host.ends[0].technique, "DrawDiscard");
        assert_eq!(host.ends[1].technique, "DrawYadifMode2");
        assert_eq!(host.graphics.live_textures(), 0);
    }
}
