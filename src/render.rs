//! Render slots: run a user computation, coerce its result into a widget,
//! and hand the client a reference to the already-open comm.

use crate::adapters::{AdapterMap, RenderValue};
use crate::error::{BridgeError, Result};
use crate::host::Host;
use crate::layout::set_layout_defaults;
use crate::lifecycle::WidgetLifecycle;
use crate::output::{OutputContainer, OutputOptions, output_widget};
use crate::reactive::{TraitRead, reactive_read};
use crate::widget::{Widget, WidgetFactory};
use serde::Serialize;
use std::cell::RefCell;

pub type RenderFn = Box<dyn FnMut() -> Result<Option<RenderValue>>>;

/// What the client receives for a rendered slot. The widget state itself
/// went out with the comm open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WidgetDescriptor {
    pub model_id: String,
    pub fill: bool,
}

pub struct WidgetRenderer {
    render_fn: RefCell<RenderFn>,
    options: OutputOptions,
    adapters: AdapterMap,
    factory: WidgetFactory,
    lifecycle: WidgetLifecycle,
    widget: RefCell<Option<Widget>>,
}

impl WidgetRenderer {
    pub fn new<F>(lifecycle: WidgetLifecycle, factory: WidgetFactory, render_fn: F) -> Self
    where
        F: FnMut() -> Result<Option<RenderValue>> + 'static,
    {
        Self {
            render_fn: RefCell::new(Box::new(render_fn)),
            options: OutputOptions::default(),
            adapters: AdapterMap::with_builtin(),
            factory,
            lifecycle,
            widget: RefCell::new(None),
        }
    }

    /// Display a widget that already exists. It stays open across re-renders.
    pub fn for_widget(lifecycle: WidgetLifecycle, factory: WidgetFactory, widget: Widget) -> Self {
        Self::new(lifecycle, factory, move || {
            Ok(Some(RenderValue::Widget(widget.clone())))
        })
    }

    pub fn with_options(mut self, options: OutputOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_adapters(mut self, adapters: AdapterMap) -> Self {
        self.adapters = adapters;
        self
    }

    pub fn options(&self) -> &OutputOptions {
        &self.options
    }

    pub fn default_ui(&self, id: &str) -> OutputContainer {
        output_widget(id, &self.options, self.lifecycle.config())
    }

    /// Run the slot once. `None` clears it; whatever it showed before is
    /// closed by the invalidation that triggered this run.
    pub fn render(&self) -> Result<Option<WidgetDescriptor>> {
        self.widget.replace(None);
        let ctx = self.lifecycle.host().current_computation();

        let (widget, constructed) = self.lifecycle.with_render_scope(|| -> Result<Option<Widget>> {
            let value = {
                let mut render_fn = self.render_fn.borrow_mut();
                (&mut *render_fn)()?
            };
            match value {
                Some(value) => self.adapters.as_widget(value, &self.factory).map(Some),
                None => Ok(None),
            }
        });

        let shown = widget.and_then(|widget| match widget {
            Some(widget) => self.describe(widget).map(Some),
            None => Ok(None),
        });

        match shown {
            Ok(Some((widget, descriptor))) => {
                // Children built along the way belong to their parent and stay open.
                if let Some(ctx) = &ctx {
                    if constructed.contains(&descriptor.model_id) {
                        self.lifecycle.close_on_invalidate(&descriptor.model_id, ctx);
                    }
                }
                self.widget.replace(Some(widget));
                Ok(Some(descriptor))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                // Nothing was displayed, so nothing built by this run outlives it.
                for model_id in &constructed {
                    match &ctx {
                        Some(ctx) => self.lifecycle.close_on_invalidate(model_id, ctx),
                        None => self.lifecycle.close_widget(model_id),
                    }
                }
                Err(err)
            }
        }
    }

    fn describe(&self, widget: Widget) -> Result<(Widget, WidgetDescriptor)> {
        let fill = set_layout_defaults(&widget)?;
        let model_id = widget.model_id().ok_or_else(|| BridgeError::Coercion {
            value: widget.type_name().to_string(),
            target: "displayed widget".to_string(),
            message: "it has no comm; construct widgets through the widget factory".to_string(),
        })?;
        Ok((widget, WidgetDescriptor { model_id, fill }))
    }

    /// The widget shown by the last successful render.
    pub fn widget(&self) -> Option<Widget> {
        self.widget.borrow().clone()
    }

    /// Reactively read a trait of the displayed widget.
    pub fn widget_trait(&self, host: &dyn Host, name: &str) -> Result<Option<TraitRead>> {
        match self.widget() {
            Some(widget) => reactive_read(host, &widget, name).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ForeignValue, PlotlyFigure};
    use crate::comm::CommRegistry;
    use crate::config::BridgeConfig;
    use crate::host::Computation;
    use crate::local::{LocalComputation, LocalHost, LocalSession};
    use crate::protocol::MsgType;
    use crate::value::StateValue;
    use crate::widget::WidgetSpec;
    use serde_json::json;
    use std::any::Any;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Env {
        host: Rc<LocalHost>,
        lifecycle: WidgetLifecycle,
        factory: WidgetFactory,
        session: Rc<LocalSession>,
    }

    impl Env {
        fn new() -> Self {
            let host = LocalHost::new();
            let lifecycle = WidgetLifecycle::new(host.clone(), CommRegistry::new(), BridgeConfig::default());
            let factory = WidgetFactory::new();
            lifecycle.install(&factory);
            Self {
                host,
                lifecycle,
                factory,
                session: LocalSession::new("S1"),
            }
        }

        fn renderer<F>(&self, render_fn: F) -> WidgetRenderer
        where
            F: FnMut() -> Result<Option<RenderValue>> + 'static,
        {
            WidgetRenderer::new(self.lifecycle.clone(), self.factory.clone(), render_fn)
        }

        fn run(&self, renderer: &WidgetRenderer, ctx: &Rc<LocalComputation>) -> Result<Option<WidgetDescriptor>> {
            self.host.with_session(self.session.clone(), || {
                self.host.with_computation(ctx.clone(), || renderer.render())
            })
        }

        fn sent_kinds(&self) -> Vec<(Option<MsgType>, String)> {
            self.session.flush();
            self.session
                .take_sent()
                .iter()
                .map(|m| (m.kind(), m.envelope().expect("decode").comm_id().to_string()))
                .collect()
        }
    }

    fn slider(factory: &WidgetFactory, value: i64) -> Result<Widget> {
        factory.create(
            WidgetSpec::new("IntSlider", "ipywidgets")
                .view("@jupyter-widgets/controls", "2.0.0", "IntSliderView")
                .with_trait("value", value),
        )
    }

    struct Unrenderable;

    impl ForeignValue for Unrenderable {
        fn package(&self) -> &str {
            "matplotlib.figure"
        }

        fn type_name(&self) -> &str {
            "Figure"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn fill_defaults_follow_layout_height() {
        let env = Env::new();
        let factory = env.factory.clone();
        let height = Rc::new(RefCell::new(None::<&'static str>));
        let h = height.clone();
        let renderer = env.renderer(move || {
            let layout = match *h.borrow() {
                Some(height) => StateValue::map([("height", StateValue::from(height))]),
                None => StateValue::map([("height", StateValue::Null)]),
            };
            let widget = factory.create(WidgetSpec::new("Box", "ipywidgets").with_trait("layout", layout))?;
            Ok(Some(widget.into()))
        });

        let descriptor = env
            .run(&renderer, &LocalComputation::new())
            .expect("render")
            .expect("descriptor");
        assert!(descriptor.fill);

        *height.borrow_mut() = Some("300px");
        let descriptor = env
            .run(&renderer, &LocalComputation::new())
            .expect("render")
            .expect("descriptor");
        assert!(!descriptor.fill);
        assert_eq!(
            serde_json::to_value(&descriptor).expect("json"),
            json!({"model_id": descriptor.model_id, "fill": false})
        );
    }

    #[test]
    fn unsupported_value_fails_render() {
        let env = Env::new();
        let renderer = env.renderer(|| Ok(Some(RenderValue::foreign(Unrenderable))));
        let err = env
            .run(&renderer, &LocalComputation::new())
            .expect_err("no adapter");
        match err {
            BridgeError::UnsupportedValue { type_name, .. } => assert_eq!(type_name, "Figure"),
            other => panic!("expected UnsupportedValue, got {other:?}"),
        }
        assert!(renderer.widget().is_none());
    }

    #[test]
    fn failed_render_closes_what_it_built() {
        let env = Env::new();
        let factory = env.factory.clone();
        let renderer = env.renderer(move || {
            slider(&factory, 1)?;
            Err(BridgeError::Coercion {
                value: "figure".to_string(),
                target: "widget".to_string(),
                message: "bad data".to_string(),
            })
        });

        let ctx = LocalComputation::new();
        env.run(&renderer, &ctx).expect_err("render fails");
        assert_eq!(env.lifecycle.registry().len(), 1);

        ctx.invalidate();
        assert!(env.lifecycle.registry().is_empty());
        let kinds: Vec<_> = env.sent_kinds().into_iter().map(|(kind, _)| kind).collect();
        assert_eq!(kinds, vec![Some(MsgType::Open), Some(MsgType::Close)]);
    }

    #[test]
    fn failed_render_without_context_closes_immediately() {
        let env = Env::new();
        let factory = env.factory.clone();
        let renderer = env.renderer(move || {
            slider(&factory, 1)?;
            Ok(Some(RenderValue::foreign(Unrenderable)))
        });

        env.host
            .with_session(env.session.clone(), || renderer.render())
            .expect_err("no adapter");
        assert!(env.lifecycle.registry().is_empty());
    }

    #[test]
    fn none_clears_the_slot() {
        let env = Env::new();
        let renderer = env.renderer(|| Ok(None));
        assert_eq!(env.run(&renderer, &LocalComputation::new()).expect("render"), None);
        assert!(renderer.widget().is_none());
        assert!(env.sent_kinds().is_empty());
    }

    #[test]
    fn replacement_opens_new_before_closing_old() {
        let env = Env::new();
        let factory = env.factory.clone();
        let next = Rc::new(Cell::new(1));
        let n = next.clone();
        let renderer = env.renderer(move || {
            let widget = slider(&factory, n.get())?;
            n.set(n.get() + 1);
            Ok(Some(widget.into()))
        });

        let first_ctx = LocalComputation::new();
        let a = env.run(&renderer, &first_ctx).expect("render a").expect("a");
        assert_eq!(env.sent_kinds(), vec![(Some(MsgType::Open), a.model_id.clone())]);

        first_ctx.invalidate();
        let b = env
            .run(&renderer, &LocalComputation::new())
            .expect("render b")
            .expect("b");

        assert_eq!(
            env.sent_kinds(),
            vec![
                (Some(MsgType::Open), b.model_id.clone()),
                (Some(MsgType::Close), a.model_id.clone()),
            ]
        );
        assert!(!env.lifecycle.registry().contains(&a.model_id));
        assert!(env.lifecycle.registry().contains(&b.model_id));
    }

    #[test]
    fn clearing_after_display_closes_previous_widget() {
        let env = Env::new();
        let factory = env.factory.clone();
        let show = Rc::new(Cell::new(true));
        let s = show.clone();
        let renderer = env.renderer(move || {
            if !s.get() {
                return Ok(None);
            }
            Ok(Some(slider(&factory, 3)?.into()))
        });

        let ctx = LocalComputation::new();
        let shown = env.run(&renderer, &ctx).expect("render").expect("shown");
        env.sent_kinds();

        show.set(false);
        ctx.invalidate();
        assert_eq!(env.run(&renderer, &LocalComputation::new()).expect("render"), None);
        assert_eq!(env.sent_kinds(), vec![(Some(MsgType::Close), shown.model_id)]);
    }

    #[test]
    fn widgets_built_outside_the_render_stay_open() {
        let env = Env::new();
        let widget = env
            .host
            .with_session(env.session.clone(), || slider(&env.factory, 5))
            .expect("slider");
        let renderer = WidgetRenderer::for_widget(env.lifecycle.clone(), env.factory.clone(), widget.clone());

        let ctx = LocalComputation::new();
        env.run(&renderer, &ctx).expect("render").expect("descriptor");
        ctx.invalidate();
        env.run(&renderer, &LocalComputation::new()).expect("render again");

        assert!(!widget.is_closed());
        let kinds: Vec<_> = env.sent_kinds().into_iter().map(|(kind, _)| kind).collect();
        assert_eq!(kinds, vec![Some(MsgType::Open)]);
    }

    #[test]
    fn only_the_rendered_widget_closes_on_invalidation() {
        let env = Env::new();
        let factory = env.factory.clone();
        let child_slot = Rc::new(RefCell::new(None));
        let slot = child_slot.clone();
        let renderer = env.renderer(move || {
            let child = slider(&factory, 1)?;
            let child_id = child.model_id().unwrap_or_default();
            *slot.borrow_mut() = Some(child);
            let parent = factory.create(
                WidgetSpec::new("VBox", "ipywidgets")
                    .view("@jupyter-widgets/controls", "2.0.0", "VBoxView")
                    .with_trait("children", vec![StateValue::Widget(child_id)]),
            )?;
            Ok(Some(parent.into()))
        });

        let ctx = LocalComputation::new();
        let parent = env.run(&renderer, &ctx).expect("render").expect("parent");
        ctx.invalidate();

        let child: Widget = child_slot.borrow().clone().expect("child widget");
        assert!(!env.lifecycle.registry().contains(&parent.model_id));
        assert!(!child.is_closed());
    }

    #[test]
    fn adapted_values_close_like_widgets() {
        let env = Env::new();
        let renderer = env.renderer(|| {
            Ok(Some(RenderValue::foreign(PlotlyFigure {
                data: json!([]),
                layout: json!({"height": 250}),
            })))
        });

        let ctx = LocalComputation::new();
        let descriptor = env.run(&renderer, &ctx).expect("render").expect("figure");
        assert!(!descriptor.fill);
        assert_eq!(
            renderer.widget().map(|w| w.type_name().to_string()).as_deref(),
            Some("FigureWidget")
        );

        ctx.invalidate();
        assert!(!env.lifecycle.registry().contains(&descriptor.model_id));
    }

    #[test]
    fn widget_trait_reads_reactively() {
        let env = Env::new();
        let factory = env.factory.clone();
        let renderer = env.renderer(move || Ok(Some(slider(&factory, 4)?.into())));
        env.run(&renderer, &LocalComputation::new()).expect("render");

        let reader = LocalComputation::new();
        let read = env
            .host
            .with_computation(reader.clone(), || renderer.widget_trait(&*env.host, "value"))
            .expect("read")
            .expect("widget present");
        assert_eq!(read.into_value(), StateValue::Int(4));

        renderer
            .widget()
            .expect("widget")
            .set("value", 8)
            .expect("set value");
        assert!(reader.is_invalidated());
    }

    #[test]
    fn default_ui_uses_renderer_options() {
        let env = Env::new();
        let renderer = env
            .renderer(|| Ok(None))
            .with_options(OutputOptions::default().height(200));
        let ui = renderer.default_ui("slot");
        assert_eq!(ui.height.as_deref(), Some("200px"));
        assert!(!ui.fill);
    }
}
