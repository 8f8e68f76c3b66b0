//! Coercing render results into widgets. Values that are not widgets are
//! looked up by package tag; each tag has one adapter that builds the
//! matching widget.

use crate::error::{BridgeError, Result};
use crate::value::{StateMap, StateValue};
use crate::widget::{Widget, WidgetFactory, WidgetSpec, package_tag};
use serde_json::{Value, json};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// A value from some charting/mapping package that is not itself a widget.
pub trait ForeignValue: Any {
    /// Declared origin, e.g. `plotly.graph_objs._figure`.
    fn package(&self) -> &str;

    fn type_name(&self) -> &str;

    /// Whether the value can render itself as HTML.
    fn has_html_repr(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any;
}

pub enum RenderValue {
    Widget(Widget),
    Foreign(Box<dyn ForeignValue>),
}

impl RenderValue {
    pub fn foreign(value: impl ForeignValue) -> Self {
        RenderValue::Foreign(Box::new(value))
    }
}

impl From<Widget> for RenderValue {
    fn from(widget: Widget) -> Self {
        RenderValue::Widget(widget)
    }
}

impl fmt::Debug for RenderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderValue::Widget(widget) => f.debug_tuple("Widget").field(widget).finish(),
            RenderValue::Foreign(value) => f
                .debug_struct("Foreign")
                .field("package", &value.package())
                .field("type_name", &value.type_name())
                .finish(),
        }
    }
}

pub type Adapter = Rc<dyn Fn(&dyn ForeignValue, &WidgetFactory) -> Result<Widget>>;

#[derive(Clone, Default)]
pub struct AdapterMap {
    adapters: HashMap<String, Adapter>,
}

impl AdapterMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adapters for `altair`, `bokeh`, `plotly` and `pydeck` values.
    pub fn with_builtin() -> Self {
        let mut map = Self::new();
        map.register("altair", altair_adapter);
        map.register("bokeh", bokeh_adapter);
        map.register("plotly", plotly_adapter);
        map.register("pydeck", pydeck_adapter);
        map
    }

    pub fn register<F>(&mut self, tag: &str, adapter: F)
    where
        F: Fn(&dyn ForeignValue, &WidgetFactory) -> Result<Widget> + 'static,
    {
        self.adapters.insert(tag.to_string(), Rc::new(adapter));
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.adapters.contains_key(tag)
    }

    pub fn as_widget(&self, value: RenderValue, factory: &WidgetFactory) -> Result<Widget> {
        let value = match value {
            RenderValue::Widget(widget) => return Ok(widget),
            RenderValue::Foreign(value) => value,
        };

        let tag = package_tag(value.package());
        let Some(adapter) = self.adapters.get(tag) else {
            return Err(BridgeError::UnsupportedValue {
                type_name: value.type_name().to_string(),
                package: tag.to_string(),
                has_html_repr: value.has_html_repr(),
            });
        };

        adapter(&*value, factory)
    }
}

fn downcast<'a, T: 'static>(value: &'a dyn ForeignValue, target: &str) -> Result<&'a T> {
    value
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| coercion(value, target, "unrecognized value kind"))
}

fn coercion(value: &dyn ForeignValue, target: &str, message: &str) -> BridgeError {
    BridgeError::Coercion {
        value: value.type_name().to_string(),
        target: target.to_string(),
        message: message.to_string(),
    }
}

/// A Vega-Lite chart specification.
#[derive(Debug, Clone, PartialEq)]
pub struct VegaLiteChart {
    pub spec: Value,
}

impl ForeignValue for VegaLiteChart {
    fn package(&self) -> &str {
        "altair.vegalite.v5.api"
    }

    fn type_name(&self) -> &str {
        "Chart"
    }

    fn has_html_repr(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn altair_adapter(value: &dyn ForeignValue, factory: &WidgetFactory) -> Result<Widget> {
    const TARGET: &str = "JupyterChart";
    let chart = downcast::<VegaLiteChart>(value, TARGET)?;
    if !chart.spec.is_object() {
        return Err(coercion(value, TARGET, "chart spec must be an object"));
    }

    factory.create(
        WidgetSpec::new(TARGET, "altair.jupyter.jupyter_chart")
            .model("anywidget", "~0.9.*", "AnyModel")
            .view("anywidget", "~0.9.*", "AnyView")
            .with_trait("spec", StateValue::from_json(&chart.spec))
            .with_trait("selections", StateMap::new())
            .with_trait("params", StateMap::new()),
    )
}

/// A plotting figure: a list of traces plus a layout object.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotlyFigure {
    pub data: Value,
    pub layout: Value,
}

impl ForeignValue for PlotlyFigure {
    fn package(&self) -> &str {
        "plotly.graph_objs._figure"
    }

    fn type_name(&self) -> &str {
        "Figure"
    }

    fn has_html_repr(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn plotly_adapter(value: &dyn ForeignValue, factory: &WidgetFactory) -> Result<Widget> {
    const TARGET: &str = "FigureWidget";
    let figure = downcast::<PlotlyFigure>(value, TARGET)?;

    let data = match &figure.data {
        Value::Null => json!([]),
        Value::Array(_) => figure.data.clone(),
        _ => return Err(coercion(value, TARGET, "figure data must be a list of traces")),
    };
    let layout = match &figure.layout {
        Value::Null => json!({}),
        Value::Object(_) => figure.layout.clone(),
        _ => return Err(coercion(value, TARGET, "figure layout must be an object")),
    };

    factory.create(
        WidgetSpec::new(TARGET, "plotly.graph_objs._figurewidget")
            .model("jupyterlab-plotly", "^5.24.1", "FigureModel")
            .view("jupyterlab-plotly", "^5.24.1", "FigureView")
            .with_trait("_data", StateValue::from_json(&data))
            .with_trait("_layout", StateValue::from_json(&layout)),
    )
}

/// A deck.gl map described by its JSON configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DeckSpec {
    pub json_input: String,
    pub tooltip: Value,
}

impl ForeignValue for DeckSpec {
    fn package(&self) -> &str {
        "pydeck.bindings.deck"
    }

    fn type_name(&self) -> &str {
        "Deck"
    }

    fn has_html_repr(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn pydeck_adapter(value: &dyn ForeignValue, factory: &WidgetFactory) -> Result<Widget> {
    const TARGET: &str = "DeckGLWidget";
    let deck = downcast::<DeckSpec>(value, TARGET)?;
    serde_json::from_str::<Value>(&deck.json_input)
        .map_err(|err| coercion(value, TARGET, &format!("invalid deck configuration: {err}")))?;

    factory.create(
        WidgetSpec::new(TARGET, "pydeck.widget.widget")
            .model("@deck.gl/jupyter-widget", "~8.8.*", "DeckGLModel")
            .view("@deck.gl/jupyter-widget", "~8.8.*", "DeckGLView")
            .extension_destination("pydeck")
            .with_trait("json_input", deck.json_input.as_str())
            .with_trait("tooltip", StateValue::from_json(&deck.tooltip))
            .with_trait("selected_data", Vec::<StateValue>::new()),
    )
}

/// A serialized plotting document. `figure` documents stretch to fill.
#[derive(Debug, Clone, PartialEq)]
pub struct BokehDocument {
    pub kind: String,
    pub docs_json: Value,
}

impl ForeignValue for BokehDocument {
    fn package(&self) -> &str {
        "bokeh.plotting._figure"
    }

    fn type_name(&self) -> &str {
        &self.kind
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn bokeh_adapter(value: &dyn ForeignValue, factory: &WidgetFactory) -> Result<Widget> {
    const TARGET: &str = "BokehModel";
    let doc = downcast::<BokehDocument>(value, TARGET)?;

    let mut docs_json = doc.docs_json.clone();
    if doc.kind == "figure" {
        let Some(root) = docs_json.as_object_mut() else {
            return Err(coercion(value, TARGET, "document must be an object"));
        };
        root.insert("sizing_mode".into(), json!("stretch_both"));
    }

    factory.create(
        WidgetSpec::new(TARGET, "jupyter_bokeh.widgets")
            .model("@bokeh/jupyter_bokeh", "^4.0.5", "BokehModel")
            .view("@bokeh/jupyter_bokeh", "^4.0.5", "BokehView")
            .with_trait(
                "render_bundle",
                StateValue::from_json(&json!({ "docs_json": docs_json, "div": "" })),
            )
            .with_trait("combine_events", true),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Polars;

    impl ForeignValue for Polars {
        fn package(&self) -> &str {
            "polars.dataframe.frame"
        }

        fn type_name(&self) -> &str {
            "DataFrame"
        }

        fn has_html_repr(&self) -> bool {
            true
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct FakeFigure;

    impl ForeignValue for FakeFigure {
        fn package(&self) -> &str {
            "plotly.express"
        }

        fn type_name(&self) -> &str {
            "FakeFigure"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn widgets_pass_through() {
        let factory = WidgetFactory::new();
        let widget = factory
            .create(WidgetSpec::new("Button", "ipywidgets"))
            .expect("button");
        let out = AdapterMap::with_builtin()
            .as_widget(RenderValue::from(widget.clone()), &factory)
            .expect("pass through");
        assert!(out.ptr_eq(&widget));
    }

    #[test]
    fn unknown_package_is_unsupported() {
        let err = AdapterMap::with_builtin()
            .as_widget(RenderValue::foreign(Polars), &WidgetFactory::new())
            .expect_err("no adapter for polars");

        match &err {
            BridgeError::UnsupportedValue {
                type_name,
                package,
                has_html_repr,
            } => {
                assert_eq!(type_name, "DataFrame");
                assert_eq!(package, "polars");
                assert!(*has_html_repr);
            }
            other => panic!("expected UnsupportedValue, got {other:?}"),
        }
        assert!(err.to_string().contains("HTML representation"));
    }

    #[test]
    fn plotly_figure_becomes_figure_widget() {
        let widget = AdapterMap::with_builtin()
            .as_widget(
                RenderValue::foreign(PlotlyFigure {
                    data: json!([{"type": "scatter", "y": [1, 3, 2]}]),
                    layout: json!({"title": {"text": "demo"}}),
                }),
                &WidgetFactory::new(),
            )
            .expect("figure widget");

        assert_eq!(widget.type_name(), "FigureWidget");
        assert_eq!(widget.package_tag(), "plotly");
        assert_eq!(widget.front_end_module(), "jupyterlab-plotly");
        let layout = widget.get("_layout").expect("layout trait");
        assert!(layout.as_map().and_then(|m| m.get("title")).is_some());
    }

    #[test]
    fn wrong_kind_under_known_tag_is_a_coercion_error() {
        let err = AdapterMap::with_builtin()
            .as_widget(RenderValue::foreign(FakeFigure), &WidgetFactory::new())
            .expect_err("not a PlotlyFigure");
        match err {
            BridgeError::Coercion { value, target, .. } => {
                assert_eq!(value, "FakeFigure");
                assert_eq!(target, "FigureWidget");
            }
            other => panic!("expected Coercion, got {other:?}"),
        }
    }

    #[test]
    fn altair_chart_becomes_jupyter_chart() {
        let widget = AdapterMap::with_builtin()
            .as_widget(
                RenderValue::foreign(VegaLiteChart {
                    spec: json!({"mark": "point", "data": {"values": []}}),
                }),
                &WidgetFactory::new(),
            )
            .expect("jupyter chart");
        assert_eq!(widget.type_name(), "JupyterChart");
        assert!(widget.has_trait("selections"));

        let err = AdapterMap::with_builtin()
            .as_widget(
                RenderValue::foreign(VegaLiteChart { spec: json!("nope") }),
                &WidgetFactory::new(),
            )
            .expect_err("spec must be an object");
        assert!(matches!(err, BridgeError::Coercion { .. }));
    }

    #[test]
    fn pydeck_requires_valid_json() {
        let factory = WidgetFactory::new();
        let widget = AdapterMap::with_builtin()
            .as_widget(
                RenderValue::foreign(DeckSpec {
                    json_input: r#"{"layers": []}"#.to_string(),
                    tooltip: Value::Bool(true),
                }),
                &factory,
            )
            .expect("deck widget");
        assert_eq!(widget.type_name(), "DeckGLWidget");
        assert_eq!(widget.extension_destination().as_deref(), Some("pydeck"));

        let err = AdapterMap::with_builtin()
            .as_widget(
                RenderValue::foreign(DeckSpec {
                    json_input: "{".to_string(),
                    tooltip: Value::Null,
                }),
                &factory,
            )
            .expect_err("bad json");
        assert!(err.to_string().contains("DeckGLWidget"));
    }

    #[test]
    fn bokeh_figures_stretch() {
        let widget = AdapterMap::with_builtin()
            .as_widget(
                RenderValue::foreign(BokehDocument {
                    kind: "figure".to_string(),
                    docs_json: json!({"roots": []}),
                }),
                &WidgetFactory::new(),
            )
            .expect("bokeh model");

        let bundle = widget.get("render_bundle").expect("bundle");
        let docs = bundle
            .as_map()
            .and_then(|m| m.get("docs_json"))
            .and_then(StateValue::as_map)
            .expect("docs_json map");
        assert_eq!(docs.get("sizing_mode"), Some(&StateValue::from("stretch_both")));
    }

    #[test]
    fn custom_adapters_can_be_registered() {
        let mut adapters = AdapterMap::new();
        assert!(!adapters.contains("polars"));
        adapters.register("polars", |_, factory| {
            factory.create(WidgetSpec::new("DataGrid", "ipydatagrid"))
        });

        let widget = adapters
            .as_widget(RenderValue::foreign(Polars), &WidgetFactory::new())
            .expect("custom adapter");
        assert_eq!(widget.type_name(), "DataGrid");
    }
}
