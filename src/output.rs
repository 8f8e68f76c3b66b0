//! The placeholder element a rendered widget is displayed in.

use crate::config::BridgeConfig;
use crate::dependencies::{WidgetDependency, output_binding_dependency};
use serde::Serialize;

const OUTPUT_CLASS: &str = "widget-bridge-output widget-bridge-report-size widget-bridge-report-theme";
const FILL_ITEM_CLASS: &str = "html-fill-item";
const FILL_CONTAINER_CLASS: &str = "html-fill-container";

/// A CSS length. Bare numbers are pixels.
#[derive(Debug, Clone, PartialEq)]
pub enum CssSize {
    Px(f64),
    Css(String),
}

impl CssSize {
    pub fn to_css(&self) -> String {
        match self {
            CssSize::Px(px) if px.fract() == 0.0 => format!("{}px", *px as i64),
            CssSize::Px(px) => format!("{px}px"),
            CssSize::Css(text) => text.clone(),
        }
    }
}

impl From<&str> for CssSize {
    fn from(value: &str) -> Self {
        CssSize::Css(value.to_string())
    }
}

impl From<String> for CssSize {
    fn from(value: String) -> Self {
        CssSize::Css(value)
    }
}

impl From<i32> for CssSize {
    fn from(value: i32) -> Self {
        CssSize::Px(value.into())
    }
}

impl From<f64> for CssSize {
    fn from(value: f64) -> Self {
        CssSize::Px(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputOptions {
    pub width: Option<CssSize>,
    pub height: Option<CssSize>,
    /// Defaults to filling when no height is given.
    pub fill: Option<bool>,
    pub fillable: Option<bool>,
}

impl OutputOptions {
    pub fn width(mut self, width: impl Into<CssSize>) -> Self {
        self.width = Some(width.into());
        self
    }

    pub fn height(mut self, height: impl Into<CssSize>) -> Self {
        self.height = Some(height.into());
        self
    }

    pub fn fill(mut self, fill: bool) -> Self {
        self.fill = Some(fill);
        self
    }

    pub fn fillable(mut self, fillable: bool) -> Self {
        self.fillable = Some(fillable);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputContainer {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<String>,
    pub fill: bool,
    pub fillable: bool,
    /// CDN the client falls back to for widget modules.
    pub cdn: String,
    pub cdn_only: bool,
    pub dependencies: Vec<WidgetDependency>,
}

pub fn output_widget(id: &str, options: &OutputOptions, config: &BridgeConfig) -> OutputContainer {
    let height_given = options.height.is_some();

    OutputContainer {
        id: id.to_string(),
        width: options.width.as_ref().map(CssSize::to_css),
        height: options.height.as_ref().map(CssSize::to_css),
        fill: options.fill.unwrap_or(!height_given),
        fillable: options.fillable.unwrap_or(!height_given),
        cdn: config.cdn.clone(),
        cdn_only: config.cdn_only,
        dependencies: vec![output_binding_dependency(config)],
    }
}

impl OutputContainer {
    pub fn class(&self) -> String {
        let mut class = OUTPUT_CLASS.to_string();
        if self.fill {
            class.push(' ');
            class.push_str(FILL_ITEM_CLASS);
        }
        if self.fillable {
            class.push(' ');
            class.push_str(FILL_CONTAINER_CLASS);
        }
        class
    }

    pub fn style(&self) -> String {
        let mut style = String::new();
        if let Some(width) = &self.width {
            style.push_str(&format!("width:{width};"));
        }
        if let Some(height) = &self.height {
            style.push_str(&format!("height:{height};"));
        }
        style
    }

    /// Script tag the client reads its CDN settings from.
    pub fn head_html(&self) -> String {
        format!(
            r#"<script data-jupyter-widgets-cdn="{}" data-jupyter-widgets-cdn-only="{}"></script>"#,
            escape_attr(&self.cdn),
            self.cdn_only
        )
    }

    pub fn to_html(&self) -> String {
        let style = self.style();
        let style = if style.is_empty() {
            String::new()
        } else {
            format!(r#" style="{}""#, escape_attr(&style))
        };
        format!(
            r#"<div id="{}" class="{}"{style}></div>"#,
            escape_attr(&self.id),
            self.class()
        )
    }
}

fn escape_attr(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}
