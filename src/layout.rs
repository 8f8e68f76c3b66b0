//! Layout defaults applied to a widget just before it is displayed.

use crate::error::Result;
use crate::value::{StateMap, StateValue};
use crate::widget::Widget;

const CONCAT_KEYS: [&str; 3] = ["concat", "hconcat", "vconcat"];

/// Normalize package-specific sizing and report whether the output should
/// fill its container. An explicit height anywhere turns filling off.
pub fn set_layout_defaults(widget: &Widget) -> Result<bool> {
    let mut fill = true;

    if let Some(StateValue::Map(layout)) = widget.get("layout") {
        if is_explicit_height(layout.get("height")) {
            fill = false;
        }
    }

    match widget.package_tag() {
        "plotly" if widget.has_trait("_layout") => {
            let mut layout = match widget.get("_layout") {
                Some(StateValue::Map(layout)) => layout,
                _ => StateMap::new(),
            };
            if layout.get("height").is_some_and(|h| !h.is_null()) {
                fill = false;
            }
            plotly_margins(&mut layout);
            widget.set("_layout", layout)?;
        }
        "altair" if widget.has_trait("spec") => {
            if let Some(StateValue::Map(mut spec)) = widget.get("spec") {
                if !CONCAT_KEYS.iter().any(|key| spec.contains_key(*key)) {
                    spec.insert("width".into(), "container".into());
                    spec.insert("height".into(), "container".into());
                    widget.set("spec", spec)?;
                }
            }
        }
        _ => {}
    }

    Ok(fill)
}

fn is_explicit_height(height: Option<&StateValue>) -> bool {
    match height {
        None | Some(StateValue::Null) => false,
        Some(StateValue::Str(h)) => !h.is_empty() && h != "auto",
        Some(_) => true,
    }
}

// Compact template margins; a 60px top margin is the stock default and is
// rewritten to match.
fn plotly_margins(layout: &mut StateMap) {
    let margin = StateValue::map([
        ("l", StateValue::Int(16)),
        ("t", StateValue::Int(32)),
        ("r", StateValue::Int(16)),
        ("b", StateValue::Int(16)),
    ]);
    let mut template = child_map(layout, "template");
    let mut template_layout = child_map(&template, "layout");
    template_layout.insert("margin".into(), margin);
    template.insert("layout".into(), StateValue::Map(template_layout));
    layout.insert("template".into(), StateValue::Map(template));

    if let Some(StateValue::Map(margin)) = layout.get_mut("margin") {
        if margin.get("t").and_then(StateValue::as_f64) == Some(60.0) {
            margin.insert("t".into(), StateValue::Int(32));
        }
    }
}

fn child_map(map: &StateMap, key: &str) -> StateMap {
    match map.get(key) {
        Some(StateValue::Map(child)) => child.clone(),
        _ => StateMap::new(),
    }
}
