//! Front-end module manifests for widgets: where the client loads each
//! widget's JavaScript from, and which directories get mounted to serve it.

use crate::config::BridgeConfig;
use crate::widget::Widget;
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Modules bundled with the client's widget manager.
const BUNDLED_MODULE_PREFIX: &str = "@jupyter-widgets/";
const OUTPUT_BINDING_NAME: &str = "widget-output-binding";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DependencySource {
    Local { subdir: PathBuf },
    Cdn { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WidgetDependency {
    pub name: String,
    pub version: String,
    pub source: DependencySource,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scripts: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stylesheets: Vec<String>,
    /// Serve every file under the source directory.
    pub all_files: bool,
    /// Extra `<head>` content, e.g. a require path config.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaticMount {
    pub path: String,
    pub directory: PathBuf,
    pub name: String,
}

/// The library's own client assets.
pub fn output_binding_dependency(config: &BridgeConfig) -> WidgetDependency {
    WidgetDependency {
        name: OUTPUT_BINDING_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        source: DependencySource::Local {
            subdir: config.static_dir.clone(),
        },
        scripts: vec!["libembed-amd.js".to_string(), "output.js".to_string()],
        stylesheets: vec!["widget-bridge.css".to_string()],
        all_files: false,
        head: None,
    }
}

pub fn output_binding_mount(config: &BridgeConfig) -> StaticMount {
    StaticMount {
        path: "/dist/".to_string(),
        directory: config.static_dir.clone(),
        name: "widget-bridge-static-resources".to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct DependencyResolver {
    config: BridgeConfig,
}

impl DependencyResolver {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// `None` for bundled modules. A module that isn't installed locally
    /// falls back to the CDN instead of failing.
    pub fn require_dependency(&self, widget: &Widget, lib_prefix: &str) -> Option<WidgetDependency> {
        let module_name = widget.front_end_module();

        if module_name.starts_with(BUNDLED_MODULE_PREFIX) {
            return None;
        }

        let version = parse_version_safely(&widget.model_module_version());

        let module_dir = if self.config.cdn_only {
            None
        } else {
            self.extension_path(&module_name).or_else(|| {
                let dest = widget
                    .extension_destination()
                    .unwrap_or_else(|| widget.package_tag().to_string());
                self.extension_path(&dest)
            })
        };

        let Some(module_dir) = module_dir else {
            if self.config.extension_warning && !self.config.cdn_only {
                warn!(
                    widget_type = %widget.type_name(),
                    module = %module_name,
                    "couldn't find local path to widget extension; falling back to CDN, \
                     which needs an internet connection"
                );
            }
            return Some(self.cdn_dependency(&module_name, &version));
        };

        let href = format!(
            "{}/{}-{}",
            lib_prefix.trim_end_matches('/'),
            module_name,
            version
        );
        let config = json!({ "paths": { module_name.clone(): format!("{href}/index") } });

        Some(WidgetDependency {
            name: module_name,
            version,
            source: DependencySource::Local { subdir: module_dir },
            scripts: Vec::new(),
            stylesheets: Vec::new(),
            all_files: true,
            head: Some(format!("<script>window.require.config({config})</script>")),
        })
    }

    fn cdn_dependency(&self, module_name: &str, version: &str) -> WidgetDependency {
        WidgetDependency {
            name: module_name.to_string(),
            version: version.to_string(),
            source: DependencySource::Cdn {
                url: format!("{}{module_name}@{version}/dist/index", self.config.cdn),
            },
            scripts: Vec::new(),
            stylesheets: Vec::new(),
            all_files: false,
            head: None,
        }
    }

    /// Last data directory holding `nbextensions/<module>/index*.js` wins.
    fn extension_path(&self, module_name: &str) -> Option<PathBuf> {
        let mut found = None;
        for base in &self.config.extension_paths {
            let dir = base.join("nbextensions").join(module_name);
            if has_index_script(&dir) {
                found = Some(dir);
            }
        }
        found
    }
}

/// Where a local dependency's files are served from.
pub fn extension_mount(dep: &WidgetDependency) -> Option<StaticMount> {
    match &dep.source {
        DependencySource::Local { subdir } if dep.all_files => Some(StaticMount {
            path: format!("/nbextensions/{}", dep.name),
            directory: subdir.clone(),
            name: format!("{}-nbextension-static-resources", dep.name),
        }),
        _ => None,
    }
}

fn has_index_script(dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };

    entries.flatten().any(|entry| {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        name.starts_with("index") && name.ends_with(".js")
    })
}

/// Module versions may be npm ranges (`^1.2.3`); the range operator is
/// dropped. Anything unparsable becomes `"0.0"`.
pub fn parse_version_safely(raw: &str) -> String {
    parse_version(raw).unwrap_or_else(|| "0.0".to_string())
}

fn parse_version(raw: &str) -> Option<String> {
    let trimmed = raw.trim_start_matches(|c: char| !c.is_ascii_digit());
    let release: String = trimmed
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let release = release.trim_end_matches('.');

    if release.is_empty() || release.split('.').any(|part| part.is_empty()) {
        return None;
    }

    let parts: Vec<u64> = release
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .collect::<Option<_>>()?;

    let rest = &trimmed[release.len()..];
    let rest = rest.trim_start_matches('.');
    let suffix = match rest.chars().next() {
        None => String::new(),
        Some(_) if is_pre_release(rest) => normalize_pre_release(rest)?,
        Some(_) => return None,
    };

    let release = parts
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(".");
    Some(format!("{release}{suffix}"))
}

fn is_pre_release(rest: &str) -> bool {
    let body = rest.trim_start_matches(['-', '.']);
    ["alpha", "beta", "rc", "a", "b"]
        .iter()
        .any(|tag| body.starts_with(tag))
}

fn normalize_pre_release(rest: &str) -> Option<String> {
    let body = rest.trim_start_matches(['-', '.']);
    let (tag, digits) = [("alpha", "a"), ("beta", "b"), ("rc", "rc"), ("a", "a"), ("b", "b")]
        .iter()
        .find_map(|(long, short)| body.strip_prefix(long).map(|tail| (*short, tail)))?;
    let digits = digits.trim_start_matches('.');
    let number = if digits.is_empty() {
        0
    } else {
        digits.parse::<u64>().ok()?
    };
    Some(format!("{tag}{number}"))
}
