use std::env;
use std::path::PathBuf;

pub const DEFAULT_CDN: &str = "https://cdn.jsdelivr.net/npm/";
const DEFAULT_STATIC_DIR: &str = "static";

/// Where widget front-end code is looked up, and what happens when it's missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub cdn: String,
    /// Skip the local extension search entirely.
    pub cdn_only: bool,
    /// Warn when a widget's extension isn't installed locally.
    pub extension_warning: bool,
    /// Data directories searched for `nbextensions/<module>/index*.js`.
    pub extension_paths: Vec<PathBuf>,
    pub static_dir: PathBuf,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            cdn: DEFAULT_CDN.to_string(),
            cdn_only: false,
            extension_warning: false,
            extension_paths: Vec::new(),
            static_dir: PathBuf::from(DEFAULT_STATIC_DIR),
        }
    }
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let cdn = lookup("WIDGET_BRIDGE_CDN")
            .map(|raw| raw.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or(defaults.cdn);

        let cdn_only = lookup("WIDGET_BRIDGE_CDN_ONLY")
            .map(|raw| parse_flag(&raw))
            .unwrap_or(defaults.cdn_only);

        let extension_warning = lookup("WIDGET_BRIDGE_EXTENSION_WARNING")
            .map(|raw| parse_flag(&raw))
            .unwrap_or(defaults.extension_warning);

        let extension_paths = lookup("WIDGET_BRIDGE_EXTENSION_PATH")
            .map(|raw| env::split_paths(&raw).filter(|p| !p.as_os_str().is_empty()).collect())
            .unwrap_or(defaults.extension_paths);

        let static_dir = lookup("WIDGET_BRIDGE_STATIC_DIR")
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.static_dir);

        Self {
            cdn,
            cdn_only,
            extension_warning,
            extension_paths,
            static_dir,
        }
    }
}

fn parse_flag(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case("true")
}
