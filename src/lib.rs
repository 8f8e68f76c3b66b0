//! Server-side bridge for interactive widgets: widgets built on the server
//! open a comm channel on the client's session, stay in sync over it, and
//! are displayed through render slots driven by a host reactive graph.

pub mod adapters;
pub mod comm;
pub mod config;
pub mod dependencies;
pub mod error;
pub mod host;
pub mod layout;
pub mod lifecycle;
pub mod local;
pub mod output;
pub mod protocol;
pub mod reactive;
pub mod render;
pub mod serialize;
pub mod value;
pub mod widget;

pub use crate::adapters::{AdapterMap, ForeignValue, RenderValue};
pub use crate::comm::{Comm, CommRegistry};
pub use crate::config::BridgeConfig;
pub use crate::error::{BridgeError, Result};
pub use crate::host::{Computation, Host, Session};
pub use crate::lifecycle::WidgetLifecycle;
pub use crate::output::{OutputContainer, OutputOptions, output_widget};
pub use crate::protocol::{CommEnvelope, MsgType};
pub use crate::reactive::{TraitRead, reactive_depend, reactive_read};
pub use crate::render::{WidgetDescriptor, WidgetRenderer};
pub use crate::value::{StateMap, StateValue};
pub use crate::widget::{TraitChange, Widget, WidgetFactory, WidgetSpec};
pub use serde_json;
