//! Observable widget objects: named traits, change observers, full-state
//! get/replace, and the comm they sync over once opened.

use crate::comm::Comm;
use crate::error::{BridgeError, Result};
use crate::protocol::{Buffer, CommEnvelope};
use crate::serialize::{BufferPath, decode_state, encode_state};
use crate::value::{StateMap, StateValue};
use serde_json::{Map, Value, json};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{debug, warn};

pub type ObserverId = u64;

pub type ConstructHook = Rc<dyn Fn(&Widget) -> Result<()>>;

type ChangeHandler = Rc<dyn Fn(&TraitChange)>;
type CustomMsgHandler = Rc<dyn Fn(&Widget, &Value, &[Vec<u8>])>;

const DEFAULT_MODULE: &str = "@jupyter-widgets/base";
const DEFAULT_MODULE_VERSION: &str = "2.0.0";

#[derive(Debug, Clone, PartialEq)]
pub struct TraitChange {
    pub name: String,
    pub old: StateValue,
    pub new: StateValue,
}

#[derive(Debug, Clone)]
pub struct WidgetSpec {
    pub type_name: String,
    /// Declared origin, e.g. `plotly.graph_objs`. The first segment is the package tag.
    pub package: String,
    pub model_module: String,
    pub model_module_version: String,
    pub model_name: String,
    pub view: Option<ViewSpec>,
    pub extension_destination: Option<String>,
    pub model_id: Option<String>,
    pub traits: StateMap,
}

#[derive(Debug, Clone)]
pub struct ViewSpec {
    pub module: String,
    pub module_version: String,
    pub name: String,
}

impl WidgetSpec {
    pub fn new(type_name: impl Into<String>, package: impl Into<String>) -> Self {
        let type_name = type_name.into();
        Self {
            model_name: format!("{type_name}Model"),
            type_name,
            package: package.into(),
            model_module: DEFAULT_MODULE.to_string(),
            model_module_version: DEFAULT_MODULE_VERSION.to_string(),
            view: None,
            extension_destination: None,
            model_id: None,
            traits: StateMap::new(),
        }
    }

    pub fn model(mut self, module: &str, version: &str, name: &str) -> Self {
        self.model_module = module.to_string();
        self.model_module_version = version.to_string();
        self.model_name = name.to_string();
        self
    }

    pub fn view(mut self, module: &str, version: &str, name: &str) -> Self {
        self.view = Some(ViewSpec {
            module: module.to_string(),
            module_version: version.to_string(),
            name: name.to_string(),
        });
        self
    }

    pub fn with_trait(mut self, name: &str, value: impl Into<StateValue>) -> Self {
        self.traits.insert(name.to_string(), value.into());
        self
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    /// Directory name the package installs its front-end extension under,
    /// when it differs from the module name.
    pub fn extension_destination(mut self, dest: impl Into<String>) -> Self {
        self.extension_destination = Some(dest.into());
        self
    }
}

struct Observer {
    id: ObserverId,
    names: Vec<String>,
    handler: ChangeHandler,
}

impl Observer {
    fn wants(&self, name: &str) -> bool {
        self.names.is_empty() || self.names.iter().any(|n| n == name)
    }
}

struct WidgetInner {
    type_name: String,
    package: String,
    extension_destination: Option<String>,
    model_id: RefCell<Option<String>>,
    traits: RefCell<StateMap>,
    observers: RefCell<Vec<Observer>>,
    next_observer: Cell<ObserverId>,
    comm: RefCell<Option<Rc<Comm>>>,
    /// Values last received from the client, not echoed back.
    property_lock: RefCell<StateMap>,
    custom_handlers: RefCell<Vec<CustomMsgHandler>>,
}

#[derive(Clone)]
pub struct Widget {
    inner: Rc<WidgetInner>,
}

#[derive(Clone)]
pub struct WeakWidget {
    inner: Weak<WidgetInner>,
}

impl WeakWidget {
    pub fn upgrade(&self) -> Option<Widget> {
        self.inner.upgrade().map(|inner| Widget { inner })
    }
}

impl fmt::Debug for Widget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Widget")
            .field("type_name", &self.inner.type_name)
            .field("model_id", &self.model_id())
            .finish()
    }
}

impl Widget {
    /// Construction without hooks; use [`WidgetFactory::create`].
    pub(crate) fn from_spec(spec: WidgetSpec) -> Self {
        let mut traits = StateMap::new();
        traits.insert("_model_module".into(), spec.model_module.into());
        traits.insert("_model_module_version".into(), spec.model_module_version.into());
        traits.insert("_model_name".into(), spec.model_name.into());
        match spec.view {
            Some(view) => {
                traits.insert("_view_module".into(), view.module.into());
                traits.insert("_view_module_version".into(), view.module_version.into());
                traits.insert("_view_name".into(), view.name.into());
            }
            None => {
                traits.insert("_view_module".into(), StateValue::Null);
                traits.insert("_view_module_version".into(), StateValue::from(""));
                traits.insert("_view_name".into(), StateValue::Null);
            }
        }
        traits.extend(spec.traits);

        Self {
            inner: Rc::new(WidgetInner {
                type_name: spec.type_name,
                package: spec.package,
                extension_destination: spec.extension_destination,
                model_id: RefCell::new(spec.model_id),
                traits: RefCell::new(traits),
                observers: RefCell::new(Vec::new()),
                next_observer: Cell::new(1),
                comm: RefCell::new(None),
                property_lock: RefCell::new(StateMap::new()),
                custom_handlers: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakWidget {
        WeakWidget {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn ptr_eq(&self, other: &Widget) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn type_name(&self) -> &str {
        &self.inner.type_name
    }

    pub fn package(&self) -> &str {
        &self.inner.package
    }

    pub fn package_tag(&self) -> &str {
        package_tag(&self.inner.package)
    }

    pub fn model_id(&self) -> Option<String> {
        self.inner.model_id.borrow().clone()
    }

    pub fn set_model_id(&self, model_id: impl Into<String>) {
        *self.inner.model_id.borrow_mut() = Some(model_id.into());
    }

    pub fn extension_destination(&self) -> Option<String> {
        self.inner.extension_destination.clone()
    }

    pub fn is_dom_widget(&self) -> bool {
        matches!(self.get("_view_module"), Some(StateValue::Str(_)))
    }

    /// The npm module the client needs to construct this widget's view.
    pub fn front_end_module(&self) -> String {
        let attr = if self.is_dom_widget() {
            "_view_module"
        } else {
            "_model_module"
        };
        match self.get(attr) {
            Some(StateValue::Str(module)) if !module.is_empty() => module,
            _ => self.package_tag().to_string(),
        }
    }

    pub fn model_module_version(&self) -> String {
        match self.get("_model_module_version") {
            Some(StateValue::Str(version)) => version,
            _ => "1.0".to_string(),
        }
    }

    pub fn trait_names(&self) -> Vec<String> {
        self.inner.traits.borrow().keys().cloned().collect()
    }

    pub fn has_trait(&self, name: &str) -> bool {
        self.inner.traits.borrow().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<StateValue> {
        self.inner.traits.borrow().get(name).cloned()
    }

    pub fn get_state(&self) -> StateMap {
        self.inner.traits.borrow().clone()
    }

    pub fn set(&self, name: &str, value: impl Into<StateValue>) -> Result<()> {
        let mut patch = StateMap::new();
        patch.insert(name.to_string(), value.into());
        self.apply_state(patch, false)
    }

    /// Replace several traits at once; one update goes to the client.
    pub fn set_state(&self, patch: StateMap) -> Result<()> {
        self.apply_state(patch, false)
    }

    /// Empty `names` observes every trait.
    pub fn observe<F>(&self, names: &[&str], handler: F) -> ObserverId
    where
        F: Fn(&TraitChange) + 'static,
    {
        let id = self.inner.next_observer.get();
        self.inner.next_observer.set(id + 1);
        self.inner.observers.borrow_mut().push(Observer {
            id,
            names: names.iter().map(|n| n.to_string()).collect(),
            handler: Rc::new(handler),
        });
        id
    }

    pub fn unobserve(&self, id: ObserverId) -> bool {
        let mut observers = self.inner.observers.borrow_mut();
        let before = observers.len();
        observers.retain(|observer| observer.id != id);
        observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.borrow().len()
    }

    pub fn on_custom_msg<F>(&self, handler: F)
    where
        F: Fn(&Widget, &Value, &[Vec<u8>]) + 'static,
    {
        self.inner.custom_handlers.borrow_mut().push(Rc::new(handler));
    }

    pub fn send_custom(&self, content: Value, buffers: &[Buffer]) -> Result<()> {
        let Some(comm) = self.open_comm() else {
            return Ok(());
        };
        comm.send(json!({ "method": "custom", "content": content }), Map::new(), buffers)
    }

    pub fn comm(&self) -> Option<Rc<Comm>> {
        self.inner.comm.borrow().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.comm().is_none_or(|comm| comm.is_closed())
    }

    pub(crate) fn attach_comm(&self, comm: Rc<Comm>) {
        let weak = self.downgrade();
        comm.on_msg(move |envelope| {
            let Some(widget) = weak.upgrade() else {
                return;
            };
            if let Err(err) = widget.handle_comm_msg(envelope) {
                warn!(
                    widget_type = %widget.type_name(),
                    comm_id = %envelope.comm_id(),
                    "failed to handle client message: {err}"
                );
            }
        });
        *self.inner.comm.borrow_mut() = Some(comm);
    }

    /// Closing twice is harmless; the model id stays readable afterwards.
    pub fn close(&self) -> Result<()> {
        let comm = self.inner.comm.borrow_mut().take();
        match comm {
            Some(comm) => comm.close(None, Map::new(), false),
            None => Ok(()),
        }
    }

    pub fn handle_comm_msg(&self, envelope: &CommEnvelope) -> Result<()> {
        let data = envelope.data();
        let method = data
            .get("method")
            .and_then(Value::as_str)
            .or_else(|| data.get("state").map(|_| "update"));

        match method {
            Some("update") => {
                let buffer_paths: Vec<BufferPath> = match data.get("buffer_paths") {
                    Some(paths) if !paths.is_null() => serde_json::from_value(paths.clone())?,
                    _ => Vec::new(),
                };
                let buffers = envelope.decoded_buffers()?;
                let state = decode_state(
                    data.get("state").unwrap_or(&Value::Null),
                    &buffer_paths,
                    buffers,
                )?;
                self.apply_state(state, true)
            }
            Some("request_state") => self.send_state(&self.get_state()),
            Some("custom") => {
                let content = data.get("content").cloned().unwrap_or(Value::Null);
                let buffers = envelope.decoded_buffers()?;
                let handlers = self.inner.custom_handlers.borrow().clone();
                for handler in handlers {
                    handler(self, &content, &buffers);
                }
                Ok(())
            }
            Some(other) => Err(BridgeError::InvalidMessage(format!(
                "unknown widget message method '{other}'"
            ))),
            None => Err(BridgeError::InvalidMessage(
                "widget message has no method".to_string(),
            )),
        }
    }

    fn apply_state(&self, patch: StateMap, from_client: bool) -> Result<()> {
        if !from_client {
            let traits = self.inner.traits.borrow();
            if let Some(name) = patch.keys().find(|name| !traits.contains_key(*name)) {
                return Err(BridgeError::UnknownTrait {
                    widget_type: self.inner.type_name.clone(),
                    name: name.clone(),
                });
            }
        }

        let mut changes = Vec::new();
        {
            let traits = self.inner.traits.borrow();
            for (name, value) in &patch {
                let Some(current) = traits.get(name) else {
                    warn!(
                        widget_type = %self.inner.type_name,
                        name = %name,
                        "ignoring client update for unknown trait"
                    );
                    continue;
                };
                if current != value {
                    changes.push(TraitChange {
                        name: name.clone(),
                        old: current.clone(),
                        new: value.clone(),
                    });
                }
            }
        }

        if from_client {
            self.commit(&changes);
            *self.inner.property_lock.borrow_mut() = patch;
            self.notify(&changes);
            self.inner.property_lock.borrow_mut().clear();
            return Ok(());
        }

        // Nothing changes unless the update could be encoded and queued.
        let outgoing: StateMap = changes
            .iter()
            .filter(|change| self.should_send(&change.name, &change.new))
            .map(|change| (change.name.clone(), change.new.clone()))
            .collect();

        if !outgoing.is_empty() {
            self.send_state(&outgoing)?;
        }
        self.commit(&changes);
        self.notify(&changes);
        Ok(())
    }

    fn commit(&self, changes: &[TraitChange]) {
        let mut traits = self.inner.traits.borrow_mut();
        for change in changes {
            traits.insert(change.name.clone(), change.new.clone());
        }
    }

    fn should_send(&self, name: &str, value: &StateValue) -> bool {
        self.inner.property_lock.borrow().get(name) != Some(value)
    }

    fn notify(&self, changes: &[TraitChange]) {
        for change in changes {
            let handlers: Vec<ChangeHandler> = self
                .inner
                .observers
                .borrow()
                .iter()
                .filter(|observer| observer.wants(&change.name))
                .map(|observer| observer.handler.clone())
                .collect();

            for handler in handlers {
                handler(change);
            }
        }
    }

    fn send_state(&self, state: &StateMap) -> Result<()> {
        let Some(comm) = self.open_comm() else {
            return Ok(());
        };

        let encoded = encode_state(state)?;
        let buffers: Vec<Buffer> = encoded.buffers.iter().cloned().map(Buffer::from).collect();
        comm.send(
            json!({
                "method": "update",
                "state": encoded.state,
                "buffer_paths": encoded.buffer_paths_json(),
            }),
            Map::new(),
            &buffers,
        )
    }

    fn open_comm(&self) -> Option<Rc<Comm>> {
        let comm = self.comm()?;
        if comm.is_closed() {
            debug!(comm_id = %comm.comm_id(), "comm is closed; not syncing widget state");
            return None;
        }
        Some(comm)
    }
}

/// Package tag: the first segment of a declared origin.
pub fn package_tag(package: &str) -> &str {
    package
        .split(['.', ':'])
        .next()
        .unwrap_or(package)
}

/// Every widget construction goes through here so registered hooks see it,
/// including children built inside another widget's constructor.
#[derive(Clone, Default)]
pub struct WidgetFactory {
    hooks: Rc<RefCell<Vec<ConstructHook>>>,
}

impl WidgetFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_widget_constructed<F>(&self, hook: F)
    where
        F: Fn(&Widget) -> Result<()> + 'static,
    {
        self.hooks.borrow_mut().push(Rc::new(hook));
    }

    pub fn create(&self, spec: WidgetSpec) -> Result<Widget> {
        let widget = Widget::from_spec(spec);
        let hooks = self.hooks.borrow().clone();
        for hook in hooks {
            hook(&widget)?;
        }
        Ok(widget)
    }
}
