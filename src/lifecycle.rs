//! Pairs every constructed widget with a comm on the current session, and
//! tears those comms down again when the session ends or a render slot is
//! replaced.

use crate::comm::{Comm, CommRegistry};
use crate::config::BridgeConfig;
use crate::dependencies::{DependencyResolver, extension_mount, output_binding_mount};
use crate::error::{BridgeError, Result};
use crate::host::{Computation, Host, Session, root_session};
use crate::protocol::{Buffer, COMM_INPUT, PROTOCOL_VERSION, TARGET_NAME, object};
use crate::serialize::encode_state;
use crate::widget::{Widget, WidgetFactory};
use serde_json::{Map, Value, json};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use tracing::{debug, warn};
use uuid::Uuid;

struct LifecycleInner {
    host: Rc<dyn Host>,
    registry: CommRegistry,
    resolver: DependencyResolver,
    /// Root session id to the widget ids opened on it. Presence means the
    /// session has been set up.
    sessions: RefCell<HashMap<String, Vec<String>>>,
    /// Ids constructed while each nested render is running.
    render_scopes: RefCell<Vec<Vec<String>>>,
}

#[derive(Clone)]
pub struct WidgetLifecycle {
    inner: Rc<LifecycleInner>,
}

impl WidgetLifecycle {
    pub fn new(host: Rc<dyn Host>, registry: CommRegistry, config: BridgeConfig) -> Self {
        Self {
            inner: Rc::new(LifecycleInner {
                host,
                registry,
                resolver: DependencyResolver::new(config),
                sessions: RefCell::new(HashMap::new()),
                render_scopes: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Hook into every widget `factory` builds from now on.
    pub fn install(&self, factory: &WidgetFactory) {
        let weak = Rc::downgrade(&self.inner);
        factory.on_widget_constructed(move |widget| match weak.upgrade() {
            Some(inner) => WidgetLifecycle { inner }.on_widget_constructed(widget),
            None => Ok(()),
        });
    }

    pub fn host(&self) -> Rc<dyn Host> {
        self.inner.host.clone()
    }

    pub fn registry(&self) -> &CommRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &BridgeConfig {
        self.inner.resolver.config()
    }

    pub fn session_widgets(&self, session_id: &str) -> Vec<String> {
        self.inner
            .sessions
            .borrow()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn on_widget_constructed(&self, widget: &Widget) -> Result<()> {
        let session = self
            .inner
            .host
            .current_session()
            .ok_or(BridgeError::NoActiveSession)?;
        let session = root_session(session);
        let session_id = session.id().to_string();

        let first_widget = !self.inner.sessions.borrow().contains_key(&session_id);
        if first_widget {
            self.setup_session(&session);
        }

        let dependency = self
            .inner
            .resolver
            .require_dependency(widget, session.lib_prefix());

        let model_id = match widget.model_id() {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().simple().to_string();
                widget.set_model_id(id.clone());
                id
            }
        };

        let encoded = encode_state(&widget.get_state())?;
        let buffers: Vec<Buffer> = encoded.buffers.iter().cloned().map(Buffer::from).collect();
        let html_deps: Vec<Value> = dependency
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<_, _>>()?;

        let comm = Comm::new(
            &model_id,
            TARGET_NAME,
            session.clone(),
            self.inner.registry.clone(),
        );
        comm.open(
            json!({
                "state": encoded.state,
                "buffer_paths": encoded.buffer_paths_json(),
            }),
            object(json!({ "version": PROTOCOL_VERSION })),
            &buffers,
            object(json!({ "html_deps": html_deps })),
        )?;
        widget.attach_comm(comm);

        if let Some(mount) = dependency.as_ref().and_then(extension_mount) {
            session.mount_static(mount);
        }

        self.inner
            .sessions
            .borrow_mut()
            .entry(session_id)
            .or_default()
            .push(model_id.clone());

        if let Some(scope) = self.inner.render_scopes.borrow_mut().last_mut() {
            scope.push(model_id);
        }

        Ok(())
    }

    /// Run `f` and report the ids of every widget constructed while it ran.
    pub fn with_render_scope<R>(&self, f: impl FnOnce() -> R) -> (R, Vec<String>) {
        self.inner.render_scopes.borrow_mut().push(Vec::new());
        let out = f();
        let constructed = self
            .inner
            .render_scopes
            .borrow_mut()
            .pop()
            .unwrap_or_default();
        (out, constructed)
    }

    /// Close `model_id` the next time `ctx` is invalidated.
    pub fn close_on_invalidate(&self, model_id: &str, ctx: &Rc<dyn Computation>) {
        let registry = self.inner.registry.clone();
        let model_id = model_id.to_string();
        ctx.on_invalidate(Box::new(move || close_registered(&registry, &model_id)));
    }

    /// Close a registered widget now. Unknown ids are ignored.
    pub fn close_widget(&self, model_id: &str) {
        close_registered(&self.inner.registry, model_id);
    }

    fn setup_session(&self, session: &Rc<dyn Session>) {
        let session_id = session.id().to_string();
        self.inner
            .sessions
            .borrow_mut()
            .insert(session_id.clone(), Vec::new());

        session.mount_static(output_binding_mount(self.config()));

        let registry = self.inner.registry.clone();
        session.on_input(COMM_INPUT, Box::new(move |text| registry.route(text)));

        let weak: Weak<LifecycleInner> = Rc::downgrade(&self.inner);
        session.on_ended(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                WidgetLifecycle { inner }.teardown_session(&session_id);
            }
        }));
    }

    fn teardown_session(&self, session_id: &str) {
        let widgets = self
            .inner
            .sessions
            .borrow_mut()
            .remove(session_id)
            .unwrap_or_default();

        debug!(session_id, count = widgets.len(), "closing widgets for ended session");
        for model_id in widgets {
            close_registered(&self.inner.registry, &model_id);
        }
    }
}

/// Already-closed or unknown ids are skipped.
fn close_registered(registry: &CommRegistry, model_id: &str) {
    let Some(comm) = registry.get(model_id) else {
        return;
    };
    if let Err(err) = comm.close(None, Map::new(), false) {
        warn!(model_id, "failed to close widget comm: {err}");
    }
}
