//! The narrow surface this crate needs from the host's reactive graph and
//! session transport. Everything runs on one thread; callbacks are plain
//! boxed closures.

use crate::dependencies::StaticMount;
use crate::error::Result;
use std::rc::Rc;

pub type Callback = Box<dyn FnOnce()>;
pub type InputHandler = Box<dyn Fn(&str)>;

/// One connected client.
pub trait Session {
    fn id(&self) -> &str;

    /// Module sessions point at the session they were created from.
    fn parent(&self) -> Option<Rc<dyn Session>> {
        None
    }

    fn is_ended(&self) -> bool;

    fn send_custom_message(&self, msg_type: &str, text: String) -> Result<()>;

    /// Run at the end of the current flush cycle.
    fn on_flush(&self, callback: Callback);

    /// Run after every `on_flush` callback of the current cycle has run.
    fn on_flushed(&self, callback: Callback);

    fn on_ended(&self, callback: Callback);

    /// Subscribe to a client input carrying text.
    fn on_input(&self, name: &str, handler: InputHandler);

    fn mount_static(&self, mount: StaticMount);

    /// URL prefix under which mounted dependencies are served.
    fn lib_prefix(&self) -> &str {
        "lib"
    }
}

/// One run of a reactive computation.
pub trait Computation {
    fn id(&self) -> u64;

    fn invalidate(&self);

    fn is_invalidated(&self) -> bool;

    /// Run once when this run is invalidated; runs immediately if it already was.
    fn on_invalidate(&self, callback: Callback);
}

pub trait Host {
    fn current_session(&self) -> Option<Rc<dyn Session>>;

    fn current_computation(&self) -> Option<Rc<dyn Computation>>;
}

pub fn root_session(session: Rc<dyn Session>) -> Rc<dyn Session> {
    let mut current = session;
    while let Some(parent) = current.parent() {
        current = parent;
    }
    current
}
