//! In-process host: a session with an explicit flush loop and an outbox, and
//! computations with one-shot invalidation. Used to drive the bridge without
//! a real transport.

use crate::dependencies::StaticMount;
use crate::error::{BridgeError, Result};
use crate::host::{Callback, Computation, Host, InputHandler, Session};
use crate::protocol::{CommEnvelope, MsgType, decode_envelope};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_COMPUTATION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub msg_type: String,
    pub text: String,
}

impl SentMessage {
    pub fn kind(&self) -> Option<MsgType> {
        MsgType::from_custom_message_type(&self.msg_type)
    }

    pub fn envelope(&self) -> Result<CommEnvelope> {
        decode_envelope(&self.text)
    }
}

#[derive(Default)]
struct SessionState {
    ended: bool,
    flush: Vec<Callback>,
    flushed: Vec<Callback>,
    ended_callbacks: Vec<Callback>,
    inputs: HashMap<String, Vec<Rc<dyn Fn(&str)>>>,
    outbox: Vec<SentMessage>,
    mounts: Vec<StaticMount>,
}

pub struct LocalSession {
    id: String,
    parent: Option<Rc<dyn Session>>,
    state: RefCell<SessionState>,
}

impl LocalSession {
    pub fn new(id: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            id: id.into(),
            parent: None,
            state: RefCell::new(SessionState::default()),
        })
    }

    pub fn child_of(parent: Rc<dyn Session>, id: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            id: id.into(),
            parent: Some(parent),
            state: RefCell::new(SessionState::default()),
        })
    }

    /// Run this cycle's `on_flush` callbacks (including ones they queue),
    /// then its `on_flushed` callbacks.
    pub fn flush(&self) {
        loop {
            let batch = std::mem::take(&mut self.state.borrow_mut().flush);
            if batch.is_empty() {
                break;
            }
            for callback in batch {
                callback();
            }
        }

        let flushed = std::mem::take(&mut self.state.borrow_mut().flushed);
        for callback in flushed {
            callback();
        }
    }

    /// Client disconnected: pending flush work is dropped, then `on_ended`
    /// callbacks run with the session already marked ended.
    pub fn end(&self) {
        let callbacks = {
            let mut state = self.state.borrow_mut();
            if state.ended {
                return;
            }
            state.ended = true;
            state.flush.clear();
            state.flushed.clear();
            std::mem::take(&mut state.ended_callbacks)
        };

        for callback in callbacks {
            callback();
        }
    }

    /// Deliver client input text to subscribers.
    pub fn set_input(&self, name: &str, text: &str) {
        let handlers = self
            .state
            .borrow()
            .inputs
            .get(name)
            .cloned()
            .unwrap_or_default();

        for handler in handlers {
            handler(text);
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.state.borrow().outbox.clone()
    }

    pub fn take_sent(&self) -> Vec<SentMessage> {
        std::mem::take(&mut self.state.borrow_mut().outbox)
    }

    pub fn mounts(&self) -> Vec<StaticMount> {
        self.state.borrow().mounts.clone()
    }

    pub fn input_subscribers(&self, name: &str) -> usize {
        self.state.borrow().inputs.get(name).map(Vec::len).unwrap_or(0)
    }
}

impl Session for LocalSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn parent(&self) -> Option<Rc<dyn Session>> {
        self.parent.clone()
    }

    fn is_ended(&self) -> bool {
        self.state.borrow().ended
    }

    fn send_custom_message(&self, msg_type: &str, text: String) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.ended {
            return Err(BridgeError::SessionEnded(self.id.clone()));
        }
        state.outbox.push(SentMessage {
            msg_type: msg_type.to_string(),
            text,
        });
        Ok(())
    }

    fn on_flush(&self, callback: Callback) {
        self.state.borrow_mut().flush.push(callback);
    }

    fn on_flushed(&self, callback: Callback) {
        self.state.borrow_mut().flushed.push(callback);
    }

    fn on_ended(&self, callback: Callback) {
        let ended = self.state.borrow().ended;
        if ended {
            callback();
        } else {
            self.state.borrow_mut().ended_callbacks.push(callback);
        }
    }

    fn on_input(&self, name: &str, handler: InputHandler) {
        self.state
            .borrow_mut()
            .inputs
            .entry(name.to_string())
            .or_default()
            .push(Rc::from(handler));
    }

    fn mount_static(&self, mount: StaticMount) {
        self.state.borrow_mut().mounts.push(mount);
    }
}

pub struct LocalComputation {
    id: u64,
    invalidated: Cell<bool>,
    invalidations: Cell<usize>,
    callbacks: RefCell<Vec<Callback>>,
}

impl LocalComputation {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            id: NEXT_COMPUTATION_ID.fetch_add(1, Ordering::Relaxed),
            invalidated: Cell::new(false),
            invalidations: Cell::new(0),
            callbacks: RefCell::new(Vec::new()),
        })
    }

    /// How many times `invalidate` actually fired (at most once per run).
    pub fn invalidation_count(&self) -> usize {
        self.invalidations.get()
    }
}

impl Computation for LocalComputation {
    fn id(&self) -> u64 {
        self.id
    }

    fn invalidate(&self) {
        if self.invalidated.replace(true) {
            return;
        }
        self.invalidations.set(self.invalidations.get() + 1);

        let callbacks = std::mem::take(&mut *self.callbacks.borrow_mut());
        for callback in callbacks {
            callback();
        }
    }

    fn is_invalidated(&self) -> bool {
        self.invalidated.get()
    }

    fn on_invalidate(&self, callback: Callback) {
        if self.invalidated.get() {
            callback();
        } else {
            self.callbacks.borrow_mut().push(callback);
        }
    }
}

/// Tracks which session and computation are current.
#[derive(Default)]
pub struct LocalHost {
    sessions: RefCell<Vec<Rc<dyn Session>>>,
    computations: RefCell<Vec<Rc<dyn Computation>>>,
}

impl LocalHost {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn with_session<R>(&self, session: Rc<dyn Session>, f: impl FnOnce() -> R) -> R {
        self.sessions.borrow_mut().push(session);
        let out = f();
        self.sessions.borrow_mut().pop();
        out
    }

    pub fn with_computation<R>(&self, computation: Rc<dyn Computation>, f: impl FnOnce() -> R) -> R {
        self.computations.borrow_mut().push(computation);
        let out = f();
        self.computations.borrow_mut().pop();
        out
    }
}

impl Host for LocalHost {
    fn current_session(&self) -> Option<Rc<dyn Session>> {
        self.sessions.borrow().last().cloned()
    }

    fn current_computation(&self) -> Option<Rc<dyn Computation>> {
        self.computations.borrow().last().cloned()
    }
}
