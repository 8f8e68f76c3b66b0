//! Per-widget comm channels and the registry that routes client messages to
//! them.

use crate::error::{BridgeError, Result};
use crate::host::Session;
use crate::protocol::{Buffer, CommEnvelope, MsgType, build_envelope, decode_envelope, encode_envelope};
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, warn};

pub type MsgCallback = Rc<dyn Fn(&CommEnvelope)>;

struct CommState {
    opened: bool,
    closed: bool,
    close_data: Value,
    msg_callback: Option<MsgCallback>,
    close_callback: Option<MsgCallback>,
}

pub struct Comm {
    comm_id: String,
    target_name: String,
    session: Rc<dyn Session>,
    registry: CommRegistry,
    state: RefCell<CommState>,
}

impl fmt::Debug for Comm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Comm")
            .field("comm_id", &self.comm_id)
            .field("target_name", &self.target_name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Comm {
    pub fn new(
        comm_id: &str,
        target_name: &str,
        session: Rc<dyn Session>,
        registry: CommRegistry,
    ) -> Rc<Self> {
        Rc::new(Self {
            comm_id: comm_id.to_string(),
            target_name: target_name.to_string(),
            session,
            registry,
            state: RefCell::new(CommState {
                opened: false,
                closed: false,
                close_data: Value::Object(Map::new()),
                msg_callback: None,
                close_callback: None,
            }),
        })
    }

    pub fn comm_id(&self) -> &str {
        &self.comm_id
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn session(&self) -> Rc<dyn Session> {
        self.session.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    /// True once an `open` has been published.
    pub fn is_open(&self) -> bool {
        let state = self.state.borrow();
        state.opened && !state.closed
    }

    /// Payload sent by a `close` that carries no data of its own.
    pub fn set_close_data(&self, data: Value) {
        self.state.borrow_mut().close_data = data;
    }

    /// Registers, then publishes `open`. A failed publish leaves the
    /// registry as it was.
    pub fn open(
        self: &Rc<Self>,
        data: Value,
        metadata: Map<String, Value>,
        buffers: &[Buffer],
        extra: Map<String, Value>,
    ) -> Result<()> {
        self.registry.register(self.clone());

        let mut extra = extra;
        extra.insert("target_name".into(), Value::String(self.target_name.clone()));
        extra.entry("target_module").or_insert(Value::Null);

        if let Err(err) = self.publish(MsgType::Open, data, metadata, buffers, extra) {
            self.registry.unregister(&self.comm_id);
            return Err(err);
        }

        let mut state = self.state.borrow_mut();
        state.opened = true;
        state.closed = false;
        Ok(())
    }

    /// Dropped unless the comm is open.
    pub fn send(&self, data: Value, metadata: Map<String, Value>, buffers: &[Buffer]) -> Result<()> {
        if !self.is_open() {
            debug!(comm_id = %self.comm_id, "dropping message for comm that is not open");
            return Ok(());
        }
        self.publish(MsgType::Msg, data, metadata, buffers, Map::new())
    }

    /// Only the first call does anything. `deleting` leaves the registry
    /// untouched. A comm that never opened sends nothing.
    pub fn close(&self, data: Option<Value>, metadata: Map<String, Value>, deleting: bool) -> Result<()> {
        let (opened, close_data) = {
            let mut state = self.state.borrow_mut();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            (state.opened, state.close_data.clone())
        };

        let result = if !opened {
            debug!(comm_id = %self.comm_id, "comm never opened; skipping close message");
            Ok(())
        } else if self.session.is_ended() {
            debug!(comm_id = %self.comm_id, "session ended; skipping close message");
            Ok(())
        } else {
            self.publish(
                MsgType::Close,
                data.unwrap_or(close_data),
                metadata,
                &[],
                Map::new(),
            )
        };

        if !deleting {
            self.registry.unregister(&self.comm_id);
        }
        result
    }

    /// Replaces any previous callback.
    pub fn on_msg<F>(&self, callback: F)
    where
        F: Fn(&CommEnvelope) + 'static,
    {
        self.state.borrow_mut().msg_callback = Some(Rc::new(callback));
    }

    pub fn on_close<F>(&self, callback: F)
    where
        F: Fn(&CommEnvelope) + 'static,
    {
        self.state.borrow_mut().close_callback = Some(Rc::new(callback));
    }

    pub fn handle_msg(&self, envelope: &CommEnvelope) {
        let callback = self.state.borrow().msg_callback.clone();
        if let Some(callback) = callback {
            callback(envelope);
        }
    }

    pub fn handle_close(&self, envelope: &CommEnvelope) {
        let callback = self.state.borrow().close_callback.clone();
        if let Some(callback) = callback {
            callback(envelope);
        }
    }

    /// The envelope is built now, so bad buffers fail here. The transport
    /// send runs at the end of the cycle; `close` runs after every other
    /// message of the cycle has gone out.
    fn publish(
        &self,
        msg_type: MsgType,
        data: Value,
        metadata: Map<String, Value>,
        buffers: &[Buffer],
        extra: Map<String, Value>,
    ) -> Result<()> {
        let data = if data.is_null() {
            Value::Object(Map::new())
        } else {
            data
        };
        let envelope = build_envelope(&self.comm_id, data, metadata, buffers, extra)?;
        let text = encode_envelope(&envelope)?;

        if self.session.is_ended() {
            return Err(BridgeError::SessionEnded(self.session.id().to_string()));
        }

        let session = self.session.clone();
        let comm_id = self.comm_id.clone();
        let send = Box::new(move || {
            if let Err(err) = session.send_custom_message(msg_type.custom_message_type(), text) {
                warn!(
                    comm_id = %comm_id,
                    msg_type = msg_type.custom_message_type(),
                    "failed to send widget message: {err}"
                );
            }
        });

        match msg_type {
            MsgType::Close => self.session.on_flushed(send),
            MsgType::Open | MsgType::Msg => self.session.on_flush(send),
        }
        Ok(())
    }
}

/// Open comms by id, shared by every session.
#[derive(Clone, Default)]
pub struct CommRegistry {
    comms: Rc<RefCell<HashMap<String, Rc<Comm>>>>,
}

impl CommRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, comm: Rc<Comm>) {
        self.comms.borrow_mut().insert(comm.comm_id().to_string(), comm);
    }

    pub fn unregister(&self, comm_id: &str) -> Option<Rc<Comm>> {
        self.comms.borrow_mut().remove(comm_id)
    }

    pub fn get(&self, comm_id: &str) -> Option<Rc<Comm>> {
        self.comms.borrow().get(comm_id).cloned()
    }

    pub fn contains(&self, comm_id: &str) -> bool {
        self.comms.borrow().contains_key(comm_id)
    }

    pub fn len(&self) -> usize {
        self.comms.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.comms.borrow().is_empty()
    }

    /// Hand an inbound envelope to its comm. Unknown ids are stale and dropped.
    pub fn dispatch(&self, envelope: &CommEnvelope) {
        match self.get(envelope.comm_id()) {
            Some(comm) => comm.handle_msg(envelope),
            None => debug!(comm_id = %envelope.comm_id(), "dropping message for unknown comm"),
        }
    }

    /// Entry point for the client's comm input text.
    pub fn route(&self, text: &str) {
        match decode_envelope(text) {
            Ok(envelope) => self.dispatch(&envelope),
            Err(err) => warn!("ignoring malformed widget message: {err}"),
        }
    }
}
