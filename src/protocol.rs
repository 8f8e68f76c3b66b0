use crate::error::{BridgeError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Comm target every widget channel is opened against.
pub const TARGET_NAME: &str = "jupyter.widgets";
/// Widget message protocol version, sent as open metadata.
pub const PROTOCOL_VERSION: &str = "2.1.0";
/// Input the client writes envelope text to.
pub const COMM_INPUT: &str = "widget_comm_send";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    Open,
    Msg,
    Close,
}

impl MsgType {
    pub fn custom_message_type(self) -> &'static str {
        match self {
            MsgType::Open => "widget_comm_open",
            MsgType::Msg => "widget_comm_msg",
            MsgType::Close => "widget_comm_close",
        }
    }

    pub fn from_custom_message_type(name: &str) -> Option<Self> {
        match name {
            "widget_comm_open" => Some(MsgType::Open),
            "widget_comm_msg" => Some(MsgType::Msg),
            "widget_comm_close" => Some(MsgType::Close),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommEnvelope {
    pub content: CommContent,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Base64 text; the transport has no binary frames.
    #[serde(default)]
    pub buffers: Vec<String>,
    #[serde(default)]
    pub ident: String,
    #[serde(default)]
    pub parent: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommContent {
    #[serde(default)]
    pub data: Value,
    pub comm_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CommEnvelope {
    pub fn comm_id(&self) -> &str {
        &self.content.comm_id
    }

    pub fn data(&self) -> &Value {
        &self.content.data
    }

    pub fn decoded_buffers(&self) -> Result<Vec<Vec<u8>>> {
        decode_buffers(&self.buffers)
    }
}

/// A binary payload handed to `open`/`send`. Only contiguous views can be
/// sent; a strided view whose stride differs from its item size is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Buffer {
    Bytes(Vec<u8>),
    Strided {
        data: Vec<u8>,
        item_size: usize,
        stride: usize,
    },
}

impl Buffer {
    pub fn contiguous(&self) -> Option<&[u8]> {
        match self {
            Buffer::Bytes(data) => Some(data),
            Buffer::Strided {
                data,
                item_size,
                stride,
            } if item_size == stride => Some(data),
            Buffer::Strided { .. } => None,
        }
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(value: Vec<u8>) -> Self {
        Buffer::Bytes(value)
    }
}

impl From<&[u8]> for Buffer {
    fn from(value: &[u8]) -> Self {
        Buffer::Bytes(value.to_vec())
    }
}

pub fn build_envelope(
    comm_id: &str,
    data: Value,
    metadata: Map<String, Value>,
    buffers: &[Buffer],
    extra: Map<String, Value>,
) -> Result<CommEnvelope> {
    let buffers = encode_buffers(buffers)?;

    Ok(CommEnvelope {
        content: CommContent {
            data,
            comm_id: comm_id.to_string(),
            extra,
        },
        metadata,
        buffers,
        ident: format!("comm-{comm_id}"),
        parent: Map::new(),
    })
}

pub fn encode_buffers(buffers: &[Buffer]) -> Result<Vec<String>> {
    buffers
        .iter()
        .enumerate()
        .map(|(index, buffer)| {
            buffer
                .contiguous()
                .map(|bytes| BASE64.encode(bytes))
                .ok_or(BridgeError::NonContiguousBuffer { index })
        })
        .collect()
}

pub fn decode_buffers(buffers: &[String]) -> Result<Vec<Vec<u8>>> {
    buffers
        .iter()
        .map(|text| BASE64.decode(text.as_bytes()).map_err(BridgeError::from))
        .collect()
}

pub fn encode_envelope(envelope: &CommEnvelope) -> Result<String> {
    serde_json::to_string(envelope).map_err(BridgeError::from)
}

pub fn decode_envelope(text: &str) -> Result<CommEnvelope> {
    serde_json::from_str(text).map_err(|err| BridgeError::InvalidMessage(err.to_string()))
}

pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
