use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("widgets must be constructed within an active session")]
    NoActiveSession,

    #[error("no active reactive computation; reactive reads must happen inside one")]
    NoActiveContext,

    #[error(
        "the '{name}' attribute of {widget_type} is not a widget trait, and so it's not possible \
         to reactively read it; call `trait_names()` for a list of widget traits"
    )]
    UnknownTrait { widget_type: String, name: String },

    #[error("{value} is not JSON serializable")]
    NotSerializable { value: String },

    #[error("buffer {index} is not contiguous")]
    NonContiguousBuffer { index: usize },

    #[error("invalid buffer path {path}: {reason}")]
    BufferPath { path: String, reason: String },

    #[error("session {0} has ended; widget messages can no longer be sent")]
    SessionEnded(String),

    #[error("{}", unsupported_message(.type_name, .package, .has_html_repr))]
    UnsupportedValue {
        type_name: String,
        package: String,
        has_html_repr: bool,
    },

    #[error("failed to coerce {value} into a {target}: {message}")]
    Coercion {
        value: String,
        target: String,
        message: String,
    },

    #[error("invalid comm message: {0}")]
    InvalidMessage(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Base64(#[from] base64::DecodeError),
}

fn unsupported_message(type_name: &str, package: &str, has_html_repr: &bool) -> String {
    let mut msg = format!("don't know how to coerce {type_name} (from package '{package}') into a widget");
    if *has_html_repr {
        msg.push_str(
            "; it has an HTML representation, so try displaying it through a regular UI output instead",
        );
    }
    msg
}
