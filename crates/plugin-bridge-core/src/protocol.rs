//! Wire protocol for calls between the UI and the host.
//!
//! Every frame is a JSON [`Envelope`]. Receivers ignore frames that do not
//! decode, so unrelated traffic on a shared channel is harmless.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Correlation id pairing a request with its reply.
pub type CallId = u64;

/// Plugin id that addresses any plugin.
pub const ANY_PLUGIN: &str = "*";

fn any_plugin() -> String {
    ANY_PLUGIN.to_string()
}

/// Deserialize a field that was present, keeping an explicit `null`.
///
/// Combined with `#[serde(default)]` this maps an absent field to `None`
/// and `null` to `Some(Value::Null)`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Deserialize an error message, dropping anything that is not a string.
fn message<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(message) => Some(message),
        _ => None,
    })
}

/// Outer frame carried on the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// The bridge message.
    pub plugin_message: PluginMessage,
    /// Target plugin id.
    #[serde(default = "any_plugin")]
    pub plugin_id: String,
}

impl Envelope {
    /// Wrap a message addressed to any plugin.
    #[must_use]
    pub fn new(plugin_message: PluginMessage) -> Self {
        Self {
            plugin_message,
            plugin_id: any_plugin(),
        }
    }

    /// Wrap a message addressed to a specific plugin.
    #[must_use]
    pub fn for_plugin(plugin_message: PluginMessage, plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_message,
            plugin_id: plugin_id.into(),
        }
    }

    /// Encode to a JSON text frame.
    ///
    /// # Errors
    /// Returns error if a carried value fails to serialize.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a JSON text frame.
    ///
    /// # Errors
    /// Returns error if the frame is not a bridge envelope.
    pub fn decode(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}

/// Message carried inside an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum PluginMessage {
    /// UI asks the host to run an operation.
    #[serde(rename = "EVAL")]
    Eval(CallRequest),
    /// Host reports success.
    #[serde(rename = "EVAL_RESULT")]
    EvalResult(CallSuccess),
    /// Host reports failure.
    #[serde(rename = "EVAL_REJECT")]
    EvalReject(CallFailure),
}

impl PluginMessage {
    /// Correlation id of the message.
    #[must_use]
    pub const fn id(&self) -> CallId {
        match self {
            Self::Eval(req) => req.id,
            Self::EvalResult(ok) => ok.id,
            Self::EvalReject(err) => err.id,
        }
    }

    /// Convert a reply message into a [`CallResponse`].
    ///
    /// Returns `None` for requests.
    #[must_use]
    pub fn into_response(self) -> Option<CallResponse> {
        match self {
            Self::Eval(_) => None,
            Self::EvalResult(ok) => Some(CallResponse::Success(ok)),
            Self::EvalReject(err) => Some(CallResponse::Failure(err)),
        }
    }
}

/// A single remote call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRequest {
    /// Correlation id, unique per caller.
    pub id: CallId,
    /// Name of the registered operation to run.
    pub code: String,
    /// JSON-encoded parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<String>,
}

impl CallRequest {
    /// Build a request, encoding `params` to a JSON string.
    ///
    /// # Errors
    /// Returns error if `params` fails to serialize.
    pub fn new<P>(id: CallId, code: impl Into<String>, params: Option<&P>) -> Result<Self, serde_json::Error>
    where
        P: Serialize + ?Sized,
    {
        let params = params.map(serde_json::to_string).transpose()?;
        Ok(Self {
            id,
            code: code.into(),
            params,
        })
    }
}

/// Successful reply. `result: None` means the operation produced nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSuccess {
    pub id: CallId,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
}

/// Failed reply. `error: None` means no message could be extracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFailure {
    pub id: CallId,
    #[serde(default, deserialize_with = "message")]
    pub error: Option<String>,
}

/// Reply to a [`CallRequest`].
#[derive(Debug, Clone, PartialEq)]
pub enum CallResponse {
    Success(CallSuccess),
    Failure(CallFailure),
}

impl CallResponse {
    /// Successful reply.
    #[must_use]
    pub const fn success(id: CallId, result: Option<Value>) -> Self {
        Self::Success(CallSuccess { id, result })
    }

    /// Failed reply.
    #[must_use]
    pub const fn failure(id: CallId, error: Option<String>) -> Self {
        Self::Failure(CallFailure { id, error })
    }

    /// Correlation id of the reply.
    #[must_use]
    pub const fn id(&self) -> CallId {
        match self {
            Self::Success(ok) => ok.id,
            Self::Failure(err) => err.id,
        }
    }

    /// Split into the result or the carried error message.
    ///
    /// # Errors
    /// Returns the failure's `error` field for a failed reply.
    pub fn into_result(self) -> Result<Option<Value>, Option<String>> {
        match self {
            Self::Success(ok) => Ok(ok.result),
            Self::Failure(err) => Err(err.error),
        }
    }
}

impl From<CallResponse> for PluginMessage {
    fn from(response: CallResponse) -> Self {
        match response {
            CallResponse::Success(ok) => Self::EvalResult(ok),
            CallResponse::Failure(err) => Self::EvalReject(err),
        }
    }
}
