//! Typed remote operations.
//!
//! Calls name an operation registered on the host instead of shipping code.
//! Each [`RemoteOperation`] pins the operation's name and the shape of its
//! parameters and output, so both sides agree at compile time.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

/// A named operation the host knows how to run.
pub trait RemoteOperation: Send + Sync + 'static {
    /// Name carried in [`CallRequest::code`](crate::CallRequest::code).
    const NAME: &'static str;
    /// Parameters sent by the caller.
    type Params: Serialize + DeserializeOwned + Send + 'static;
    /// Value returned by the host.
    type Output: Serialize + DeserializeOwned + Send + 'static;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
enum FunctionRefKind {
    #[serde(rename = "function-ref")]
    FunctionRef,
}

/// Reference to a function pre-registered in the host's function table.
///
/// Encoded as `{ "kind": "function-ref", "id": "<name>" }`. The host looks
/// the id up instead of guessing whether a string is code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionRef {
    kind: FunctionRefKind,
    /// Registered function name.
    pub id: String,
}

impl FunctionRef {
    /// Reference the function registered under `id`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            kind: FunctionRefKind::FunctionRef,
            id: id.into(),
        }
    }
}

/// Parameters naming a single durable key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyParams {
    pub key: String,
}

/// Read the durable value stored under a key.
///
/// Produces nothing when the key is empty or unset.
#[derive(Debug, Clone, Copy)]
pub struct GetValue;

impl RemoteOperation for GetValue {
    const NAME: &'static str = "storage.get";
    type Params = KeyParams;
    type Output = Value;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetValueParams {
    pub key: String,
    pub value: Value,
}

/// Replace the durable value stored under a key. Returns the written value.
#[derive(Debug, Clone, Copy)]
pub struct SetValue;

impl RemoteOperation for SetValue {
    const NAME: &'static str = "storage.set";
    type Params = SetValueParams;
    type Output = Value;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateValueParams {
    pub key: String,
    /// Host transform applied to the current durable value.
    pub transform: FunctionRef,
    /// Value to transform when nothing is stored yet.
    pub initial_value: Value,
}

/// Read-modify-write a durable value entirely on the host.
///
/// Produces the written value, or nothing if the transform declined.
#[derive(Debug, Clone, Copy)]
pub struct UpdateValue;

impl RemoteOperation for UpdateValue {
    const NAME: &'static str = "storage.update";
    type Params = UpdateValueParams;
    type Output = Value;
}

/// Delete the durable value stored under a key. Returns whether it existed.
#[derive(Debug, Clone, Copy)]
pub struct DeleteValue;

impl RemoteOperation for DeleteValue {
    const NAME: &'static str = "storage.delete";
    type Params = KeyParams;
    type Output = bool;
}

/// List every durable key of the plugin installation.
#[derive(Debug, Clone, Copy)]
pub struct ListKeys;

impl RemoteOperation for ListKeys {
    const NAME: &'static str = "storage.keys";
    type Params = ();
    type Output = Vec<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveNodeTargetParams {
    pub resolver: FunctionRef,
    #[serde(default)]
    pub params: Value,
}

/// Run a node-target resolver on the host and return its raw output.
#[derive(Debug, Clone, Copy)]
pub struct ResolveNodeTarget;

impl RemoteOperation for ResolveNodeTarget {
    const NAME: &'static str = "node_target.resolve";
    type Params = ResolveNodeTargetParams;
    type Output = Value;
}
