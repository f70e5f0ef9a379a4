//! JSON message envelope.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::rpc::error::RpcError;

/// `"ev"` messages are fire-and-forget; `"fn"` messages expect a `return`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    #[default]
    #[serde(rename = "ev")]
    Event,
    #[serde(rename = "fn")]
    Function,
}

/// One named message: `{"name", "type", "id", "args"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default = "new_id")]
    pub id: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Random id, lowercase hex.
fn new_id() -> String {
    format!("{:x}", rand::random::<u32>())
}

impl Message {
    pub fn event(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            kind: MessageKind::Event,
            id: new_id(),
            args,
        }
    }

    pub fn function(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            kind: MessageKind::Function,
            ..Self::event(name, args)
        }
    }

    pub fn to_json(&self) -> Result<String, RpcError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, RpcError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Deserialize argument `index` as `T`.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, RpcError> {
        let value = self.args.get(index).ok_or_else(|| RpcError::BadArgument {
            index,
            reason: format!("only {} arguments", self.args.len()),
        })?;
        serde_json::from_value(value.clone()).map_err(|e| RpcError::BadArgument {
            index,
            reason: e.to_string(),
        })
    }
}
