//! Explicit handler registry for incoming messages.

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::rpc::message::{Message, MessageKind};

pub type EventHandler = Box<dyn FnMut(&Message) + Send>;
pub type FunctionHandler = Box<dyn FnMut(&Message) -> Result<Value, String> + Send>;

/// Outcome of [`Registry::dispatch`].
#[derive(Debug, PartialEq)]
pub enum Dispatch {
    /// Event handlers ran.
    Handled,
    /// A function ran; send this `return` message back.
    Reply(Message),
    /// Nothing is registered for the name.
    Unhandled,
}

/// Routes named messages to callbacks.
#[derive(Default)]
pub struct Registry {
    events: HashMap<String, Vec<EventHandler>>,
    functions: HashMap<String, FunctionHandler>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler for `ev` messages called `name`. Handlers run in registration order.
    pub fn on_event<F>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: FnMut(&Message) + Send + 'static,
    {
        self.events.entry(name.into()).or_default().push(Box::new(handler));
        self
    }

    /// Set the handler for `fn` messages called `name`, replacing any earlier one.
    pub fn on_function<F>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: FnMut(&Message) -> Result<Value, String> + Send + 'static,
    {
        let name = name.into();
        if self.functions.insert(name.clone(), Box::new(handler)).is_some() {
            tracing::warn!(name = %name, "Replaced function handler");
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.functions.is_empty()
    }

    pub fn dispatch(&mut self, msg: &Message) -> Dispatch {
        match msg.kind {
            MessageKind::Event => match self.events.get_mut(&msg.name) {
                Some(handlers) => {
                    for handler in handlers.iter_mut() {
                        handler(msg);
                    }
                    Dispatch::Handled
                }
                None => {
                    tracing::debug!(name = %msg.name, "No event handler");
                    Dispatch::Unhandled
                }
            },
            MessageKind::Function => match self.functions.get_mut(&msg.name) {
                Some(handler) => {
                    let (success, result) = match handler(msg) {
                        Ok(value) => (true, value),
                        Err(e) => (false, Value::String(e)),
                    };
                    Dispatch::Reply(return_message(&msg.name, &msg.id, success, result))
                }
                None => {
                    tracing::debug!(name = %msg.name, id = %msg.id, "No function handler");
                    Dispatch::Unhandled
                }
            },
        }
    }
}

/// `return` message answering call `id` of function `name`.
pub fn return_message(name: &str, id: &str, success: bool, result: Value) -> Message {
    Message::event("return", vec![json!(name), json!(id), json!(success), result])
}
