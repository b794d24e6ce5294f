//! Request, reply and notification envelopes
//!
//! Every request carries an `id` chosen by the client; the device answers with a
//! [`Message::Reply`] carrying the same id. [`Message::Notify`] is unsolicited and
//! only sent for paths the client subscribed to.

use serde::{Deserialize, Serialize};

use crate::{Element, ErrorCode, TreePath};

/// Protocol message enum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Resolve a single element
    GetElement { id: u32, path: TreePath },

    /// List the direct children of an element
    GetDirectory { id: u32, path: TreePath },

    /// Ask for push notifications on an element
    Subscribe { id: u32, path: TreePath },

    /// Stop push notifications on an element
    Unsubscribe { id: u32, path: TreePath },

    /// Connect sources to a matrix target
    MatrixConnect {
        id: u32,
        path: TreePath,
        target: u32,
        sources: Vec<u32>,
    },

    /// Reply to a request
    Reply { id: u32, body: ReplyBody },

    /// Push notification for a subscribed element
    Notify { element: Element },
}

/// Reply payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReplyBody {
    Element(Element),
    Directory {
        parent: Element,
        children: Vec<Element>,
    },
    Ack,
    Error {
        code: u16,
        message: String,
    },
}

impl ReplyBody {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ReplyBody::Error {
            code: code as u16,
            message: message.into(),
        }
    }
}

impl Message {
    /// Request id, for requests and replies
    pub fn request_id(&self) -> Option<u32> {
        match self {
            Message::GetElement { id, .. }
            | Message::GetDirectory { id, .. }
            | Message::Subscribe { id, .. }
            | Message::Unsubscribe { id, .. }
            | Message::MatrixConnect { id, .. }
            | Message::Reply { id, .. } => Some(*id),
            Message::Notify { .. } => None,
        }
    }

    /// Human readable message type
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::GetElement { .. } => "GET_ELEMENT",
            Message::GetDirectory { .. } => "GET_DIRECTORY",
            Message::Subscribe { .. } => "SUBSCRIBE",
            Message::Unsubscribe { .. } => "UNSUBSCRIBE",
            Message::MatrixConnect { .. } => "MATRIX_CONNECT",
            Message::Reply { .. } => "REPLY",
            Message::Notify { .. } => "NOTIFY",
        }
    }
}
