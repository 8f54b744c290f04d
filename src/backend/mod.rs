//! Transport backend seam.
//!
//! The core demands little of its transport: FIFO delivery per sender,
//! uniform total order inside a primary configuration, and view-change
//! notifications delivered inline with messages. Everything else (sockets,
//! TLS handshaking, the membership consensus itself) lives behind these
//! traits. The `dummy` backend is the in-process reference transport; the
//! `spread` and `gcomm` schemes name external drivers that are not linked
//! into this build.

pub mod dummy;
pub mod tls;

use crate::core::error::{GcsError, GcsResult};
use bytes::Bytes;
use std::sync::Arc;
use uuid::Uuid;

/// Stable member identity, as announced by the transport view.
pub type MemberId = String;

/// A view-change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewEvent {
    /// Configuration id; -1 for a non-primary view.
    pub conf_id: i64,
    /// Whether the view has quorum.
    pub primary: bool,
    /// Member ids in configuration order.
    pub members: Vec<MemberId>,
    /// Index of the receiving member, -1 when absent.
    pub my_idx: i64,
    /// Transport-provided identity for groups with no history yet.
    pub view_uuid: Uuid,
}

/// An event delivered by the transport, in total order.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// An elementary message.
    Message {
        /// Sender identity.
        sender: MemberId,
        /// Message bytes.
        payload: Bytes,
    },
    /// A membership change.
    View(ViewEvent),
    /// The transport is gone; no further events will arrive.
    Closed,
}

/// Broadcast half of a backend connection. Shared across threads.
pub trait BackendSender: Send + Sync {
    /// Broadcast one message to the group, self included.
    fn send(&self, msg: Bytes) -> GcsResult<usize>;

    /// Leave the group gracefully.
    fn close(&self);
}

/// Receive half of a backend connection; drained by the dispatch thread.
pub trait BackendReceiver: Send {
    /// Block until the next event. Returns [`BackendEvent::Closed`] once
    /// the transport is gone.
    fn recv(&mut self) -> BackendEvent;
}

/// An established backend connection.
pub struct BackendConn {
    /// This member's identity on the channel.
    pub local_id: MemberId,
    /// Broadcast half.
    pub sender: Arc<dyn BackendSender>,
    /// Receive half.
    pub receiver: Box<dyn BackendReceiver>,
}

/// Recognized backend schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// In-process reference transport.
    Dummy,
    /// Spread toolkit driver (external).
    Spread,
    /// gcomm driver (external).
    Gcomm,
}

/// A parsed backend URL of the form `scheme://address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendUrl {
    /// Transport scheme.
    pub scheme: Scheme,
    /// Scheme-specific address; may be empty.
    pub address: String,
}

impl BackendUrl {
    /// Parse a `scheme://address` string.
    pub fn parse(url: &str) -> GcsResult<Self> {
        let (scheme, address) = url
            .split_once("://")
            .ok_or_else(|| GcsError::InvalidUrl(url.to_string()))?;
        let scheme = match scheme {
            "dummy" => Scheme::Dummy,
            "spread" => Scheme::Spread,
            "gcomm" => Scheme::Gcomm,
            _ => return Err(GcsError::UnsupportedScheme(scheme.to_string())),
        };
        Ok(Self {
            scheme,
            address: address.to_string(),
        })
    }
}

/// Connect to `channel` through the transport named by `url`.
pub fn connect(url: &BackendUrl, channel: &str) -> GcsResult<BackendConn> {
    match url.scheme {
        Scheme::Dummy => dummy::connect(&url.address, channel),
        Scheme::Spread => Err(GcsError::BackendUnavailable("spread driver not linked")),
        Scheme::Gcomm => Err(GcsError::BackendUnavailable("gcomm driver not linked")),
    }
}
