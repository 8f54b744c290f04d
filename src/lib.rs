//! groupcast - virtually synchronous, totally ordered group communication.
//!
//! Participants join a named channel, broadcast opaque actions of
//! arbitrary size, and receive every delivered action in the same global
//! order with a monotonically increasing sequence number. The library
//! coordinates membership changes, state-transfer handshakes between a
//! joiner and a donor, flow control, and a per-node Total-Order monitor
//! that serializes application critical sections by seqno.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Application threads                         │
//! │     send │ repl │ recv │ state transfer │ TO monitor            │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Connection core                           │
//! │   fragmentation │ receive queue │ repl pairing │ flow control   │
//! │   group state machine │ state exchange │ member table           │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Transport backend                          │
//! │        total order │ per-sender FIFO │ view changes             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::error`] - Error types
//! - [`core::seqno`] - Sequence numbers and sentinels
//!
//! ## Actions
//! - [`act`] - Action kinds and delivered actions
//! - [`act::frag`] / [`act::defrag`] - Fragmentation codec
//! - [`act::conf`] - Configuration action wire record
//! - [`act::wire`] - Transport message envelope
//!
//! ## Connection
//! - [`conn`] - Public connection operations and dispatch thread
//! - [`conn::queue`] - Receive queue
//! - [`conn::repl`] - Pending replication tracking
//!
//! ## Group
//! - [`group`] - Connection states
//! - [`group::exchange`] - State exchange after a view change
//! - [`group::members`] - Member table and donor selection
//! - [`group::flow`] - Flow control
//!
//! ## Total order
//! - [`to`] - Seqno-gated critical section monitor
//!
//! ## Transport
//! - [`backend`] - Backend seam, URL parsing, dummy transport, TLS options
//!
//! ## Operations
//! - [`ops::logging`] - tracing subscriber setup
//! - [`ops::stats`] - Connection counters
//!
//! # Key Invariants
//!
//! - Global seqnos are gapless and identical on every member of a primary
//!   configuration.
//! - Local seqnos gaplessly number the ordered stream per connection.
//! - A CONF action precedes any ordered action of its configuration.
//! - At most one TO monitor slot is HOLDING at any time.

// Actions and codecs
pub mod act;

// Transport seam
pub mod backend;

// Connection lifecycle and public operations
pub mod conn;

// Core infrastructure
pub mod core;

// Group membership and configuration state
pub mod group;

// Operational concerns
pub mod ops;

// Total-Order monitor
pub mod to;

// Re-exports for convenience
pub use self::act::conf::ConfAction;
pub use self::act::{Action, ActionKind};
pub use self::backend::tls::TlsOptions;
pub use self::conn::{Connection, JoinStatus, ReplTicket, StateTransfer};
pub use self::core::config::{GcsConfig, LogOptions};
pub use self::core::error::{GcsError, GcsResult};
pub use self::core::seqno::{Seqno, SEQNO_FIRST, SEQNO_ILL, SEQNO_NIL};
pub use self::group::ConnState;
pub use self::to::TotalOrder;
