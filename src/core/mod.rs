//! Core infrastructure: configuration, errors, sequence numbers.

pub mod config;
pub mod error;
pub mod seqno;
