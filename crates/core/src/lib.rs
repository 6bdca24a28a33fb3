//! Core service logic: the UDP announcer, the TCP acceptor with admission
//! control, the per-connection protocol state machine, the session
//! batcher, and the processor pipeline dispatcher.
//!
//! # Mental model
//!
//! One [`acceptor::Acceptor`] owns the listening socket and spawns a
//! connection task per client. Each connection task waits on the shared
//! [`admission::AdmissionController`] before reading anything, runs the
//! state machine in [`connection`], and feeds flushed transactions from
//! its [`session::SessionBatcher`] into a per-session
//! [`session::SessionCommitChain`], which dispatches them to the shared
//! [`pipeline::PipelineDispatcher`] in order. The [`announcer::Announcer`]
//! runs independently of all of this, on its own UDP socket.

pub mod acceptor;
pub mod admission;
pub mod announcer;
pub mod connection;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod transaction;

pub use error::{Result, ServiceError};
