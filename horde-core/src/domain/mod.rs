//! Core domain types
//!
//! The miner persists `AcceptedJob` and `Validator`; the executor produces
//! `ExecutionResult`, `JobResult` and `JobError`. Nothing here talks to a
//! database or a socket.

pub mod job;
pub mod result;
pub mod validator;
