//! Horde Core
//!
//! Core types shared by the miner and the executor.
//!
//! This crate contains:
//! - Domain types: accepted jobs, validators and the job result model
//! - Protocol: the closed message catalog exchanged between miner and executor

pub mod domain;
pub mod protocol;
