// Copyright 2024 Bridge Relay Contributors
// SPDX-License-Identifier: Apache-2.0

#![deny(unsafe_code)]
#![warn(missing_docs)]

//! # Bridge Relay Crate
//!
//! A relay daemon that moves deposits between bridged EVM chains. It
//! watches each configured chain's bridge contract for `Deposit` events,
//! translates them into chain-agnostic messages, routes every message to
//! the task owning its destination chain and executes it there as an
//! `executeProposal` transaction.
//!
//! The pipeline is made of four pieces:
//!
//! 1. **Listener**, one per chain: scans finalized blocks in bounded
//!    chunks, decodes deposits against the configured resource registry
//!    and persists a durable checkpoint once a chunk has been handed off.
//! 2. **Router**: an explicit registry of bounded per-destination queues.
//!    The bound is the pipeline's backpressure: a slow destination stalls
//!    its sources instead of growing memory.
//! 3. **Writer**, one per chain: drains its queue one message at a time,
//!    guards against double execution via the bridge's on-chain record
//!    and babysits each transaction to finality with fee-bumped
//!    resubmissions under a safe nonce discipline.
//! 4. **Connection**: the chain abstraction the above are generic over,
//!    implemented for EVM chains on top of an ethers signing client.
//!
//! Delivery is at-least-once end to end; the destination bridge's
//! executed-proposal guard turns that into effectively-once execution.

/// A module for the relay's configuration model and loader.
pub mod config;
/// A module abstracting a chain endpoint, plus its EVM implementation.
pub mod connection;
/// A module for managing the context of the relay process.
pub mod context;
/// Relay errors.
pub mod error;
/// A module that scans source chains for deposit events.
pub mod listener;
/// A module used for debugging relay lifecycle, sync state, or other relay state.
pub mod probe;
/// A module routing messages to their destination chain's writer.
pub mod router;
/// A module for starting the long-running chain tasks.
pub mod service;
/// A module for durable checkpoint storage.
pub mod store;
/// A module with the core data model: messages, payloads, proposals.
pub mod types;
/// A module that executes routed messages on destination chains.
pub mod writer;

#[cfg(test)]
pub mod test_utils;

pub use error::{Error, Result};
