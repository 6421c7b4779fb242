// Copyright 2024 Bridge Relay Contributors
// SPDX-License-Identifier: Apache-2.0

use derive_more::Display;

/// The `tracing` target used for machine-parsable probe events.
pub const TARGET: &str = "relay_probe";

/// The Kind of the Probe.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// When the Lifecycle of the Relay changes, like starting or shutting down.
    #[display(fmt = "lifecycle")]
    Lifecycle,
    /// Listener sync state on a specific chain.
    #[display(fmt = "sync")]
    Sync,
    /// Proposal submission/confirmation state on a destination chain.
    #[display(fmt = "relay")]
    Relay,
}
