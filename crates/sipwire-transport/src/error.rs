// sipwire - SIP user-agent core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use thiserror::Error;

use crate::end_point::Protocol;

/// Errors surfaced by the network layer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NetworkError {
    /// No channel factory registered for the protocol the destination
    /// requires.
    #[error("no channel factory registered for {0}")]
    UnregisteredProtocol(Protocol),

    /// The message does not yield a destination (missing Via, unroutable
    /// request-URI).
    #[error("no route for message")]
    NoRoute,

    /// The layer is power-suspended; sends fail until resume.
    #[error("network layer suspended")]
    Suspended,

    /// A channel to this destination is still completing its initial
    /// request; retry once it has settled.
    #[error("initial request to this destination still in flight")]
    InFlightToSameDestination,

    /// The channel reported a transport failure (errno-like code).
    #[error("transport failed with code {0}")]
    TransportFailed(i32),
}
