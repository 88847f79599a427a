// sipwire - SIP user-agent core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Transport-agnostic network layer.
//!
//! This crate owns channels (keyed by peer [`EndPoint`]), runs the client
//! and server transactions over them, stamps Via headers, and routes
//! inbound messages either into a matching transaction or up to the
//! application delegate. Concrete sockets stay outside: embedders register
//! a [`ChannelFactory`] per wire protocol and implement [`Channel`] over
//! whatever I/O they have.
//!
//! # Example
//! ```no_run
//! use std::rc::Rc;
//! use sipwire_transaction::DefaultTransactionFactory;
//! use sipwire_transport::{NetworkLayer, NetworkSettings, Protocol};
//! # use sipwire_transport::{NetworkDelegate, EndPoint, ChannelFactory};
//! # struct App;
//! # impl NetworkDelegate for App {
//! #     fn on_channel_closed(&self, _: &EndPoint, _: i32) {}
//! #     fn on_incoming_message(&self, _: sipwire_core::Message) {}
//! # }
//! # fn factories() -> Rc<dyn ChannelFactory> { unimplemented!() }
//! let layer = NetworkLayer::new(
//!     Rc::new(App),
//!     Box::new(DefaultTransactionFactory),
//!     NetworkSettings::default(),
//! );
//! layer.register_channel_factory(Protocol::Udp, factories());
//! ```

pub mod aliases;
pub mod channel;
pub mod end_point;
pub mod error;
pub mod network;
pub mod settings;
pub mod wheel;

pub use aliases::AliasesMap;
pub use channel::{
    Channel, ChannelDelegate, ChannelFactory, SendCompletion, CODE_ABORTED, CODE_OK,
};
pub use end_point::{EndPoint, Protocol};
pub use error::NetworkError;
pub use network::{
    message_endpoint, request_endpoint, response_endpoint, run_timers, stamp_client_via,
    stamp_server_via, Completion, NetworkDelegate, NetworkLayer,
};
pub use settings::NetworkSettings;
pub use wheel::{TimerHandle, TimerQueue};
