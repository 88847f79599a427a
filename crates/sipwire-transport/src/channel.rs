// sipwire - SIP user-agent core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The channel seam.
//!
//! A channel is a duplex carrier of SIP messages to one peer. Concrete
//! socket implementations live outside this crate; the network layer only
//! talks to the traits here and to the factories registered per protocol.
//! Transport failures cross this boundary as errno-like `i32` codes so a
//! channel backed by an OS socket can report exactly what the OS said.

use std::rc::Rc;

use sipwire_core::Message;

use crate::end_point::EndPoint;

/// Success code for channel callbacks.
pub const CODE_OK: i32 = 0;
/// Code used when the core itself tears a channel down (suspend,
/// shutdown); mirrors ECONNABORTED.
pub const CODE_ABORTED: i32 = 103;

/// Callback invoked when a channel write settles; receives [`CODE_OK`] or
/// an errno-like failure code.
pub type SendCompletion = Box<dyn FnOnce(i32)>;

/// A transport to one destination. Channels start disconnected; the core
/// calls [`Channel::connect`] and learns the outcome through the
/// delegate.
pub trait Channel {
    /// Local address the channel sends from.
    fn origin(&self) -> &EndPoint;
    /// Remote peer.
    fn destination(&self) -> &EndPoint;
    fn is_secure(&self) -> bool;
    fn is_connected(&self) -> bool;

    /// Begins the asynchronous connect; completion arrives at
    /// [`ChannelDelegate::on_channel_connected`].
    fn connect(&self);

    /// Enqueues one message; `completion` fires when the write settles.
    fn send(&self, message: Message, completion: SendCompletion);

    fn close(&self);
    fn close_with_error(&self, code: i32);

    /// Drops the channel's reference to its delegate; called before the
    /// core goes away while the channel object may linger.
    fn detach_delegate(&self);
}

/// Callbacks a channel drives into the network layer.
pub trait ChannelDelegate {
    fn on_channel_connected(&self, channel: Rc<dyn Channel>, code: i32);
    fn on_incoming_message(&self, channel: Rc<dyn Channel>, message: Message);
    fn on_channel_closed(&self, channel: Rc<dyn Channel>, code: i32);
}

/// Creates channels for one wire protocol. Registered factories are
/// shared with the embedder, not owned by the network layer.
pub trait ChannelFactory {
    /// Synchronously creates a channel to `destination`; the returned
    /// channel is not yet connected. Failure is an errno-like code.
    fn create_channel(
        &self,
        destination: &EndPoint,
        delegate: Rc<dyn ChannelDelegate>,
    ) -> Result<Rc<dyn Channel>, i32>;
}
