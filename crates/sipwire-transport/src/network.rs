// sipwire - SIP user-agent core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The network layer: the message dispatcher owning channels and
//! transactions.
//!
//! Outbound requests pick (or open) a channel keyed by the destination
//! endpoint, get a fresh Via stamped on top, and run inside a client
//! transaction. Outbound responses route by the topmost Via and pass
//! through the matching server transaction. Inbound messages are matched
//! against the transaction tables first; whatever is not a retransmission
//! reaches the application delegate.
//!
//! The whole layer is single-threaded: every entry point, channel
//! callback, and timer callback runs on one logical runner. Internally
//! each entry point computes under one `RefCell` borrow, collecting the
//! channel writes and delegate calls as effects, and performs them after
//! the borrow is released — a synchronous mock channel can therefore call
//! straight back in without tripping the borrow.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use smol_str::SmolStr;
use tracing::{debug, warn};

use sipwire_core::uri::HostPort;
use sipwire_core::{Message, Method, Request, Response, Via};
use sipwire_transaction::{
    generate_branch, Rfc2543Key, Role, TransactionError, TransactionFactory, TransactionId,
    TxnAction, TxnTimer,
};

use crate::aliases::AliasesMap;
use crate::channel::{Channel, ChannelDelegate, ChannelFactory, CODE_ABORTED, CODE_OK};
use crate::end_point::{EndPoint, Protocol};
use crate::error::NetworkError;
use crate::settings::NetworkSettings;
use crate::wheel::{TimerHandle, TimerQueue};

/// Completion for one `send`; fires when the write settles (or fails
/// earlier).
pub type Completion = Box<dyn FnOnce(Result<(), NetworkError>)>;

/// Application-facing callbacks.
pub trait NetworkDelegate {
    /// A channel went away. Stream channels always report this; datagram
    /// channels only on ICMP-style errors.
    fn on_channel_closed(&self, destination: &EndPoint, code: i32);

    /// A message survived transaction matching and belongs to the
    /// application.
    fn on_incoming_message(&self, message: Message);

    /// A transaction left the tables; `error` is set for timeouts and
    /// transport failures. The dialog layer keys its Terminated
    /// transition off this.
    fn on_transaction_terminated(&self, id: &TransactionId, error: Option<TransactionError>) {
        let _ = (id, error);
    }
}

/// Destination for a request: request-URI host, port or scheme default,
/// and the `transport` uri-parameter or the scheme's default transport.
pub fn request_endpoint(request: &Request) -> Option<EndPoint> {
    let uri = request.uri().as_sip()?;
    let protocol = match uri.transport_param() {
        Some(token) => Protocol::parse(token)?,
        None if uri.is_sips() => Protocol::Tls,
        None => Protocol::Udp,
    };
    Some(EndPoint::new(
        SmolStr::new(uri.host()),
        uri.port_or_default(),
        protocol,
    ))
}

/// Destination for a response, from the topmost Via: `received` beats the
/// sent-by host, a filled `rport` beats the sent-by port.
pub fn response_endpoint(response: &Response) -> Option<EndPoint> {
    let via = response.headers().top_via()?;
    let protocol = Protocol::parse(&via.transport)?;
    let host = via
        .received()
        .cloned()
        .unwrap_or_else(|| via.sent_by.host.clone());
    let port = match via.rport() {
        Some(Some(port)) => port,
        _ => via.sent_by.port.unwrap_or_else(|| protocol.default_port()),
    };
    Some(EndPoint::new(host, port, protocol))
}

/// Destination for either kind of message.
pub fn message_endpoint(message: &Message) -> Option<EndPoint> {
    match message {
        Message::Request(request) => request_endpoint(request),
        Message::Response(response) => response_endpoint(response),
    }
}

/// Prepends the client Via: `SIP/2.0/<proto> <origin>;rport;branch=z9hG4bK…`.
/// Returns the generated branch.
pub fn stamp_client_via(request: &mut Request, origin: &EndPoint) -> SmolStr {
    let branch = generate_branch();
    let mut via = Via::new(
        origin.protocol.via_token(),
        HostPort::new(origin.host.clone(), Some(origin.port)),
    );
    via.set_rport_flag();
    via.set_branch(branch.clone());
    request.headers_mut().push_via_front(via);
    branch
}

/// Annotates the topmost Via of a received request with the observed
/// source: `received` when the sent-by host differs, and a filled `rport`
/// when the sender asked for one.
pub fn stamp_server_via(request: &mut Request, source: &EndPoint) {
    match request.headers_mut().top_via_mut() {
        Some(via) => {
            if !via.sent_by.host.eq_ignore_ascii_case(&source.host) {
                via.set_received(source.host.clone());
            }
            if via.rport() == Some(None) {
                via.set_rport(source.port);
            }
        }
        None => {
            // A request with no Via at all still needs a return path.
            let mut via = Via::new(
                source.protocol.via_token(),
                HostPort::new(source.host.clone(), Some(source.port)),
            );
            via.set_rport_flag();
            request.headers_mut().push_via_front(via);
        }
    }
}

enum TimerEvent {
    Transaction { id: TransactionId, timer: TxnTimer },
    IdleChannel(EndPoint),
}

struct ClientEntry {
    txn: Box<dyn sipwire_transaction::ClientTransaction>,
    endpoint: EndPoint,
    timers: HashMap<TxnTimer, TimerHandle>,
}

struct ServerEntry {
    txn: Box<dyn sipwire_transaction::ServerTransaction>,
    endpoint: EndPoint,
    timers: HashMap<TxnTimer, TimerHandle>,
    legacy: Option<Rfc2543Key>,
}

/// One destination's channel plus the bookkeeping that decides how long
/// it lives: application pins, the transactions using it, and the idle
/// timer armed when both drop to zero.
struct ChannelContext {
    channel: Rc<dyn Channel>,
    refs: u32,
    idle_timer: Option<TimerHandle>,
    connected: bool,
    /// The request (and its completion) that triggered opening this
    /// channel; consumed when the connect settles. While it is pending,
    /// further sends to the same destination are refused.
    initial: Option<(Request, Completion)>,
    transactions: HashSet<TransactionId>,
}

struct Inner {
    settings: NetworkSettings,
    factories: HashMap<Protocol, Rc<dyn ChannelFactory>>,
    channels: HashMap<EndPoint, ChannelContext>,
    aliases: AliasesMap,
    clients: HashMap<TransactionId, ClientEntry>,
    servers: HashMap<TransactionId, ServerEntry>,
    timer_queue: TimerQueue<TimerEvent>,
    suspended: bool,
    shut_down: bool,
}

/// Deferred work computed under the state borrow, performed after it.
enum Effect {
    Transmit {
        channel: Rc<dyn Channel>,
        message: Message,
        txn: Option<TransactionId>,
        completion: Option<Completion>,
    },
    Deliver(Message),
    Connect(Rc<dyn Channel>),
    Close {
        channel: Rc<dyn Channel>,
        code: i32,
    },
    Complete {
        completion: Completion,
        result: Result<(), NetworkError>,
    },
    ChannelClosed {
        destination: EndPoint,
        code: i32,
    },
    Terminated {
        id: TransactionId,
        error: Option<TransactionError>,
    },
}

/// The dispatcher. Construct with [`NetworkLayer::new`] and keep the
/// returned `Rc`; channels receive the layer as their delegate.
pub struct NetworkLayer {
    inner: RefCell<Inner>,
    delegate: Rc<dyn NetworkDelegate>,
    txn_factory: Box<dyn TransactionFactory>,
    weak_self: Weak<NetworkLayer>,
}

impl NetworkLayer {
    pub fn new(
        delegate: Rc<dyn NetworkDelegate>,
        txn_factory: Box<dyn TransactionFactory>,
        settings: NetworkSettings,
    ) -> Rc<Self> {
        Rc::new_cyclic(|weak| Self {
            inner: RefCell::new(Inner {
                settings,
                factories: HashMap::new(),
                channels: HashMap::new(),
                aliases: AliasesMap::new(),
                clients: HashMap::new(),
                servers: HashMap::new(),
                timer_queue: TimerQueue::new(),
                suspended: false,
                shut_down: false,
            }),
            delegate,
            txn_factory,
            weak_self: weak.clone(),
        })
    }

    /// Installs the factory used to open channels for `protocol`.
    pub fn register_channel_factory(&self, protocol: Protocol, factory: Rc<dyn ChannelFactory>) {
        self.inner.borrow_mut().factories.insert(protocol, factory);
    }

    /// Routes one message. Requests go through a fresh client
    /// transaction; responses through the matching server transaction or,
    /// failing that, straight to the wire (stray 2xx retransmissions).
    ///
    /// `completion` fires when the write settles. An `Err` return means
    /// nothing was sent and the completion will not fire.
    pub fn send(&self, message: Message, completion: Completion) -> Result<(), NetworkError> {
        let mut effects = Vec::new();
        let result = match message {
            Message::Request(request) => self.send_request(request, completion, &mut effects),
            Message::Response(response) => self.send_response(response, completion, &mut effects),
        };
        self.run_effects(effects);
        result
    }

    /// Pins the channel to `destination` so it outlives its transactions.
    /// Returns false when no channel context currently exists.
    pub fn request_channel(&self, destination: &EndPoint) -> bool {
        let inner = &mut *self.inner.borrow_mut();
        let key = inner.aliases.resolve(destination).clone();
        let Some(ctx) = inner.channels.get_mut(&key) else {
            return false;
        };
        ctx.refs += 1;
        if let Some(handle) = ctx.idle_timer.take() {
            inner.timer_queue.cancel(handle);
        }
        true
    }

    /// Releases a pin taken by [`request_channel`]. When the last pin
    /// drops and no transactions remain, the idle timer starts; the
    /// channel is destroyed when it fires.
    ///
    /// [`request_channel`]: NetworkLayer::request_channel
    pub fn release_channel(&self, destination: &EndPoint) {
        let now = Instant::now();
        let inner = &mut *self.inner.borrow_mut();
        let key = inner.aliases.resolve(destination).clone();
        let Some(ctx) = inner.channels.get_mut(&key) else {
            return;
        };
        ctx.refs = ctx.refs.saturating_sub(1);
        if ctx.refs == 0 && ctx.transactions.is_empty() && ctx.idle_timer.is_none() {
            let handle = inner.timer_queue.schedule(
                now,
                inner.settings.idle_channel_timeout,
                TimerEvent::IdleChannel(key),
            );
            ctx.idle_timer = Some(handle);
        }
    }

    /// Declares that traffic from `alias` belongs to `destination`'s
    /// channel. Fails when the protocols differ or no channel exists.
    pub fn add_alias(&self, destination: &EndPoint, alias: &EndPoint) -> bool {
        let inner = &mut *self.inner.borrow_mut();
        if !inner.channels.contains_key(destination) {
            return false;
        }
        inner.aliases.add(destination, alias)
    }

    /// Power suspend: fails subsequent sends with
    /// [`NetworkError::Suspended`] and closes every open channel.
    pub fn on_suspend(&self) {
        let mut effects = Vec::new();
        {
            let inner = &mut *self.inner.borrow_mut();
            inner.suspended = true;
            drain_all_channels(inner, CODE_ABORTED, &mut effects);
        }
        self.run_effects(effects);
    }

    pub fn on_resume(&self) {
        self.inner.borrow_mut().suspended = false;
    }

    pub fn is_suspended(&self) -> bool {
        self.inner.borrow().suspended
    }

    /// Permanent teardown; the timer driver exits after this.
    pub fn shutdown(&self) {
        let mut effects = Vec::new();
        {
            let inner = &mut *self.inner.borrow_mut();
            inner.shut_down = true;
            inner.suspended = true;
            drain_all_channels(inner, CODE_ABORTED, &mut effects);
        }
        self.run_effects(effects);
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.borrow().shut_down
    }

    /// Earliest pending timer deadline, for drivers.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.inner.borrow().timer_queue.next_deadline()
    }

    /// Fires every timer due at `now`. Tests drive this directly with
    /// synthetic instants; production uses [`run_timers`].
    pub fn poll_timers(&self, now: Instant) {
        let mut effects = Vec::new();
        {
            let inner = &mut *self.inner.borrow_mut();
            for event in inner.timer_queue.poll(now) {
                match event {
                    TimerEvent::Transaction { id, timer } => {
                        clear_timer_handle(inner, &id, timer);
                        let actions = match id.role {
                            Role::Client => inner
                                .clients
                                .get_mut(&id)
                                .map(|entry| entry.txn.on_timer(timer)),
                            Role::Server => inner
                                .servers
                                .get_mut(&id)
                                .map(|entry| entry.txn.on_timer(timer)),
                        };
                        if let Some(actions) = actions {
                            self.apply_actions(inner, &id, actions, now, &mut None, &mut effects);
                        }
                    }
                    TimerEvent::IdleChannel(endpoint) => {
                        let eligible = inner
                            .channels
                            .get(&endpoint)
                            .map(|ctx| ctx.refs == 0 && ctx.transactions.is_empty())
                            .unwrap_or(false);
                        if eligible {
                            debug!(endpoint = %endpoint, "closing idle channel");
                            destroy_channel_context(inner, &endpoint, None, &mut effects);
                        }
                    }
                }
            }
        }
        self.run_effects(effects);
    }

    fn send_request(
        &self,
        request: Request,
        completion: Completion,
        effects: &mut Vec<Effect>,
    ) -> Result<(), NetworkError> {
        enum Plan {
            Existing(EndPoint),
            Open(EndPoint, Rc<dyn ChannelFactory>),
        }

        let plan = {
            let inner = &mut *self.inner.borrow_mut();
            if inner.suspended {
                return Err(NetworkError::Suspended);
            }
            if request.headers().cseq().is_none() {
                return Err(NetworkError::NoRoute);
            }
            let destination = request_endpoint(&request).ok_or(NetworkError::NoRoute)?;
            let key = inner.aliases.resolve(&destination).clone();
            match inner.channels.get(&key) {
                Some(ctx) if ctx.connected => Plan::Existing(key),
                Some(_) => return Err(NetworkError::InFlightToSameDestination),
                None => {
                    let factory = inner
                        .factories
                        .get(&key.protocol)
                        .cloned()
                        .ok_or(NetworkError::UnregisteredProtocol(key.protocol))?;
                    Plan::Open(key, factory)
                }
            }
        };

        match plan {
            Plan::Existing(key) => {
                let inner = &mut *self.inner.borrow_mut();
                let mut completion = Some(completion);
                self.start_client_transaction(inner, &key, request, &mut completion, effects);
                if let Some(completion) = completion.take() {
                    effects.push(Effect::Complete {
                        completion,
                        result: Ok(()),
                    });
                }
                Ok(())
            }
            Plan::Open(key, factory) => {
                // Channel creation is synchronous; the connect is not.
                let delegate: Rc<dyn ChannelDelegate> = self
                    .weak_self
                    .upgrade()
                    .expect("layer alive during send");
                let channel = factory
                    .create_channel(&key, delegate)
                    .map_err(NetworkError::TransportFailed)?;
                let inner = &mut *self.inner.borrow_mut();
                inner.channels.insert(
                    key,
                    ChannelContext {
                        channel: channel.clone(),
                        refs: 0,
                        idle_timer: None,
                        connected: false,
                        initial: Some((request, completion)),
                        transactions: HashSet::new(),
                    },
                );
                effects.push(Effect::Connect(channel));
                Ok(())
            }
        }
    }

    fn send_response(
        &self,
        response: Response,
        completion: Completion,
        effects: &mut Vec<Effect>,
    ) -> Result<(), NetworkError> {
        let inner = &mut *self.inner.borrow_mut();
        if inner.suspended {
            return Err(NetworkError::Suspended);
        }
        let destination = response_endpoint(&response).ok_or(NetworkError::NoRoute)?;
        let key = inner.aliases.resolve(&destination).clone();

        let id = TransactionId::for_response(&response, Role::Server)
            .filter(|id| inner.servers.contains_key(id))
            .or_else(|| legacy_server_match(inner, &response));

        match id {
            Some(id) => {
                let actions = inner
                    .servers
                    .get_mut(&id)
                    .expect("matched server transaction")
                    .txn
                    .send_response(response);
                let mut completion = Some(completion);
                self.apply_actions(inner, &id, actions, Instant::now(), &mut completion, effects);
                if let Some(completion) = completion.take() {
                    // The transaction absorbed the response (wrong state);
                    // nothing went to the wire, nothing failed.
                    effects.push(Effect::Complete {
                        completion,
                        result: Ok(()),
                    });
                }
                Ok(())
            }
            None => {
                // No transaction: stray 2xx retransmissions go straight
                // out over the existing channel.
                let ctx = inner.channels.get(&key).ok_or(NetworkError::NoRoute)?;
                effects.push(Effect::Transmit {
                    channel: ctx.channel.clone(),
                    message: Message::Response(response),
                    txn: None,
                    completion: Some(completion),
                });
                Ok(())
            }
        }
    }

    /// Stamps the Via, creates the transaction, registers it with the
    /// channel context, and runs its start actions.
    fn start_client_transaction(
        &self,
        inner: &mut Inner,
        key: &EndPoint,
        mut request: Request,
        completion: &mut Option<Completion>,
        effects: &mut Vec<Effect>,
    ) {
        let origin = inner.channels[key].channel.origin().clone();
        stamp_client_via(&mut request, &origin);
        let id = TransactionId::for_client_request(&request)
            .expect("stamped request yields a client id");
        let table = inner.settings.timer_table(key.protocol);
        let txn = self
            .txn_factory
            .create_client_transaction(request.method(), id.clone(), table);
        inner.clients.insert(
            id.clone(),
            ClientEntry {
                txn,
                endpoint: key.clone(),
                timers: HashMap::new(),
            },
        );
        attach_transaction(inner, key, &id);
        let actions = inner
            .clients
            .get_mut(&id)
            .expect("just inserted")
            .txn
            .start(request);
        self.apply_actions(inner, &id, actions, Instant::now(), completion, effects);
    }

    fn start_server_transaction(
        &self,
        inner: &mut Inner,
        key: &EndPoint,
        id: TransactionId,
        legacy: Option<Rfc2543Key>,
        request: &Request,
        effects: &mut Vec<Effect>,
    ) {
        let table = inner.settings.timer_table(key.protocol);
        let txn = self
            .txn_factory
            .create_server_transaction(request.method(), id.clone(), table);
        inner.servers.insert(
            id.clone(),
            ServerEntry {
                txn,
                endpoint: key.clone(),
                timers: HashMap::new(),
                legacy,
            },
        );
        attach_transaction(inner, key, &id);
        let actions = inner
            .servers
            .get_mut(&id)
            .expect("just inserted")
            .txn
            .start(request.clone());
        self.apply_actions(inner, &id, actions, Instant::now(), &mut None, effects);
    }

    /// Translates transaction actions into state changes and effects.
    fn apply_actions(
        &self,
        inner: &mut Inner,
        id: &TransactionId,
        actions: Vec<TxnAction>,
        now: Instant,
        completion: &mut Option<Completion>,
        effects: &mut Vec<Effect>,
    ) {
        for action in actions {
            match action {
                TxnAction::Transmit(message) => {
                    let endpoint = entry_endpoint(inner, id);
                    let channel = endpoint
                        .as_ref()
                        .and_then(|ep| inner.channels.get(ep))
                        .map(|ctx| ctx.channel.clone());
                    match channel {
                        Some(channel) => effects.push(Effect::Transmit {
                            channel,
                            message,
                            txn: Some(id.clone()),
                            completion: completion.take(),
                        }),
                        None => warn!(id = %id, "transmit with no channel; dropping"),
                    }
                }
                TxnAction::PassUp(message) => effects.push(Effect::Deliver(message)),
                TxnAction::Schedule { timer, duration } => {
                    let handle = inner.timer_queue.schedule(
                        now,
                        duration,
                        TimerEvent::Transaction {
                            id: id.clone(),
                            timer,
                        },
                    );
                    if let Some(stale) = set_timer_handle(inner, id, timer, handle) {
                        inner.timer_queue.cancel(stale);
                    }
                }
                TxnAction::Cancel(timer) => {
                    if let Some(handle) = take_timer_handle(inner, id, timer) {
                        inner.timer_queue.cancel(handle);
                    }
                }
                TxnAction::Terminate(error) => {
                    remove_transaction(inner, id);
                    effects.push(Effect::Terminated {
                        id: id.clone(),
                        error,
                    });
                }
            }
        }
    }

    /// Routes an inbound request: Via annotation, transaction matching
    /// (RFC 3261 branch or RFC 2543 fallback), retransmission absorption,
    /// and delivery of genuinely new work to the delegate.
    fn dispatch_request(
        &self,
        inner: &mut Inner,
        key: &EndPoint,
        source: &EndPoint,
        mut request: Request,
        effects: &mut Vec<Effect>,
    ) {
        stamp_server_via(&mut request, source);

        let has_cookie = request
            .headers()
            .top_via()
            .map(|via| via.has_magic_cookie())
            .unwrap_or(false);

        if has_cookie {
            let Some(id) = TransactionId::for_server_request(&request) else {
                warn!("request without usable Via/branch; dropping");
                return;
            };
            if inner.servers.contains_key(&id) {
                self.absorb_server_retransmit(inner, &id, &request, effects);
                return;
            }
            if request.method() == &Method::Ack {
                // ACK for a 2xx: no transaction by design, end-to-end.
                effects.push(Effect::Deliver(Message::Request(request)));
                return;
            }
            self.start_server_transaction(inner, key, id, None, &request, effects);
            effects.push(Effect::Deliver(Message::Request(request)));
            return;
        }

        if inner.settings.enforce_rfc3261_branch {
            warn!("request without RFC 3261 branch rejected");
            return;
        }

        // RFC 2543 fallback matching.
        let Some(legacy) = Rfc2543Key::from_request(&request) else {
            warn!("pre-RFC3261 request missing matching headers; dropping");
            return;
        };
        let existing = inner
            .servers
            .iter()
            .find(|(_, entry)| entry.legacy.as_ref() == Some(&legacy))
            .map(|(id, _)| id.clone());
        if let Some(id) = existing {
            self.absorb_server_retransmit(inner, &id, &request, effects);
            return;
        }
        if request.method() == &Method::Ack {
            effects.push(Effect::Deliver(Message::Request(request)));
            return;
        }
        let branch = request
            .headers()
            .top_via()
            .and_then(|via| via.branch().cloned())
            .unwrap_or_else(generate_branch);
        let sent_by = request
            .headers()
            .top_via()
            .map(|via| SmolStr::new(via.sent_by.to_string()))
            .unwrap_or_default();
        let id = TransactionId::new(branch, sent_by, request.method().clone(), Role::Server);
        self.start_server_transaction(inner, key, id, Some(legacy), &request, effects);
        effects.push(Effect::Deliver(Message::Request(request)));
    }

    fn absorb_server_retransmit(
        &self,
        inner: &mut Inner,
        id: &TransactionId,
        request: &Request,
        effects: &mut Vec<Effect>,
    ) {
        let actions = {
            let entry = inner.servers.get_mut(id).expect("matched server entry");
            if request.method() == &Method::Ack {
                entry.txn.on_ack()
            } else {
                entry.txn.on_retransmit()
            }
        };
        self.apply_actions(inner, id, actions, Instant::now(), &mut None, effects);
    }

    fn handle_transport_error(&self, id: &TransactionId, code: i32) {
        let mut effects = Vec::new();
        {
            let inner = &mut *self.inner.borrow_mut();
            let actions = match id.role {
                Role::Client => inner
                    .clients
                    .get_mut(id)
                    .map(|entry| entry.txn.on_transport_error(code)),
                Role::Server => inner
                    .servers
                    .get_mut(id)
                    .map(|entry| entry.txn.on_transport_error(code)),
            };
            if let Some(actions) = actions {
                self.apply_actions(inner, id, actions, Instant::now(), &mut None, &mut effects);
            }
        }
        self.run_effects(effects);
    }

    fn run_effects(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Transmit {
                    channel,
                    message,
                    txn,
                    completion,
                } => {
                    let weak = self.weak_self.clone();
                    channel.send(
                        message,
                        Box::new(move |code| {
                            if let Some(completion) = completion {
                                let result = if code == CODE_OK {
                                    Ok(())
                                } else {
                                    Err(NetworkError::TransportFailed(code))
                                };
                                completion(result);
                            }
                            if code != CODE_OK {
                                if let (Some(layer), Some(id)) = (weak.upgrade(), txn) {
                                    layer.handle_transport_error(&id, code);
                                }
                            }
                        }),
                    );
                }
                Effect::Deliver(message) => self.delegate.on_incoming_message(message),
                Effect::Connect(channel) => channel.connect(),
                Effect::Close { channel, code } => {
                    channel.detach_delegate();
                    if code == CODE_OK {
                        channel.close();
                    } else {
                        channel.close_with_error(code);
                    }
                }
                Effect::Complete { completion, result } => completion(result),
                Effect::ChannelClosed { destination, code } => {
                    self.delegate.on_channel_closed(&destination, code)
                }
                Effect::Terminated { id, error } => {
                    self.delegate.on_transaction_terminated(&id, error)
                }
            }
        }
    }
}

impl ChannelDelegate for NetworkLayer {
    fn on_channel_connected(&self, channel: Rc<dyn Channel>, code: i32) {
        let mut effects = Vec::new();
        {
            let inner = &mut *self.inner.borrow_mut();
            let key = inner.aliases.resolve(channel.destination()).clone();
            if code != CODE_OK {
                debug!(endpoint = %key, code, "channel connect failed");
                destroy_channel_context(inner, &key, Some(code), &mut effects);
            } else if let Some(ctx) = inner.channels.get_mut(&key) {
                ctx.connected = true;
                if let Some((request, completion)) = ctx.initial.take() {
                    let mut completion = Some(completion);
                    self.start_client_transaction(
                        inner,
                        &key,
                        request,
                        &mut completion,
                        &mut effects,
                    );
                    if let Some(completion) = completion.take() {
                        effects.push(Effect::Complete {
                            completion,
                            result: Ok(()),
                        });
                    }
                }
            }
        }
        self.run_effects(effects);
    }

    fn on_incoming_message(&self, channel: Rc<dyn Channel>, message: Message) {
        let mut effects = Vec::new();
        {
            let inner = &mut *self.inner.borrow_mut();
            let source = channel.destination().clone();
            let key = inner.aliases.resolve(&source).clone();
            // A channel we did not open (listener side) is adopted so
            // responses can route back over it and the idle timeout
            // applies to it like any other.
            inner.channels.entry(key.clone()).or_insert_with(|| ChannelContext {
                channel: channel.clone(),
                refs: 0,
                idle_timer: None,
                connected: true,
                initial: None,
                transactions: HashSet::new(),
            });
            match message {
                Message::Response(response) => {
                    let id = TransactionId::for_response(&response, Role::Client);
                    match id.filter(|id| inner.clients.contains_key(id)) {
                        Some(id) => {
                            let actions = inner
                                .clients
                                .get_mut(&id)
                                .expect("matched client entry")
                                .txn
                                .on_response(response);
                            self.apply_actions(
                                inner,
                                &id,
                                actions,
                                Instant::now(),
                                &mut None,
                                &mut effects,
                            );
                        }
                        // Stray responses (e.g. 2xx retransmissions after
                        // the transaction ended) go to the application.
                        None => effects.push(Effect::Deliver(Message::Response(response))),
                    }
                }
                Message::Request(request) => {
                    self.dispatch_request(inner, &key, &source, request, &mut effects);
                }
            }
            // An adopted context that picked up no transaction (a lone
            // ACK, a stray response) must not linger unbounded.
            if let Some(ctx) = inner.channels.get_mut(&key) {
                if ctx.refs == 0 && ctx.transactions.is_empty() && ctx.idle_timer.is_none() {
                    let handle = inner.timer_queue.schedule(
                        Instant::now(),
                        inner.settings.idle_channel_timeout,
                        TimerEvent::IdleChannel(key.clone()),
                    );
                    ctx.idle_timer = Some(handle);
                }
            }
        }
        self.run_effects(effects);
    }

    fn on_channel_closed(&self, channel: Rc<dyn Channel>, code: i32) {
        let mut effects = Vec::new();
        {
            let inner = &mut *self.inner.borrow_mut();
            let key = inner.aliases.resolve(channel.destination()).clone();
            if inner.channels.contains_key(&key) {
                close_channel_transactions(inner, &key, code, &mut effects);
                destroy_channel_context(inner, &key, Some(code), &mut effects);
            }
        }
        self.run_effects(effects);
    }
}

/// Drives the layer's timers on a current-thread runtime. Sleeps until
/// the next deadline (bounded by a coarse tick) and polls.
pub async fn run_timers(layer: Rc<NetworkLayer>) {
    const TICK: Duration = Duration::from_millis(20);
    loop {
        if layer.is_shut_down() {
            break;
        }
        let sleep_for = match layer.next_deadline() {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .min(TICK),
            None => TICK,
        };
        tokio::time::sleep(sleep_for).await;
        layer.poll_timers(Instant::now());
    }
}

fn entry_endpoint(inner: &Inner, id: &TransactionId) -> Option<EndPoint> {
    match id.role {
        Role::Client => inner.clients.get(id).map(|e| e.endpoint.clone()),
        Role::Server => inner.servers.get(id).map(|e| e.endpoint.clone()),
    }
}

fn set_timer_handle(
    inner: &mut Inner,
    id: &TransactionId,
    timer: TxnTimer,
    handle: TimerHandle,
) -> Option<TimerHandle> {
    match id.role {
        Role::Client => inner
            .clients
            .get_mut(id)
            .and_then(|e| e.timers.insert(timer, handle)),
        Role::Server => inner
            .servers
            .get_mut(id)
            .and_then(|e| e.timers.insert(timer, handle)),
    }
}

fn take_timer_handle(inner: &mut Inner, id: &TransactionId, timer: TxnTimer) -> Option<TimerHandle> {
    match id.role {
        Role::Client => inner.clients.get_mut(id).and_then(|e| e.timers.remove(&timer)),
        Role::Server => inner.servers.get_mut(id).and_then(|e| e.timers.remove(&timer)),
    }
}

fn clear_timer_handle(inner: &mut Inner, id: &TransactionId, timer: TxnTimer) {
    let _ = take_timer_handle(inner, id, timer);
}

/// Removes a terminated transaction: cancels its timers, detaches it from
/// its channel context, and arms the idle timer when the context just
/// went quiet.
fn remove_transaction(inner: &mut Inner, id: &TransactionId) {
    let (endpoint, timers) = match id.role {
        Role::Client => match inner.clients.remove(id) {
            Some(entry) => (entry.endpoint, entry.timers),
            None => return,
        },
        Role::Server => match inner.servers.remove(id) {
            Some(entry) => (entry.endpoint, entry.timers),
            None => return,
        },
    };
    for (_, handle) in timers {
        inner.timer_queue.cancel(handle);
    }
    if let Some(ctx) = inner.channels.get_mut(&endpoint) {
        ctx.transactions.remove(id);
        if ctx.refs == 0 && ctx.transactions.is_empty() && ctx.idle_timer.is_none() {
            let handle = inner.timer_queue.schedule(
                Instant::now(),
                inner.settings.idle_channel_timeout,
                TimerEvent::IdleChannel(endpoint),
            );
            ctx.idle_timer = Some(handle);
        }
    }
}

fn attach_transaction(inner: &mut Inner, key: &EndPoint, id: &TransactionId) {
    if let Some(ctx) = inner.channels.get_mut(key) {
        ctx.transactions.insert(id.clone());
        if let Some(handle) = ctx.idle_timer.take() {
            inner.timer_queue.cancel(handle);
        }
    }
}

/// Terminates every transaction bound to a channel with a transport
/// error; used when the channel dies under them.
fn close_channel_transactions(
    inner: &mut Inner,
    key: &EndPoint,
    code: i32,
    effects: &mut Vec<Effect>,
) {
    let ids: Vec<TransactionId> = inner
        .channels
        .get(key)
        .map(|ctx| ctx.transactions.iter().cloned().collect())
        .unwrap_or_default();
    for id in ids {
        let actions = match id.role {
            Role::Client => inner
                .clients
                .get_mut(&id)
                .map(|entry| entry.txn.on_transport_error(code)),
            Role::Server => inner
                .servers
                .get_mut(&id)
                .map(|entry| entry.txn.on_transport_error(code)),
        };
        if let Some(actions) = actions {
            for action in actions {
                match action {
                    TxnAction::Terminate(error) => {
                        remove_transaction(inner, &id);
                        effects.push(Effect::Terminated {
                            id: id.clone(),
                            error,
                        });
                    }
                    TxnAction::Cancel(timer) => {
                        if let Some(handle) = take_timer_handle(inner, &id, timer) {
                            inner.timer_queue.cancel(handle);
                        }
                    }
                    // Nothing can be transmitted on a dead channel.
                    _ => {}
                }
            }
        }
    }
}

/// Tears one context down: cancels the idle timer, fails the pending
/// initial completion, drops aliases, closes the channel, and reports the
/// close upward exactly once.
fn destroy_channel_context(
    inner: &mut Inner,
    key: &EndPoint,
    code: Option<i32>,
    effects: &mut Vec<Effect>,
) {
    let Some(mut ctx) = inner.channels.remove(key) else {
        return;
    };
    if let Some(handle) = ctx.idle_timer.take() {
        inner.timer_queue.cancel(handle);
    }
    if let Some((_, completion)) = ctx.initial.take() {
        let result = match code {
            Some(code) => Err(NetworkError::TransportFailed(code)),
            None => Err(NetworkError::Suspended),
        };
        effects.push(Effect::Complete { completion, result });
    }
    inner.aliases.remove_aliases_of(key);
    effects.push(Effect::Close {
        channel: ctx.channel.clone(),
        code: code.unwrap_or(CODE_OK),
    });
    if let Some(code) = code {
        effects.push(Effect::ChannelClosed {
            destination: key.clone(),
            code,
        });
    }
}

fn drain_all_channels(inner: &mut Inner, code: i32, effects: &mut Vec<Effect>) {
    let keys: Vec<EndPoint> = inner.channels.keys().cloned().collect();
    for key in keys {
        close_channel_transactions(inner, &key, code, effects);
        destroy_channel_context(inner, &key, Some(code), effects);
    }
}

/// Finds a server transaction created by RFC 2543 matching whose request
/// this response answers. Legacy requests may lack a usable branch, so
/// the match runs on the shared legacy fields instead of the id.
fn legacy_server_match(inner: &Inner, response: &Response) -> Option<TransactionId> {
    let headers = response.headers();
    let call_id = headers.call_id()?;
    let cseq = headers.cseq()?;
    let from_tag = headers.from()?.tag().cloned().unwrap_or_default();
    inner
        .servers
        .iter()
        .find(|(_, entry)| {
            entry.legacy.as_ref().is_some_and(|legacy| {
                legacy.call_id == *call_id
                    && legacy.cseq_sequence == cseq.sequence
                    && legacy.cseq_method == cseq.method
                    && legacy.from_tag == from_tag
            })
        })
        .map(|(id, _)| id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use sipwire_core::{
        CSeq, Header, Headers, RequestLine, SipUri, StatusLine, Uri,
    };

    fn invite(uri: &str) -> Request {
        let mut headers = Headers::new();
        headers.push(Header::CSeq(CSeq::new(1, Method::Invite)));
        Request::new(
            RequestLine::new(Method::Invite, Uri::Sip(SipUri::parse(uri).unwrap())),
            headers,
            Bytes::new(),
        )
    }

    fn response_with_via(via: Via) -> Response {
        let mut headers = Headers::new();
        headers.push(Header::Via(vec![via]));
        Response::new(
            StatusLine::new(200, "OK").unwrap(),
            headers,
            Bytes::new(),
        )
    }

    #[test]
    fn client_stamp_prepends_rport_and_cookie_branch() {
        let origin = EndPoint::new("1.0.0.1", 6001, Protocol::Udp);
        let mut request = invite("sip:foo@bar.com");
        let branch = stamp_client_via(&mut request, &origin);
        assert!(branch.starts_with("z9hG4bK"));

        let via = request.headers().top_via().expect("stamped via");
        assert_eq!(via.transport.as_str(), "UDP");
        assert_eq!(via.sent_by.to_string(), "1.0.0.1:6001");
        assert_eq!(via.rport(), Some(None));
        assert!(via.has_magic_cookie());
        assert!(via
            .to_string()
            .starts_with("SIP/2.0/UDP 1.0.0.1:6001;rport;branch=z9hG4bK"));
    }

    #[test]
    fn client_stamp_lands_on_top_of_existing_vias() {
        let origin = EndPoint::new("1.0.0.1", 6001, Protocol::Udp);
        let mut request = invite("sip:foo@bar.com");
        let mut older = Via::new("UDP", HostPort::new("old.example.com", Some(5060)));
        older.set_branch("z9hG4bKold");
        request.headers_mut().push_via_front(older);

        stamp_client_via(&mut request, &origin);
        let hosts: Vec<String> = request
            .headers()
            .vias()
            .map(|v| v.sent_by.host.to_string())
            .collect();
        assert_eq!(hosts, vec!["1.0.0.1", "old.example.com"]);
    }

    #[test]
    fn server_stamp_records_source_and_fills_rport() {
        let source = EndPoint::new("2.0.0.2", 1042, Protocol::Udp);
        let mut request = invite("sip:foobar@foo.com");
        let mut via = Via::new("UDP", HostPort::new("192.168.0.1", Some(7001)));
        via.set_rport_flag();
        request.headers_mut().push_via_front(via);

        stamp_server_via(&mut request, &source);
        let via = request.headers().top_via().unwrap();
        assert_eq!(via.received().map(|r| r.as_str()), Some("2.0.0.2"));
        assert_eq!(via.rport(), Some(Some(1042)));
    }

    #[test]
    fn server_stamp_skips_received_when_sent_by_matches() {
        let source = EndPoint::new("192.168.0.1", 7001, Protocol::Udp);
        let mut request = invite("sip:foobar@foo.com");
        request
            .headers_mut()
            .push_via_front(Via::new("UDP", HostPort::new("192.168.0.1", Some(7001))));

        stamp_server_via(&mut request, &source);
        let via = request.headers().top_via().unwrap();
        assert!(via.received().is_none());
        // No rport flag was present, so none is filled.
        assert_eq!(via.rport(), None);
    }

    #[test]
    fn request_endpoint_follows_scheme_and_transport_param() {
        let request = invite("sip:foobar@foo.com");
        assert_eq!(
            request_endpoint(&request),
            Some(EndPoint::new("foo.com", 5060, Protocol::Udp))
        );

        let request = invite("sip:foobar@foo.com;transport=TCP");
        assert_eq!(
            request_endpoint(&request),
            Some(EndPoint::new("foo.com", 5060, Protocol::Tcp))
        );

        let request = invite("sips:foobar@foo.com");
        assert_eq!(
            request_endpoint(&request),
            Some(EndPoint::new("foo.com", 5061, Protocol::Tls))
        );
    }

    #[test]
    fn response_endpoint_prefers_received_and_rport() {
        let plain = Via::new("UDP", HostPort::new("192.168.0.1", Some(7001)));
        assert_eq!(
            response_endpoint(&response_with_via(plain)),
            Some(EndPoint::new("192.168.0.1", 7001, Protocol::Udp))
        );

        let mut with_received = Via::new("UDP", HostPort::new("192.168.0.1", Some(7001)));
        with_received.set_received("189.187.200.23");
        assert_eq!(
            response_endpoint(&response_with_via(with_received.clone())),
            Some(EndPoint::new("189.187.200.23", 7001, Protocol::Udp))
        );

        with_received.set_rport(5002);
        assert_eq!(
            response_endpoint(&response_with_via(with_received)),
            Some(EndPoint::new("189.187.200.23", 5002, Protocol::Udp))
        );
    }

    #[test]
    fn response_endpoint_empty_rport_falls_back_to_sent_by() {
        let mut via = Via::new("UDP", HostPort::new("192.168.0.1", Some(7001)));
        via.set_rport_flag();
        assert_eq!(
            response_endpoint(&response_with_via(via)),
            Some(EndPoint::new("192.168.0.1", 7001, Protocol::Udp))
        );
    }

    #[test]
    fn response_endpoint_defaults_port_from_protocol() {
        let via = Via::new("TLS", HostPort::new("secure.example.com", None));
        assert_eq!(
            response_endpoint(&response_with_via(via)),
            Some(EndPoint::new("secure.example.com", 5061, Protocol::Tls))
        );
    }
}
