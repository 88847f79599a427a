// sipwire - SIP user-agent core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The four RFC 3261 §17 transaction state machines.
//!
//! Each machine is pure: it consumes events (responses, timers, transport
//! errors) and returns the [`TxnAction`]s the owning layer must carry out.
//! Nothing here touches the network or the clock, which keeps every
//! timer/retransmission rule testable without a runtime.
//!
//! Machines are created through a [`TransactionFactory`] so tests can
//! substitute instrumented transactions for the default set.

use std::fmt;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use smol_str::SmolStr;

use sipwire_core::{Message, Method, Request, Response, MAGIC_COOKIE};

pub mod fsm;
pub mod timers;

pub use fsm::{IctMachine, IstMachine, NictMachine, NistMachine};
pub use timers::{Reliability, TimerTable};

/// Generates a fresh RFC 3261 branch: the magic cookie plus a random
/// alphanumeric suffix.
pub fn generate_branch() -> SmolStr {
    let mut rng = rand::thread_rng();
    let suffix: String = (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    SmolStr::new(format!("{}{}", MAGIC_COOKIE, suffix))
}

/// Which table a transaction lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

/// Transaction key: topmost Via branch and sent-by plus the CSeq method,
/// with a role tag separating the client and server tables.
///
/// A fixed struct with a stable hash; nothing ever formats this into a
/// string to use as a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionId {
    pub branch: SmolStr,
    pub sent_by: SmolStr,
    pub method: Method,
    pub role: Role,
}

impl TransactionId {
    pub fn new(
        branch: impl Into<SmolStr>,
        sent_by: impl Into<SmolStr>,
        method: Method,
        role: Role,
    ) -> Self {
        Self {
            branch: branch.into(),
            sent_by: sent_by.into(),
            method,
            role,
        }
    }

    /// Key for a request we are sending (after Via stamping).
    pub fn for_client_request(request: &Request) -> Option<Self> {
        let via = request.headers().top_via()?;
        let method = request.headers().cseq().map(|c| c.method.clone())?;
        Some(Self::new(
            via.branch()?.clone(),
            SmolStr::new(via.sent_by.to_string()),
            method,
            Role::Client,
        ))
    }

    /// Key a response matches against the client table: topmost branch
    /// plus the CSeq method.
    pub fn for_response(response: &Response, role: Role) -> Option<Self> {
        let via = response.headers().top_via()?;
        let method = response.headers().cseq().map(|c| c.method.clone())?;
        Some(Self::new(
            via.branch()?.clone(),
            SmolStr::new(via.sent_by.to_string()),
            method,
            role,
        ))
    }

    /// Key for an incoming request against the server table. ACK folds
    /// onto the INVITE transaction it acknowledges; an ACK that matches
    /// nothing is the 2xx case and belongs to the TU.
    pub fn for_server_request(request: &Request) -> Option<Self> {
        let via = request.headers().top_via()?;
        let method = match request.method() {
            Method::Ack => Method::Invite,
            other => other.clone(),
        };
        Some(Self::new(
            via.branch()?.clone(),
            SmolStr::new(via.sent_by.to_string()),
            method,
            Role::Server,
        ))
    }

    /// True when the branch carries the RFC 3261 magic cookie.
    pub fn is_rfc3261(&self) -> bool {
        self.branch.starts_with(MAGIC_COOKIE)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self.role {
            Role::Client => "client",
            Role::Server => "server",
        };
        write!(f, "{}:{}:{}:{}", role, self.branch, self.sent_by, self.method)
    }
}

/// RFC 2543 fallback key for requests whose branch lacks the magic
/// cookie: From tag, Call-ID, CSeq, the To header without its tag, the
/// request-URI, and the topmost Via.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rfc2543Key {
    pub from_tag: SmolStr,
    pub call_id: SmolStr,
    pub cseq_sequence: u32,
    pub cseq_method: Method,
    pub to_without_tag: SmolStr,
    pub request_uri: SmolStr,
    pub top_via: SmolStr,
}

impl Rfc2543Key {
    pub fn from_request(request: &Request) -> Option<Self> {
        let headers = request.headers();
        let from_tag = headers.from()?.tag().cloned().unwrap_or_default();
        let call_id = headers.call_id()?.clone();
        let cseq = headers.cseq()?;
        let mut to = headers.to()?.clone();
        to.params.remove("tag");
        let via = headers.top_via()?;
        Some(Self {
            from_tag,
            call_id,
            cseq_sequence: cseq.sequence,
            cseq_method: cseq.method.clone(),
            to_without_tag: SmolStr::new(to.to_string()),
            request_uri: SmolStr::new(request.uri().to_string()),
            top_via: SmolStr::new(via.to_string()),
        })
    }
}

/// Terminal failure reported upward with the transaction's demise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionError {
    /// Timer B/F/H expired without the awaited message.
    TimedOut,
    /// The channel reported a transport error (errno-like code).
    TransportFailed(i32),
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut => write!(f, "transaction timed out"),
            Self::TransportFailed(code) => write!(f, "transport failed (code {})", code),
        }
    }
}

impl std::error::Error for TransactionError {}

/// Timers a transaction may own. A–K are the RFC 3261 set; `Provisional`
/// is the 200 ms delay before an INVITE server transaction emits its own
/// 100 Trying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnTimer {
    A,
    B,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
    Provisional,
}

/// What a state machine wants done. The owning layer transmits through
/// the transaction's channel, delivers PassUp messages to the TU, and
/// maintains the timer wheel.
#[derive(Debug, Clone, PartialEq)]
pub enum TxnAction {
    /// Write this message to the transaction's channel.
    Transmit(Message),
    /// Deliver this message to the transaction user.
    PassUp(Message),
    /// Arm a timer owned by this transaction.
    Schedule { timer: TxnTimer, duration: Duration },
    /// Disarm a timer owned by this transaction.
    Cancel(TxnTimer),
    /// The machine reached Terminated; `None` is normal completion.
    Terminate(Option<TransactionError>),
}

/// Client transaction driven by the network layer.
pub trait ClientTransaction {
    fn id(&self) -> &TransactionId;
    fn method(&self) -> &Method;
    /// Sends the initial request; must be called exactly once.
    fn start(&mut self, request: Request) -> Vec<TxnAction>;
    fn on_response(&mut self, response: Response) -> Vec<TxnAction>;
    fn on_timer(&mut self, timer: TxnTimer) -> Vec<TxnAction>;
    fn on_transport_error(&mut self, code: i32) -> Vec<TxnAction>;
    fn is_terminated(&self) -> bool;
}

/// Server transaction driven by the network layer.
pub trait ServerTransaction {
    fn id(&self) -> &TransactionId;
    fn method(&self) -> &Method;
    /// Accepts the initial request; must be called exactly once.
    fn start(&mut self, request: Request) -> Vec<TxnAction>;
    /// A retransmission of the initial request arrived.
    fn on_retransmit(&mut self) -> Vec<TxnAction>;
    /// An ACK for a non-2xx final arrived (INVITE machines only).
    fn on_ack(&mut self) -> Vec<TxnAction>;
    /// The TU wants this response sent.
    fn send_response(&mut self, response: Response) -> Vec<TxnAction>;
    fn on_timer(&mut self, timer: TxnTimer) -> Vec<TxnAction>;
    fn on_transport_error(&mut self, code: i32) -> Vec<TxnAction>;
    fn is_terminated(&self) -> bool;
}

/// Creates transactions for the network layer; swappable for tests.
pub trait TransactionFactory {
    fn create_client_transaction(
        &self,
        method: &Method,
        id: TransactionId,
        timers: TimerTable,
    ) -> Box<dyn ClientTransaction>;

    fn create_server_transaction(
        &self,
        method: &Method,
        id: TransactionId,
        timers: TimerTable,
    ) -> Box<dyn ServerTransaction>;
}

/// Selects the INVITE machines for INVITE and the non-INVITE machines for
/// everything else.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTransactionFactory;

impl TransactionFactory for DefaultTransactionFactory {
    fn create_client_transaction(
        &self,
        method: &Method,
        id: TransactionId,
        timers: TimerTable,
    ) -> Box<dyn ClientTransaction> {
        if method.is_invite() {
            Box::new(IctMachine::new(id, timers))
        } else {
            Box::new(NictMachine::new(id, timers))
        }
    }

    fn create_server_transaction(
        &self,
        method: &Method,
        id: TransactionId,
        timers: TimerTable,
    ) -> Box<dyn ServerTransaction> {
        if method.is_invite() {
            Box::new(IstMachine::new(id, timers))
        } else {
            Box::new(NistMachine::new(id, timers))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use sipwire_core::uri::HostPort;
    use sipwire_core::{Address, CSeq, Header, Headers, RequestLine, SipUri, Uri, Via};

    fn request_with_branch(method: Method, branch: &str) -> Request {
        let mut headers = Headers::new();
        let mut via = Via::new("UDP", HostPort::new("pc33.example.com", Some(5060)));
        via.set_branch(branch);
        headers.push(Header::Via(vec![via]));
        headers.push(Header::From(
            Address::new(Uri::Sip(SipUri::parse("sip:alice@example.com").unwrap()))
                .with_display_name("Alice"),
        ));
        headers.push(Header::To(Address::new(Uri::Sip(
            SipUri::parse("sip:bob@example.com").unwrap(),
        ))));
        headers.push(Header::CallId(SmolStr::new("abc@pc33")));
        headers.push(Header::CSeq(CSeq::new(1, method.clone())));
        Request::new(
            RequestLine::new(method, Uri::Sip(SipUri::parse("sip:bob@example.com").unwrap())),
            headers,
            Bytes::new(),
        )
    }

    #[test]
    fn generated_branches_carry_the_cookie_and_differ() {
        let a = generate_branch();
        let b = generate_branch();
        assert!(a.starts_with(MAGIC_COOKIE));
        assert!(a.len() > MAGIC_COOKIE.len());
        assert_ne!(a, b);
    }

    #[test]
    fn server_id_folds_ack_onto_invite() {
        let invite = request_with_branch(Method::Invite, "z9hG4bKxyz");
        let ack = request_with_branch(Method::Ack, "z9hG4bKxyz");
        let invite_id = TransactionId::for_server_request(&invite).unwrap();
        let ack_id = TransactionId::for_server_request(&ack).unwrap();
        assert_eq!(invite_id, ack_id);
        assert_eq!(ack_id.method, Method::Invite);
    }

    #[test]
    fn cancel_gets_its_own_server_transaction() {
        let invite = request_with_branch(Method::Invite, "z9hG4bKxyz");
        let cancel = request_with_branch(Method::Cancel, "z9hG4bKxyz");
        assert_ne!(
            TransactionId::for_server_request(&invite).unwrap(),
            TransactionId::for_server_request(&cancel).unwrap()
        );
    }

    #[test]
    fn client_and_server_tables_do_not_collide() {
        let request = request_with_branch(Method::Options, "z9hG4bKopt");
        let client = TransactionId::for_client_request(&request).unwrap();
        let server = TransactionId::for_server_request(&request).unwrap();
        assert_ne!(client, server);
        assert_eq!(client.branch, server.branch);
    }

    #[test]
    fn magic_cookie_detection_on_ids() {
        let modern = request_with_branch(Method::Options, "z9hG4bKopt");
        assert!(TransactionId::for_client_request(&modern).unwrap().is_rfc3261());
        let legacy = request_with_branch(Method::Options, "old-branch-1");
        assert!(!TransactionId::for_client_request(&legacy).unwrap().is_rfc3261());
    }

    #[test]
    fn legacy_key_ignores_to_tag() {
        let mut a = request_with_branch(Method::Options, "legacy");
        let b = request_with_branch(Method::Options, "legacy");
        a.headers_mut().to_mut().unwrap().set_tag("resp-tag");
        assert_eq!(
            Rfc2543Key::from_request(&a).unwrap(),
            Rfc2543Key::from_request(&b).unwrap()
        );
    }
}
