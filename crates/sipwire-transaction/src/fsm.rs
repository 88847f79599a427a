// sipwire - SIP user-agent core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The four transaction machines: INVITE client (§17.1.1), non-INVITE
//! client (§17.1.2), INVITE server (§17.2.1), non-INVITE server (§17.2.2).
//!
//! Every handler returns the actions to perform; the machines never act on
//! their own. Zero-duration timers (reliable transports) are not armed —
//! the machine takes the timer's transition on the spot.

use bytes::Bytes;
use tracing::trace;

use sipwire_core::{
    CSeq, Header, Headers, Message, Method, Request, RequestLine, Response, StatusLine,
};

use crate::timers::TimerTable;
use crate::{
    ClientTransaction, ServerTransaction, TransactionError, TransactionId, TxnAction, TxnTimer,
};

/// Builds the ACK a client INVITE transaction sends for a non-2xx final
/// (RFC 3261 §17.1.1.3): same request-URI and topmost Via (same branch),
/// CSeq number with method ACK, To taken from the response.
fn build_non_2xx_ack(invite: &Request, response: &Response) -> Request {
    let mut headers = Headers::new();
    if let Some(via) = invite.headers().top_via() {
        headers.push(Header::Via(vec![via.clone()]));
    }
    if let Some(max_forwards) = invite.headers().max_forwards() {
        headers.push(Header::MaxForwards(max_forwards));
    }
    if let Some(from) = invite.headers().from() {
        headers.push(Header::From(from.clone()));
    }
    if let Some(to) = response.headers().to().or_else(|| invite.headers().to()) {
        headers.push(Header::To(to.clone()));
    }
    if let Some(call_id) = invite.headers().call_id() {
        headers.push(Header::CallId(call_id.clone()));
    }
    if let Some(cseq) = invite.headers().cseq() {
        headers.push(Header::CSeq(CSeq::new(cseq.sequence, Method::Ack)));
    }
    let routes: Vec<_> = invite.headers().routes().cloned().collect();
    if !routes.is_empty() {
        headers.push(Header::Route(routes));
    }
    Request::new(
        RequestLine::new(Method::Ack, invite.uri().clone()),
        headers,
        Bytes::new(),
    )
}

/// Builds the 100 Trying an INVITE server transaction sends when the TU
/// has not produced a provisional of its own in time.
fn build_trying(request: &Request) -> Response {
    let mut headers = Headers::new();
    let vias: Vec<_> = request.headers().vias().cloned().collect();
    if !vias.is_empty() {
        headers.push(Header::Via(vias));
    }
    if let Some(from) = request.headers().from() {
        headers.push(Header::From(from.clone()));
    }
    if let Some(to) = request.headers().to() {
        headers.push(Header::To(to.clone()));
    }
    if let Some(call_id) = request.headers().call_id() {
        headers.push(Header::CallId(call_id.clone()));
    }
    if let Some(cseq) = request.headers().cseq() {
        headers.push(Header::CSeq(cseq.clone()));
    }
    let start = StatusLine::new(100, "Trying").expect("static status line");
    Response::new(start, headers, Bytes::new())
}

/// INVITE client transaction states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IctState {
    Calling,
    Proceeding,
    Completed,
    Terminated,
}

/// INVITE client transaction (RFC 3261 Figure 5).
pub struct IctMachine {
    id: TransactionId,
    state: IctState,
    timers: TimerTable,
    method: Method,
    request: Option<Request>,
    ack: Option<Request>,
    retransmit_interval: std::time::Duration,
}

impl IctMachine {
    pub fn new(id: TransactionId, timers: TimerTable) -> Self {
        Self {
            id,
            state: IctState::Calling,
            timers,
            method: Method::Invite,
            request: None,
            ack: None,
            retransmit_interval: timers.t1,
        }
    }

    pub fn state(&self) -> IctState {
        self.state
    }

    fn set_state(&mut self, state: IctState) {
        trace!(id = %self.id, from = ?self.state, to = ?state, "ict transition");
        self.state = state;
    }

    fn handle_final_non_2xx(&mut self, response: Response) -> Vec<TxnAction> {
        let mut actions = vec![TxnAction::Cancel(TxnTimer::A), TxnAction::Cancel(TxnTimer::B)];
        let ack = self
            .request
            .as_ref()
            .map(|invite| build_non_2xx_ack(invite, &response));
        actions.push(TxnAction::PassUp(Message::Response(response)));
        if let Some(ack) = ack {
            actions.push(TxnAction::Transmit(Message::Request(ack.clone())));
            self.ack = Some(ack);
        }
        let wait = self.timers.duration(TxnTimer::D);
        if wait.is_zero() {
            self.set_state(IctState::Terminated);
            actions.push(TxnAction::Terminate(None));
        } else {
            self.set_state(IctState::Completed);
            actions.push(TxnAction::Schedule {
                timer: TxnTimer::D,
                duration: wait,
            });
        }
        actions
    }
}

impl ClientTransaction for IctMachine {
    fn id(&self) -> &TransactionId {
        &self.id
    }

    fn method(&self) -> &Method {
        &self.method
    }

    fn start(&mut self, request: Request) -> Vec<TxnAction> {
        let mut actions = vec![TxnAction::Transmit(Message::Request(request.clone()))];
        if self.timers.retransmits() {
            actions.push(TxnAction::Schedule {
                timer: TxnTimer::A,
                duration: self.timers.duration(TxnTimer::A),
            });
        }
        actions.push(TxnAction::Schedule {
            timer: TxnTimer::B,
            duration: self.timers.duration(TxnTimer::B),
        });
        self.request = Some(request);
        actions
    }

    fn on_response(&mut self, response: Response) -> Vec<TxnAction> {
        match self.state {
            IctState::Calling | IctState::Proceeding => {
                if response.is_provisional() {
                    // Retransmission stops; Timer B stays armed.
                    let mut actions = Vec::new();
                    if self.state == IctState::Calling {
                        actions.push(TxnAction::Cancel(TxnTimer::A));
                    }
                    self.set_state(IctState::Proceeding);
                    actions.push(TxnAction::PassUp(Message::Response(response)));
                    actions
                } else if response.is_success() {
                    // The UAC sends the ACK end to end, not this machine.
                    self.set_state(IctState::Terminated);
                    vec![
                        TxnAction::Cancel(TxnTimer::A),
                        TxnAction::Cancel(TxnTimer::B),
                        TxnAction::PassUp(Message::Response(response)),
                        TxnAction::Terminate(None),
                    ]
                } else {
                    self.handle_final_non_2xx(response)
                }
            }
            IctState::Completed => {
                // A retransmitted final; answer with the stored ACK and
                // absorb it.
                if !response.is_success() {
                    if let Some(ack) = &self.ack {
                        return vec![TxnAction::Transmit(Message::Request(ack.clone()))];
                    }
                }
                Vec::new()
            }
            IctState::Terminated => Vec::new(),
        }
    }

    fn on_timer(&mut self, timer: TxnTimer) -> Vec<TxnAction> {
        match (self.state, timer) {
            (IctState::Calling, TxnTimer::A) => {
                self.retransmit_interval = (self.retransmit_interval * 2).min(self.timers.t2);
                match &self.request {
                    Some(request) => vec![
                        TxnAction::Transmit(Message::Request(request.clone())),
                        TxnAction::Schedule {
                            timer: TxnTimer::A,
                            duration: self.retransmit_interval,
                        },
                    ],
                    None => Vec::new(),
                }
            }
            (IctState::Calling | IctState::Proceeding, TxnTimer::B) => {
                self.set_state(IctState::Terminated);
                vec![
                    TxnAction::Cancel(TxnTimer::A),
                    TxnAction::Terminate(Some(TransactionError::TimedOut)),
                ]
            }
            (IctState::Completed, TxnTimer::D) => {
                self.set_state(IctState::Terminated);
                vec![TxnAction::Terminate(None)]
            }
            _ => Vec::new(),
        }
    }

    fn on_transport_error(&mut self, code: i32) -> Vec<TxnAction> {
        if self.state == IctState::Terminated {
            return Vec::new();
        }
        self.set_state(IctState::Terminated);
        vec![
            TxnAction::Cancel(TxnTimer::A),
            TxnAction::Cancel(TxnTimer::B),
            TxnAction::Cancel(TxnTimer::D),
            TxnAction::Terminate(Some(TransactionError::TransportFailed(code))),
        ]
    }

    fn is_terminated(&self) -> bool {
        self.state == IctState::Terminated
    }
}

/// Non-INVITE client transaction states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NictState {
    Trying,
    Proceeding,
    Completed,
    Terminated,
}

/// Non-INVITE client transaction (RFC 3261 Figure 6).
pub struct NictMachine {
    id: TransactionId,
    state: NictState,
    timers: TimerTable,
    method: Method,
    request: Option<Request>,
    retransmit_interval: std::time::Duration,
}

impl NictMachine {
    pub fn new(id: TransactionId, timers: TimerTable) -> Self {
        let method = id.method.clone();
        Self {
            id,
            state: NictState::Trying,
            timers,
            method,
            request: None,
            retransmit_interval: timers.t1,
        }
    }

    pub fn state(&self) -> NictState {
        self.state
    }

    fn set_state(&mut self, state: NictState) {
        trace!(id = %self.id, from = ?self.state, to = ?state, "nict transition");
        self.state = state;
    }
}

impl ClientTransaction for NictMachine {
    fn id(&self) -> &TransactionId {
        &self.id
    }

    fn method(&self) -> &Method {
        &self.method
    }

    fn start(&mut self, request: Request) -> Vec<TxnAction> {
        let mut actions = vec![TxnAction::Transmit(Message::Request(request.clone()))];
        if self.timers.retransmits() {
            actions.push(TxnAction::Schedule {
                timer: TxnTimer::E,
                duration: self.timers.duration(TxnTimer::E),
            });
        }
        actions.push(TxnAction::Schedule {
            timer: TxnTimer::F,
            duration: self.timers.duration(TxnTimer::F),
        });
        self.request = Some(request);
        actions
    }

    fn on_response(&mut self, response: Response) -> Vec<TxnAction> {
        match self.state {
            NictState::Trying | NictState::Proceeding => {
                if response.is_provisional() {
                    self.set_state(NictState::Proceeding);
                    return vec![TxnAction::PassUp(Message::Response(response))];
                }
                let mut actions = vec![
                    TxnAction::Cancel(TxnTimer::E),
                    TxnAction::Cancel(TxnTimer::F),
                    TxnAction::PassUp(Message::Response(response)),
                ];
                let wait = self.timers.duration(TxnTimer::K);
                if wait.is_zero() {
                    self.set_state(NictState::Terminated);
                    actions.push(TxnAction::Terminate(None));
                } else {
                    self.set_state(NictState::Completed);
                    actions.push(TxnAction::Schedule {
                        timer: TxnTimer::K,
                        duration: wait,
                    });
                }
                actions
            }
            // Retransmitted finals are absorbed until Timer K fires.
            NictState::Completed | NictState::Terminated => Vec::new(),
        }
    }

    fn on_timer(&mut self, timer: TxnTimer) -> Vec<TxnAction> {
        match (self.state, timer) {
            (NictState::Trying | NictState::Proceeding, TxnTimer::E) => {
                self.retransmit_interval = (self.retransmit_interval * 2).min(self.timers.t2);
                match &self.request {
                    Some(request) => vec![
                        TxnAction::Transmit(Message::Request(request.clone())),
                        TxnAction::Schedule {
                            timer: TxnTimer::E,
                            duration: self.retransmit_interval,
                        },
                    ],
                    None => Vec::new(),
                }
            }
            (NictState::Trying | NictState::Proceeding, TxnTimer::F) => {
                self.set_state(NictState::Terminated);
                vec![
                    TxnAction::Cancel(TxnTimer::E),
                    TxnAction::Terminate(Some(TransactionError::TimedOut)),
                ]
            }
            (NictState::Completed, TxnTimer::K) => {
                self.set_state(NictState::Terminated);
                vec![TxnAction::Terminate(None)]
            }
            _ => Vec::new(),
        }
    }

    fn on_transport_error(&mut self, code: i32) -> Vec<TxnAction> {
        if self.state == NictState::Terminated {
            return Vec::new();
        }
        self.set_state(NictState::Terminated);
        vec![
            TxnAction::Cancel(TxnTimer::E),
            TxnAction::Cancel(TxnTimer::F),
            TxnAction::Cancel(TxnTimer::K),
            TxnAction::Terminate(Some(TransactionError::TransportFailed(code))),
        ]
    }

    fn is_terminated(&self) -> bool {
        self.state == NictState::Terminated
    }
}

/// INVITE server transaction states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IstState {
    Proceeding,
    Completed,
    Confirmed,
    Terminated,
}

/// INVITE server transaction (RFC 3261 Figure 7).
pub struct IstMachine {
    id: TransactionId,
    state: IstState,
    timers: TimerTable,
    method: Method,
    request: Option<Request>,
    last_provisional: Option<Response>,
    last_final: Option<Response>,
    retransmit_interval: std::time::Duration,
}

impl IstMachine {
    pub fn new(id: TransactionId, timers: TimerTable) -> Self {
        Self {
            id,
            state: IstState::Proceeding,
            timers,
            method: Method::Invite,
            request: None,
            last_provisional: None,
            last_final: None,
            retransmit_interval: timers.t1,
        }
    }

    pub fn state(&self) -> IstState {
        self.state
    }

    fn set_state(&mut self, state: IstState) {
        trace!(id = %self.id, from = ?self.state, to = ?state, "ist transition");
        self.state = state;
    }
}

impl ServerTransaction for IstMachine {
    fn id(&self) -> &TransactionId {
        &self.id
    }

    fn method(&self) -> &Method {
        &self.method
    }

    fn start(&mut self, request: Request) -> Vec<TxnAction> {
        self.request = Some(request);
        // 100 Trying goes out shortly unless the TU answers first.
        vec![TxnAction::Schedule {
            timer: TxnTimer::Provisional,
            duration: self.timers.duration(TxnTimer::Provisional),
        }]
    }

    fn on_retransmit(&mut self) -> Vec<TxnAction> {
        match self.state {
            IstState::Proceeding => match &self.last_provisional {
                Some(response) => vec![TxnAction::Transmit(Message::Response(response.clone()))],
                None => Vec::new(),
            },
            IstState::Completed => match &self.last_final {
                Some(response) => vec![TxnAction::Transmit(Message::Response(response.clone()))],
                None => Vec::new(),
            },
            IstState::Confirmed | IstState::Terminated => Vec::new(),
        }
    }

    fn on_ack(&mut self) -> Vec<TxnAction> {
        if self.state != IstState::Completed {
            return Vec::new();
        }
        let mut actions = vec![TxnAction::Cancel(TxnTimer::G), TxnAction::Cancel(TxnTimer::H)];
        let wait = self.timers.duration(TxnTimer::I);
        if wait.is_zero() {
            self.set_state(IstState::Terminated);
            actions.push(TxnAction::Terminate(None));
        } else {
            self.set_state(IstState::Confirmed);
            actions.push(TxnAction::Schedule {
                timer: TxnTimer::I,
                duration: wait,
            });
        }
        actions
    }

    fn send_response(&mut self, response: Response) -> Vec<TxnAction> {
        if self.state != IstState::Proceeding {
            return Vec::new();
        }
        if response.is_provisional() {
            self.last_provisional = Some(response.clone());
            return vec![
                TxnAction::Cancel(TxnTimer::Provisional),
                TxnAction::Transmit(Message::Response(response)),
            ];
        }
        if response.is_success() {
            // 2xx retransmission belongs to the TU; the transaction ends.
            self.set_state(IstState::Terminated);
            return vec![
                TxnAction::Cancel(TxnTimer::Provisional),
                TxnAction::Transmit(Message::Response(response)),
                TxnAction::Terminate(None),
            ];
        }
        self.last_final = Some(response.clone());
        self.set_state(IstState::Completed);
        let mut actions = vec![
            TxnAction::Cancel(TxnTimer::Provisional),
            TxnAction::Transmit(Message::Response(response)),
        ];
        if self.timers.retransmits() {
            actions.push(TxnAction::Schedule {
                timer: TxnTimer::G,
                duration: self.timers.duration(TxnTimer::G),
            });
        }
        actions.push(TxnAction::Schedule {
            timer: TxnTimer::H,
            duration: self.timers.duration(TxnTimer::H),
        });
        actions
    }

    fn on_timer(&mut self, timer: TxnTimer) -> Vec<TxnAction> {
        match (self.state, timer) {
            (IstState::Proceeding, TxnTimer::Provisional) => {
                if self.last_provisional.is_some() {
                    return Vec::new();
                }
                match &self.request {
                    Some(request) => {
                        let trying = build_trying(request);
                        self.last_provisional = Some(trying.clone());
                        vec![TxnAction::Transmit(Message::Response(trying))]
                    }
                    None => Vec::new(),
                }
            }
            (IstState::Completed, TxnTimer::G) => {
                self.retransmit_interval = (self.retransmit_interval * 2).min(self.timers.t2);
                match &self.last_final {
                    Some(response) => vec![
                        TxnAction::Transmit(Message::Response(response.clone())),
                        TxnAction::Schedule {
                            timer: TxnTimer::G,
                            duration: self.retransmit_interval,
                        },
                    ],
                    None => Vec::new(),
                }
            }
            (IstState::Completed, TxnTimer::H) => {
                // No ACK ever came.
                self.set_state(IstState::Terminated);
                vec![
                    TxnAction::Cancel(TxnTimer::G),
                    TxnAction::Terminate(Some(TransactionError::TimedOut)),
                ]
            }
            (IstState::Confirmed, TxnTimer::I) => {
                self.set_state(IstState::Terminated);
                vec![TxnAction::Terminate(None)]
            }
            _ => Vec::new(),
        }
    }

    fn on_transport_error(&mut self, code: i32) -> Vec<TxnAction> {
        if self.state == IstState::Terminated {
            return Vec::new();
        }
        self.set_state(IstState::Terminated);
        vec![
            TxnAction::Cancel(TxnTimer::Provisional),
            TxnAction::Cancel(TxnTimer::G),
            TxnAction::Cancel(TxnTimer::H),
            TxnAction::Cancel(TxnTimer::I),
            TxnAction::Terminate(Some(TransactionError::TransportFailed(code))),
        ]
    }

    fn is_terminated(&self) -> bool {
        self.state == IstState::Terminated
    }
}

/// Non-INVITE server transaction states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NistState {
    Trying,
    Proceeding,
    Completed,
    Terminated,
}

/// Non-INVITE server transaction (RFC 3261 Figure 8).
pub struct NistMachine {
    id: TransactionId,
    state: NistState,
    timers: TimerTable,
    method: Method,
    last_response: Option<Response>,
}

impl NistMachine {
    pub fn new(id: TransactionId, timers: TimerTable) -> Self {
        let method = id.method.clone();
        Self {
            id,
            state: NistState::Trying,
            timers,
            method,
            last_response: None,
        }
    }

    pub fn state(&self) -> NistState {
        self.state
    }

    fn set_state(&mut self, state: NistState) {
        trace!(id = %self.id, from = ?self.state, to = ?state, "nist transition");
        self.state = state;
    }
}

impl ServerTransaction for NistMachine {
    fn id(&self) -> &TransactionId {
        &self.id
    }

    fn method(&self) -> &Method {
        &self.method
    }

    fn start(&mut self, _request: Request) -> Vec<TxnAction> {
        Vec::new()
    }

    fn on_retransmit(&mut self) -> Vec<TxnAction> {
        match self.state {
            NistState::Proceeding | NistState::Completed => match &self.last_response {
                Some(response) => vec![TxnAction::Transmit(Message::Response(response.clone()))],
                None => Vec::new(),
            },
            NistState::Trying | NistState::Terminated => Vec::new(),
        }
    }

    fn on_ack(&mut self) -> Vec<TxnAction> {
        Vec::new()
    }

    fn send_response(&mut self, response: Response) -> Vec<TxnAction> {
        match self.state {
            NistState::Trying | NistState::Proceeding => {
                self.last_response = Some(response.clone());
                if response.is_provisional() {
                    self.set_state(NistState::Proceeding);
                    return vec![TxnAction::Transmit(Message::Response(response))];
                }
                let mut actions = vec![TxnAction::Transmit(Message::Response(response))];
                let wait = self.timers.duration(TxnTimer::J);
                if wait.is_zero() {
                    self.set_state(NistState::Terminated);
                    actions.push(TxnAction::Terminate(None));
                } else {
                    self.set_state(NistState::Completed);
                    actions.push(TxnAction::Schedule {
                        timer: TxnTimer::J,
                        duration: wait,
                    });
                }
                actions
            }
            NistState::Completed | NistState::Terminated => Vec::new(),
        }
    }

    fn on_timer(&mut self, timer: TxnTimer) -> Vec<TxnAction> {
        match (self.state, timer) {
            (NistState::Completed, TxnTimer::J) => {
                self.set_state(NistState::Terminated);
                vec![TxnAction::Terminate(None)]
            }
            _ => Vec::new(),
        }
    }

    fn on_transport_error(&mut self, code: i32) -> Vec<TxnAction> {
        if self.state == NistState::Terminated {
            return Vec::new();
        }
        self.set_state(NistState::Terminated);
        vec![
            TxnAction::Cancel(TxnTimer::J),
            TxnAction::Terminate(Some(TransactionError::TransportFailed(code))),
        ]
    }

    fn is_terminated(&self) -> bool {
        self.state == NistState::Terminated
    }
}
