// sipwire - SIP user-agent core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! RFC 3261 §12 dialog state.
//!
//! A dialog is the end-to-end relationship identified by
//! `(Call-ID, local tag, remote tag)`. It remembers the route set and
//! remote target derived at creation, sequences in-dialog requests
//! through the shared CSeq space, and walks Early → Confirmed →
//! Terminated as responses arrive.
//!
//! # Example
//! ```no_run
//! use sipwire_dialog::{Dialog, DialogSet};
//! # use sipwire_core::{Request, Response, Method};
//! # let invite: Request = unimplemented!();
//! # let ringing: Response = unimplemented!();
//! let dialogs = DialogSet::new();
//! let mut dialog = Dialog::new_client(&invite, &ringing).unwrap();
//! let bye = dialog.create_request(Method::Bye).unwrap();
//! dialogs.insert(dialog);
//! ```

use bytes::Bytes;
use dashmap::DashMap;
use rand::Rng;
use smol_str::SmolStr;
use thiserror::Error;
use tracing::debug;

use sipwire_core::{
    Address, CSeq, Header, Headers, Method, Request, RequestLine, Response, Uri,
};

/// Dialog lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogState {
    /// Established by a provisional response carrying a To tag.
    Early,
    /// Established or upgraded by a 2xx.
    Confirmed,
    /// Ended by BYE, a non-2xx final, or a transport failure.
    Terminated,
}

/// `(Call-ID, local tag, remote tag)`. The id is assigned at creation and
/// never changes for the dialog's lifetime; a 1xx without a To tag leaves
/// the remote tag empty until the dialog is re-created from a tagged
/// response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DialogId {
    pub call_id: SmolStr,
    pub local_tag: SmolStr,
    pub remote_tag: SmolStr,
}

impl DialogId {
    pub fn new(
        call_id: impl Into<SmolStr>,
        local_tag: impl Into<SmolStr>,
        remote_tag: impl Into<SmolStr>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            local_tag: local_tag.into(),
            remote_tag: remote_tag.into(),
        }
    }

    /// Id as seen from the receiver of `request`: the sender's From tag
    /// is the remote tag.
    pub fn from_request(request: &Request) -> Option<Self> {
        let headers = request.headers();
        let call_id = headers.call_id()?.clone();
        let remote_tag = headers.from()?.tag().cloned().unwrap_or_default();
        let local_tag = headers.to()?.tag().cloned().unwrap_or_default();
        Some(Self::new(call_id, local_tag, remote_tag))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DialogError {
    /// ACK and CANCEL have dedicated builders; the generic path refuses
    /// them.
    #[error("{0} requests are built by their dedicated builder")]
    RequiresDedicatedBuilder(Method),

    /// `create_ack` needs the INVITE being acknowledged.
    #[error("ACK acknowledges an INVITE, got {0}")]
    NotAnInvite(Method),

    /// The message lacks a header the dialog derivation requires.
    #[error("missing {0} header")]
    MissingHeader(&'static str),

    /// The response code cannot create a dialog (only 1xx/2xx do).
    #[error("no dialog from a {0} response")]
    NoDialog(u16),

    /// In-dialog request with a CSeq at or below the remembered remote
    /// sequence.
    #[error("out-of-order CSeq")]
    OutOfOrderCSeq,
}

/// One dialog's state.
#[derive(Debug, Clone)]
pub struct Dialog {
    id: DialogId,
    state: DialogState,
    local_uri: Uri,
    remote_uri: Uri,
    remote_target: Uri,
    route_set: Vec<Uri>,
    local_seq: Option<u32>,
    remote_seq: Option<u32>,
    is_secure: bool,
}

impl Dialog {
    /// UAC-side creation from the INVITE we sent and a 1xx/2xx answer.
    ///
    /// The route set is the response's Record-Route list reversed; the
    /// remote target is the response's Contact.
    pub fn new_client(request: &Request, response: &Response) -> Result<Self, DialogError> {
        let state = state_for_code(response.code())?;
        let req_headers = request.headers();
        let resp_headers = response.headers();

        let call_id = req_headers
            .call_id()
            .ok_or(DialogError::MissingHeader("Call-ID"))?
            .clone();
        let from = req_headers
            .from()
            .ok_or(DialogError::MissingHeader("From"))?;
        let to = req_headers.to().ok_or(DialogError::MissingHeader("To"))?;
        let local_tag = from.tag().cloned().unwrap_or_default();
        let remote_tag = resp_headers
            .to()
            .and_then(|to| to.tag())
            .cloned()
            .unwrap_or_default();

        let remote_target = resp_headers
            .contacts()
            .next()
            .ok_or(DialogError::MissingHeader("Contact"))?
            .uri
            .clone();

        let mut route_set: Vec<Uri> = resp_headers
            .record_routes()
            .map(|address| address.uri.clone())
            .collect();
        route_set.reverse();

        let local_seq = req_headers
            .cseq()
            .ok_or(DialogError::MissingHeader("CSeq"))?
            .sequence;

        let is_secure = request
            .uri()
            .as_sip()
            .map(|uri| uri.is_sips())
            .unwrap_or(false);

        Ok(Self {
            id: DialogId::new(call_id, local_tag, remote_tag),
            state,
            local_uri: from.uri.clone(),
            remote_uri: to.uri.clone(),
            remote_target,
            route_set,
            local_seq: Some(local_seq),
            remote_seq: None,
            is_secure,
        })
    }

    /// UAS-side creation from the request we are accepting and the
    /// response we are sending for it.
    ///
    /// The route set is the request's Record-Route list in request order
    /// (not reversed); the local sequence stays unset until this side
    /// sends its first in-dialog request.
    pub fn new_server(request: &Request, response: &Response) -> Result<Self, DialogError> {
        let state = state_for_code(response.code())?;
        let req_headers = request.headers();

        let call_id = req_headers
            .call_id()
            .ok_or(DialogError::MissingHeader("Call-ID"))?
            .clone();
        let from = req_headers
            .from()
            .ok_or(DialogError::MissingHeader("From"))?;
        let to = req_headers.to().ok_or(DialogError::MissingHeader("To"))?;
        let local_tag = response
            .headers()
            .to()
            .and_then(|to| to.tag())
            .cloned()
            .unwrap_or_default();
        let remote_tag = from.tag().cloned().unwrap_or_default();

        let remote_target = req_headers
            .contacts()
            .next()
            .ok_or(DialogError::MissingHeader("Contact"))?
            .uri
            .clone();

        let route_set: Vec<Uri> = req_headers
            .record_routes()
            .map(|address| address.uri.clone())
            .collect();

        let remote_seq = req_headers
            .cseq()
            .ok_or(DialogError::MissingHeader("CSeq"))?
            .sequence;

        let is_secure = request
            .uri()
            .as_sip()
            .map(|uri| uri.is_sips())
            .unwrap_or(false);

        Ok(Self {
            id: DialogId::new(call_id, local_tag, remote_tag),
            state,
            local_uri: to.uri.clone(),
            remote_uri: from.uri.clone(),
            remote_target,
            route_set,
            local_seq: None,
            remote_seq: Some(remote_seq),
            is_secure,
        })
    }

    pub fn id(&self) -> &DialogId {
        &self.id
    }

    pub fn state(&self) -> DialogState {
        self.state
    }

    pub fn is_secure(&self) -> bool {
        self.is_secure
    }

    pub fn local_uri(&self) -> &Uri {
        &self.local_uri
    }

    pub fn remote_uri(&self) -> &Uri {
        &self.remote_uri
    }

    pub fn remote_target(&self) -> &Uri {
        &self.remote_target
    }

    pub fn route_set(&self) -> &[Uri] {
        &self.route_set
    }

    pub fn local_seq(&self) -> Option<u32> {
        self.local_seq
    }

    pub fn remote_seq(&self) -> Option<u32> {
        self.remote_seq
    }

    /// Early → Confirmed; anything else is unchanged.
    pub fn confirm(&mut self) {
        if self.state == DialogState::Early {
            debug!(id = ?self.id, "dialog confirmed");
            self.state = DialogState::Confirmed;
        }
    }

    pub fn terminate(&mut self) {
        if self.state != DialogState::Terminated {
            debug!(id = ?self.id, "dialog terminated");
            self.state = DialogState::Terminated;
        }
    }

    /// Allocates the next local CSeq. The first call seeds from a random
    /// 16-bit integer; later calls increment.
    pub fn next_local_seq(&mut self) -> u32 {
        let next = match self.local_seq {
            None => rand::thread_rng().gen_range(1..=0xFFFF),
            Some(current) => current + 1,
        };
        self.local_seq = Some(next);
        next
    }

    /// Builds an in-dialog request with the route-set rules of RFC 3261
    /// §12.2.1.1: a loose-routing first proxy keeps the remote target in
    /// the request-URI; a strict router swaps it into the Route list.
    ///
    /// ACK and CANCEL are refused here: ACK-for-2xx comes from
    /// [`Dialog::create_ack`], CANCEL from the UAC against the pending
    /// INVITE transaction.
    pub fn create_request(&mut self, method: Method) -> Result<Request, DialogError> {
        if method == Method::Ack || method == Method::Cancel {
            return Err(DialogError::RequiresDedicatedBuilder(method));
        }
        let sequence = self.next_local_seq();
        Ok(self.create_request_internal(method, sequence))
    }

    /// Builds the ACK for a 2xx: same CSeq number as the INVITE, with any
    /// credentials the INVITE carried copied over.
    pub fn create_ack(&mut self, invite: &Request) -> Result<Request, DialogError> {
        if invite.method() != &Method::Invite {
            return Err(DialogError::NotAnInvite(invite.method().clone()));
        }
        let sequence = invite
            .headers()
            .cseq()
            .ok_or(DialogError::MissingHeader("CSeq"))?
            .sequence;
        let mut ack = self.create_request_internal(Method::Ack, sequence);
        for header in invite.headers().iter() {
            match header {
                Header::Authorization(_) | Header::ProxyAuthorization(_) => {
                    ack.headers_mut().push(header.clone());
                }
                _ => {}
            }
        }
        Ok(ack)
    }

    fn create_request_internal(&self, method: Method, sequence: u32) -> Request {
        let (request_uri, route) = if self.route_set.is_empty() {
            (self.remote_target.clone(), None)
        } else {
            let first_is_loose = self.route_set[0]
                .as_sip()
                .map(|uri| uri.is_loose_router())
                .unwrap_or(false);
            if first_is_loose {
                let route: Vec<Address> = self
                    .route_set
                    .iter()
                    .map(|uri| Address::new(uri.clone()))
                    .collect();
                (self.remote_target.clone(), Some(route))
            } else {
                // Strict-router compatibility: the first route becomes
                // the request-URI and the remote target goes last.
                let mut route: Vec<Address> = self.route_set[1..]
                    .iter()
                    .map(|uri| Address::new(uri.clone()))
                    .collect();
                route.push(Address::new(self.remote_target.clone()));
                (self.route_set[0].clone(), Some(route))
            }
        };

        let mut headers = Headers::new();
        headers.push(Header::MaxForwards(70));
        let mut from = Address::new(self.local_uri.clone());
        if !self.id.local_tag.is_empty() {
            from.set_tag(self.id.local_tag.clone());
        }
        headers.push(Header::From(from));
        let mut to = Address::new(self.remote_uri.clone());
        if !self.id.remote_tag.is_empty() {
            to.set_tag(self.id.remote_tag.clone());
        }
        headers.push(Header::To(to));
        headers.push(Header::CallId(self.id.call_id.clone()));
        headers.push(Header::CSeq(CSeq::new(sequence, method.clone())));
        if let Some(route) = route {
            headers.push(Header::Route(route));
        }

        Request::new(RequestLine::new(method, request_uri), headers, Bytes::new())
    }

    /// Applies a response belonging to this dialog: 2xx confirms (and for
    /// BYE terminates), non-2xx finals terminate, and any Contact
    /// refreshes the remote target.
    pub fn apply_response(&mut self, method: &Method, response: &Response) {
        if response.is_provisional() {
            return;
        }
        if response.is_success() {
            if method == &Method::Bye {
                self.terminate();
                return;
            }
            if let Some(contact) = response.headers().contacts().next() {
                self.remote_target = contact.uri.clone();
            }
            self.confirm();
        } else {
            self.terminate();
        }
    }

    /// Validates and records an in-dialog request from the peer: CSeq
    /// must increase strictly (an ACK instead repeats the INVITE's), and
    /// a Contact refreshes the remote target for the whole dialog.
    pub fn apply_request(&mut self, request: &Request) -> Result<(), DialogError> {
        let cseq = request
            .headers()
            .cseq()
            .ok_or(DialogError::MissingHeader("CSeq"))?;
        if request.method() == &Method::Ack {
            if self.remote_seq != Some(cseq.sequence) {
                return Err(DialogError::OutOfOrderCSeq);
            }
        } else {
            match self.remote_seq {
                Some(current) if cseq.sequence <= current => {
                    return Err(DialogError::OutOfOrderCSeq);
                }
                _ => self.remote_seq = Some(cseq.sequence),
            }
        }
        if let Some(contact) = request.headers().contacts().next() {
            self.remote_target = contact.uri.clone();
        }
        if request.method() == &Method::Bye {
            self.terminate();
        }
        Ok(())
    }

    /// A transaction bound to this dialog died (timeout or transport
    /// failure); the dialog is over.
    pub fn on_transaction_error(&mut self) {
        self.terminate();
    }

    /// True when an incoming request addresses this dialog (tags swap
    /// perspective).
    pub fn matches_request(&self, request: &Request) -> bool {
        match DialogId::from_request(request) {
            Some(incoming) => {
                incoming.call_id == self.id.call_id
                    && incoming.local_tag == self.id.local_tag
                    && incoming.remote_tag == self.id.remote_tag
            }
            None => false,
        }
    }
}

fn state_for_code(code: u16) -> Result<DialogState, DialogError> {
    match code {
        100..=199 => Ok(DialogState::Early),
        200..=299 => Ok(DialogState::Confirmed),
        other => Err(DialogError::NoDialog(other)),
    }
}

/// Live dialogs keyed by id.
#[derive(Debug, Default)]
pub struct DialogSet {
    dialogs: DashMap<DialogId, Dialog>,
}

impl DialogSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, dialog: Dialog) {
        self.dialogs.insert(dialog.id.clone(), dialog);
    }

    pub fn get(&self, id: &DialogId) -> Option<Dialog> {
        self.dialogs.get(id).map(|entry| entry.clone())
    }

    /// Finds the dialog an incoming request belongs to.
    pub fn find_by_request(&self, request: &Request) -> Option<Dialog> {
        let incoming = DialogId::from_request(request)?;
        self.get(&incoming)
    }

    /// Runs `f` against the dialog in place, returning its result.
    pub fn with_dialog<R>(
        &self,
        id: &DialogId,
        f: impl FnOnce(&mut Dialog) -> R,
    ) -> Option<R> {
        self.dialogs.get_mut(id).map(|mut entry| f(entry.value_mut()))
    }

    pub fn remove(&self, id: &DialogId) -> Option<Dialog> {
        self.dialogs.remove(id).map(|(_, dialog)| dialog)
    }

    pub fn len(&self) -> usize {
        self.dialogs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dialogs.is_empty()
    }

    /// Drops every terminated dialog, returning how many went away.
    pub fn sweep_terminated(&self) -> usize {
        let before = self.dialogs.len();
        self.dialogs
            .retain(|_, dialog| dialog.state != DialogState::Terminated);
        before - self.dialogs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sipwire_core::uri::HostPort;
    use sipwire_core::{Contact, SipUri, StatusLine, Via};

    fn invite_request() -> Request {
        let mut headers = Headers::new();
        let mut via = Via::new("UDP", HostPort::new("pc33.example.com", Some(5060)));
        via.set_branch("z9hG4bKdlg1");
        headers.push(Header::Via(vec![via]));
        headers.push(Header::MaxForwards(70));
        let mut from = Address::new(Uri::Sip(SipUri::parse("sip:alice@example.com").unwrap()));
        from.set_tag("alice-tag");
        headers.push(Header::From(from));
        headers.push(Header::To(Address::new(Uri::Sip(
            SipUri::parse("sip:bob@example.com").unwrap(),
        ))));
        headers.push(Header::CallId(SmolStr::new("call-1@pc33.example.com")));
        headers.push(Header::CSeq(CSeq::new(314159, Method::Invite)));
        headers.push(Header::Contact(Contact::Addresses(vec![Address::new(
            Uri::Sip(SipUri::parse("sip:alice@pc33.example.com").unwrap()),
        )])));
        Request::new(
            RequestLine::new(
                Method::Invite,
                Uri::Sip(SipUri::parse("sip:bob@example.com").unwrap()),
            ),
            headers,
            Bytes::new(),
        )
    }

    fn response_to(request: &Request, code: u16, record_routes: &[&str]) -> Response {
        let mut headers = Headers::new();
        let vias: Vec<Via> = request.headers().vias().cloned().collect();
        headers.push(Header::Via(vias));
        headers.push(Header::From(request.headers().from().unwrap().clone()));
        let mut to = request.headers().to().unwrap().clone();
        to.set_tag("bob-tag");
        headers.push(Header::To(to));
        headers.push(Header::CallId(request.headers().call_id().unwrap().clone()));
        headers.push(Header::CSeq(request.headers().cseq().unwrap().clone()));
        headers.push(Header::Contact(Contact::Addresses(vec![Address::new(
            Uri::Sip(SipUri::parse("sip:bob@host").unwrap()),
        )])));
        for rr in record_routes {
            headers.push(Header::RecordRoute(vec![Address::new(Uri::Sip(
                SipUri::parse(rr).unwrap(),
            ))]));
        }
        Response::new(StatusLine::new(code, "Test").unwrap(), headers, Bytes::new())
    }

    #[test]
    fn uac_dialog_from_provisional_is_early() {
        let invite = invite_request();
        let dialog = Dialog::new_client(&invite, &response_to(&invite, 180, &[])).unwrap();
        assert_eq!(dialog.state(), DialogState::Early);
        assert_eq!(dialog.id().call_id.as_str(), "call-1@pc33.example.com");
        assert_eq!(dialog.id().local_tag.as_str(), "alice-tag");
        assert_eq!(dialog.id().remote_tag.as_str(), "bob-tag");
        assert_eq!(dialog.local_seq(), Some(314159));
        assert_eq!(dialog.remote_seq(), None);
        assert!(!dialog.is_secure());
    }

    #[test]
    fn uac_dialog_from_2xx_is_confirmed_and_reverses_routes() {
        let invite = invite_request();
        let response = response_to(&invite, 200, &["sip:proxy1;lr", "sip:proxy2;lr"]);
        let dialog = Dialog::new_client(&invite, &response).unwrap();
        assert_eq!(dialog.state(), DialogState::Confirmed);
        let routes: Vec<String> = dialog.route_set().iter().map(|u| u.to_string()).collect();
        assert_eq!(routes, vec!["sip:proxy2;lr", "sip:proxy1;lr"]);
        assert_eq!(dialog.remote_target().to_string(), "sip:bob@host");
    }

    #[test]
    fn uas_dialog_keeps_route_order_and_remote_seq() {
        let mut invite = invite_request();
        invite.headers_mut().push(Header::RecordRoute(vec![
            Address::new(Uri::Sip(SipUri::parse("sip:proxy1;lr").unwrap())),
            Address::new(Uri::Sip(SipUri::parse("sip:proxy2;lr").unwrap())),
        ]));
        let response = response_to(&invite, 200, &[]);
        let dialog = Dialog::new_server(&invite, &response).unwrap();

        assert_eq!(dialog.id().local_tag.as_str(), "bob-tag");
        assert_eq!(dialog.id().remote_tag.as_str(), "alice-tag");
        let routes: Vec<String> = dialog.route_set().iter().map(|u| u.to_string()).collect();
        assert_eq!(routes, vec!["sip:proxy1;lr", "sip:proxy2;lr"]);
        assert_eq!(dialog.remote_seq(), Some(314159));
        assert_eq!(dialog.local_seq(), None);
        assert_eq!(
            dialog.remote_target().to_string(),
            "sip:alice@pc33.example.com"
        );
    }

    #[test]
    fn error_responses_create_no_dialog() {
        let invite = invite_request();
        let err = Dialog::new_client(&invite, &response_to(&invite, 486, &[])).unwrap_err();
        assert_eq!(err, DialogError::NoDialog(486));
    }

    #[test]
    fn sips_request_uri_marks_dialog_secure() {
        let mut invite = invite_request();
        invite.set_uri(Uri::Sip(SipUri::parse("sips:bob@example.com").unwrap()));
        let dialog = Dialog::new_client(&invite, &response_to(&invite, 200, &[])).unwrap();
        assert!(dialog.is_secure());
    }

    fn confirmed_dialog_with_routes(routes: &[&str]) -> Dialog {
        let invite = invite_request();
        let response = response_to(&invite, 200, routes);
        let mut dialog = Dialog::new_client(&invite, &response).unwrap();
        // new_client reversed them; tests want the stored order to equal
        // the argument order, so re-reverse here.
        dialog.route_set.reverse();
        dialog
    }

    #[test]
    fn loose_route_set_keeps_remote_target_as_request_uri() {
        let mut dialog = confirmed_dialog_with_routes(&["sip:proxy1;lr", "sip:proxy2;lr"]);
        let request = dialog.create_request(Method::Bye).unwrap();

        assert_eq!(request.uri().to_string(), "sip:bob@host");
        let routes: Vec<String> = request
            .headers()
            .routes()
            .map(|a| a.to_string())
            .collect();
        assert_eq!(routes, vec!["<sip:proxy1;lr>", "<sip:proxy2;lr>"]);
    }

    #[test]
    fn strict_first_route_becomes_request_uri() {
        let mut dialog = confirmed_dialog_with_routes(&["sip:strict", "sip:proxy2;lr"]);
        let request = dialog.create_request(Method::Bye).unwrap();

        assert_eq!(request.uri().to_string(), "sip:strict");
        let routes: Vec<String> = request
            .headers()
            .routes()
            .map(|a| a.to_string())
            .collect();
        assert_eq!(routes, vec!["<sip:proxy2;lr>", "sip:bob@host"]);
    }

    #[test]
    fn empty_route_set_goes_straight_to_remote_target() {
        let invite = invite_request();
        let mut dialog = Dialog::new_client(&invite, &response_to(&invite, 200, &[])).unwrap();
        let request = dialog.create_request(Method::Bye).unwrap();
        assert_eq!(request.uri().to_string(), "sip:bob@host");
        assert_eq!(request.headers().routes().count(), 0);
    }

    #[test]
    fn in_dialog_requests_carry_dialog_identity() {
        let invite = invite_request();
        let mut dialog = Dialog::new_client(&invite, &response_to(&invite, 200, &[])).unwrap();
        let request = dialog.create_request(Method::Bye).unwrap();

        let headers = request.headers();
        assert_eq!(headers.max_forwards(), Some(70));
        assert_eq!(
            headers.call_id().map(|c| c.as_str()),
            Some("call-1@pc33.example.com")
        );
        assert_eq!(
            headers.from().and_then(|f| f.tag()).map(|t| t.as_str()),
            Some("alice-tag")
        );
        assert_eq!(
            headers.to().and_then(|t| t.tag()).map(|t| t.as_str()),
            Some("bob-tag")
        );
        let cseq = headers.cseq().unwrap();
        assert_eq!(cseq.method, Method::Bye);
        assert_eq!(cseq.sequence, 314160);
    }

    #[test]
    fn generic_builder_refuses_ack_and_cancel() {
        let invite = invite_request();
        let mut dialog = Dialog::new_client(&invite, &response_to(&invite, 200, &[])).unwrap();
        assert_eq!(
            dialog.create_request(Method::Ack).unwrap_err(),
            DialogError::RequiresDedicatedBuilder(Method::Ack)
        );
        assert_eq!(
            dialog.create_request(Method::Cancel).unwrap_err(),
            DialogError::RequiresDedicatedBuilder(Method::Cancel)
        );
    }

    #[test]
    fn ack_reuses_invite_cseq_and_copies_credentials() {
        let mut invite = invite_request();
        let mut auth = sipwire_core::Auth::new("Digest");
        auth.params.set("username", "alice");
        invite.headers_mut().push(Header::Authorization(auth));

        let mut dialog = Dialog::new_client(&invite, &response_to(&invite, 200, &[])).unwrap();
        // An unrelated request first, to move the local sequence along.
        let _ = dialog.create_request(Method::Options).unwrap();

        let ack = dialog.create_ack(&invite).unwrap();
        let cseq = ack.headers().cseq().unwrap();
        assert_eq!(cseq.sequence, 314159, "ACK reuses the INVITE sequence");
        assert_eq!(cseq.method, Method::Ack);
        assert!(ack
            .headers()
            .iter()
            .any(|h| matches!(h, Header::Authorization(_))));
    }

    #[test]
    fn ack_requires_an_invite() {
        let invite = invite_request();
        let mut dialog = Dialog::new_client(&invite, &response_to(&invite, 200, &[])).unwrap();
        let mut bye = invite_request();
        if let Some(Header::CSeq(cseq)) = bye
            .headers_mut()
            .iter_mut()
            .find(|h| matches!(h, Header::CSeq(_)))
        {
            cseq.method = Method::Bye;
        }
        let bye = Request::new(
            RequestLine::new(Method::Bye, bye.uri().clone()),
            bye.headers().clone(),
            Bytes::new(),
        );
        assert_eq!(
            dialog.create_ack(&bye).unwrap_err(),
            DialogError::NotAnInvite(Method::Bye)
        );
    }

    #[test]
    fn uas_local_seq_seeds_randomly_then_increments() {
        let invite = invite_request();
        let response = response_to(&invite, 200, &[]);
        let mut dialog = Dialog::new_server(&invite, &response).unwrap();

        let first = dialog.next_local_seq();
        assert!((1..=0xFFFF).contains(&first));
        assert_eq!(dialog.next_local_seq(), first + 1);
        assert_eq!(dialog.next_local_seq(), first + 2);
    }

    #[test]
    fn state_walk_early_confirmed_terminated() {
        let invite = invite_request();
        let mut dialog = Dialog::new_client(&invite, &response_to(&invite, 180, &[])).unwrap();
        assert_eq!(dialog.state(), DialogState::Early);

        dialog.apply_response(&Method::Invite, &response_to(&invite, 200, &[]));
        assert_eq!(dialog.state(), DialogState::Confirmed);

        dialog.apply_response(&Method::Bye, &response_to(&invite, 200, &[]));
        assert_eq!(dialog.state(), DialogState::Terminated);
    }

    #[test]
    fn non_2xx_final_terminates_early_dialog() {
        let invite = invite_request();
        let mut dialog = Dialog::new_client(&invite, &response_to(&invite, 180, &[])).unwrap();
        dialog.apply_response(&Method::Invite, &response_to(&invite, 487, &[]));
        assert_eq!(dialog.state(), DialogState::Terminated);
    }

    #[test]
    fn provisional_responses_do_not_change_state() {
        let invite = invite_request();
        let mut dialog = Dialog::new_client(&invite, &response_to(&invite, 180, &[])).unwrap();
        dialog.apply_response(&Method::Invite, &response_to(&invite, 183, &[]));
        assert_eq!(dialog.state(), DialogState::Early);
    }

    #[test]
    fn transport_error_terminates() {
        let invite = invite_request();
        let mut dialog = Dialog::new_client(&invite, &response_to(&invite, 200, &[])).unwrap();
        dialog.on_transaction_error();
        assert_eq!(dialog.state(), DialogState::Terminated);
    }

    #[test]
    fn dialog_id_is_stable_across_its_lifetime() {
        let invite = invite_request();
        let mut dialog = Dialog::new_client(&invite, &response_to(&invite, 180, &[])).unwrap();
        let id = dialog.id().clone();

        dialog.apply_response(&Method::Invite, &response_to(&invite, 200, &[]));
        let _ = dialog.create_request(Method::Options).unwrap();
        dialog.terminate();
        assert_eq!(dialog.id(), &id);
    }

    fn peer_bye(dialog: &Dialog, sequence: u32) -> Request {
        let mut headers = Headers::new();
        headers.push(Header::MaxForwards(70));
        let mut from = Address::new(dialog.remote_uri().clone());
        from.set_tag(dialog.id().remote_tag.clone());
        headers.push(Header::From(from));
        let mut to = Address::new(dialog.local_uri().clone());
        to.set_tag(dialog.id().local_tag.clone());
        headers.push(Header::To(to));
        headers.push(Header::CallId(dialog.id().call_id.clone()));
        headers.push(Header::CSeq(CSeq::new(sequence, Method::Bye)));
        Request::new(
            RequestLine::new(Method::Bye, dialog.local_uri().clone()),
            headers,
            Bytes::new(),
        )
    }

    #[test]
    fn remote_cseq_must_increase() {
        let invite = invite_request();
        let response = response_to(&invite, 200, &[]);
        let mut dialog = Dialog::new_server(&invite, &response).unwrap();
        assert_eq!(dialog.remote_seq(), Some(314159));

        let stale = peer_bye(&dialog, 314159);
        assert_eq!(
            dialog.apply_request(&stale).unwrap_err(),
            DialogError::OutOfOrderCSeq
        );

        let fresh = peer_bye(&dialog, 314160);
        dialog.apply_request(&fresh).unwrap();
        assert_eq!(dialog.remote_seq(), Some(314160));
        assert_eq!(dialog.state(), DialogState::Terminated);
    }

    #[test]
    fn incoming_request_matching_swaps_tags() {
        let invite = invite_request();
        let mut dialog = Dialog::new_client(&invite, &response_to(&invite, 200, &[])).unwrap();
        let bye = peer_bye(&dialog, 2);
        assert!(dialog.matches_request(&bye));

        let dialogs = DialogSet::new();
        let id = dialog.id().clone();
        dialogs.insert(dialog);
        assert!(dialogs.find_by_request(&bye).is_some());
        assert_eq!(dialogs.get(&id).unwrap().state(), DialogState::Confirmed);
    }

    #[test]
    fn dialog_set_sweeps_terminated() {
        let invite = invite_request();
        let dialog = Dialog::new_client(&invite, &response_to(&invite, 200, &[])).unwrap();
        let id = dialog.id().clone();
        let dialogs = DialogSet::new();
        dialogs.insert(dialog);

        assert_eq!(dialogs.sweep_terminated(), 0);
        dialogs.with_dialog(&id, |dialog| dialog.terminate());
        assert_eq!(dialogs.sweep_terminated(), 1);
        assert!(dialogs.is_empty());
    }
}
