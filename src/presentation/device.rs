//! The holder's presentment session.
//!
//! A [PresentmentSession] runs at most one exchange at a time. [PresentmentSession::start]
//! advertises the requested connection methods and returns the engagement to show; the rest of
//! the exchange runs on a spawned task, which moves the session through its states:
//!
//! ```text
//! Idle -> Connecting -> WaitingForSource -> Processing -> WaitingForConsent -> Completed
//!                                              \                   ^
//!                                               -> WaitingForDocumentSelection
//! ```
//!
//! Any state may return to [SessionState::Idle], on failure, on decline or on
//! [PresentmentSession::reset]. Every transition is published to subscribers in order.
use std::fmt;
use std::sync::Arc;

use coset::CborSerializable;
use time::OffsetDateTime;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::UntrustedVerifierPolicy;
use crate::context::AppContext;
use crate::definitions::helpers::{ByteStr, Tag24};
use crate::definitions::session::{
    self, EphemeralKeyPair, Role, SessionCipher, SessionData, SessionEstablishment,
    SessionTranscript,
};
use crate::definitions::x509::validation::ValidationOptions;
use crate::definitions::x509::X5Chain;
use crate::definitions::{ConnectionMethod, DeviceEngagement, DeviceRequest, DeviceResponse};
use crate::transport::{self, AdvertiseOptions, AdvertisedTransport, Transport};

use super::engagement::{self, Engagement};
use super::presentment::{Candidate, Claim, MatchResult, SigningContext, VerifierRequest};
use super::trust::TrustDecision;
use super::Error;

const TRANSITION_CAPACITY: usize = 32;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SessionState {
    #[default]
    Idle,
    /// Advertising; waiting for a verifier to connect.
    Connecting,
    /// Connected; waiting for the session establishment.
    WaitingForSource,
    /// Decrypting the request, evaluating the verifier and matching documents.
    Processing,
    WaitingForDocumentSelection,
    WaitingForConsent,
    /// The response was sent.
    Completed,
}

impl SessionState {
    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (_, Idle)
                | (Idle, Connecting)
                | (Connecting, WaitingForSource)
                | (WaitingForSource, Processing)
                | (Processing, WaitingForDocumentSelection)
                | (Processing, WaitingForConsent)
                | (WaitingForDocumentSelection, WaitingForConsent)
                | (WaitingForConsent, Completed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "IDLE",
            SessionState::Connecting => "CONNECTING",
            SessionState::WaitingForSource => "WAITING_FOR_SOURCE",
            SessionState::Processing => "PROCESSING",
            SessionState::WaitingForDocumentSelection => "WAITING_FOR_DOCUMENT_SELECTION",
            SessionState::WaitingForConsent => "WAITING_FOR_CONSENT",
            SessionState::Completed => "COMPLETED",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
}

/// What the user is being asked, while the session waits on them.
#[derive(Clone, Debug)]
pub enum Prompt {
    /// Several held documents answer the request; pick one with
    /// [PresentmentSession::select_document].
    SelectDocument { candidates: Vec<Candidate> },
    /// Approve a subset of [Candidate::available_claims] with [PresentmentSession::approve], or
    /// decline. The verifier's [TrustDecision] travels with the candidate's request.
    Consent(Candidate),
}

type Reply = oneshot::Sender<Result<(), Error>>;

enum UserAction {
    SelectDocument { id: Uuid, reply: Reply },
    Approve { claims: Vec<Claim>, reply: Reply },
    Decline { reply: Reply },
}

impl UserAction {
    fn name(&self) -> &'static str {
        match self {
            UserAction::SelectDocument { .. } => "select_document",
            UserAction::Approve { .. } => "approve",
            UserAction::Decline { .. } => "decline",
        }
    }

    fn reject(self, state: SessionState) {
        let error = Error::UnexpectedAction {
            action: self.name(),
            state,
        };
        let reply = match self {
            UserAction::SelectDocument { reply, .. }
            | UserAction::Approve { reply, .. }
            | UserAction::Decline { reply } => reply,
        };
        let _ = reply.send(Err(error));
    }
}

/// Observable session state, written by the session and its flow task.
struct Shared {
    state: watch::Sender<SessionState>,
    transitions: broadcast::Sender<Transition>,
    prompt: watch::Sender<Option<Prompt>>,
    last_error: watch::Sender<Option<Error>>,
    last_response: watch::Sender<Option<DeviceResponse>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: watch::channel(SessionState::Idle).0,
            transitions: broadcast::channel(TRANSITION_CAPACITY).0,
            prompt: watch::channel(None).0,
            last_error: watch::channel(None).0,
            last_response: watch::channel(None).0,
        }
    }

    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Move to `next` if that is an edge from the current state. Moving to the current state is a
    /// no-op. The transition is published while the state is still locked, so subscribers see
    /// transitions in the order they happened.
    fn transition(&self, next: SessionState) -> Result<(), Error> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|state| {
            let from = *state;
            if from == next {
                return false;
            }
            if !from.can_transition_to(next) {
                outcome = Err(Error::IllegalTransition { from, to: next });
                return false;
            }
            *state = next;
            tracing::info!("presentment session {from} -> {next}");
            let _ = self.transitions.send(Transition { from, to: next });
            true
        });
        outcome
    }

    fn fail(&self, error: Error) {
        match &error {
            Error::Declined | Error::Cancelled => tracing::info!("presentment ended: {error}"),
            _ => tracing::warn!("presentment failed: {error}"),
        }
        self.prompt.send_replace(None);
        self.last_error.send_replace(Some(error));
        if let Err(e) = self.transition(SessionState::Idle) {
            tracing::error!("{e}");
        }
    }

    fn complete(&self, response: DeviceResponse) -> Result<(), Error> {
        self.prompt.send_replace(None);
        self.last_response.send_replace(Some(response));
        self.transition(SessionState::Completed)
    }
}

struct ActiveSession {
    cancel: watch::Sender<bool>,
    actions: mpsc::Sender<UserAction>,
    flow: JoinHandle<()>,
}

impl ActiveSession {
    /// Stop the flow, if it is still running, and wait for it to release its transports.
    async fn retire(self) {
        let _ = self.cancel.send(true);
        if let Err(e) = self.flow.await {
            tracing::error!("presentment flow ended abnormally: {e}");
        }
    }
}

pub struct PresentmentSession {
    context: Arc<AppContext>,
    shared: Arc<Shared>,
    active: Mutex<Option<ActiveSession>>,
}

impl fmt::Debug for PresentmentSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresentmentSession")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl PresentmentSession {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self {
            context,
            shared: Arc::new(Shared::new()),
            active: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// The current state, and every later one. Intermediate states may be skipped by a slow
    /// observer; use [PresentmentSession::transitions] to see each of them.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Every transition from now on, in order.
    pub fn transitions(&self) -> broadcast::Receiver<Transition> {
        self.shared.transitions.subscribe()
    }

    pub fn prompt(&self) -> Option<Prompt> {
        self.shared.prompt.borrow().clone()
    }

    pub fn subscribe_prompt(&self) -> watch::Receiver<Option<Prompt>> {
        self.shared.prompt.subscribe()
    }

    /// Why the last session went back to [SessionState::Idle]. Cleared by the next start.
    pub fn last_error(&self) -> Option<Error> {
        self.shared.last_error.borrow().clone()
    }

    /// The response sent by the last completed session. Cleared by the next start or a reset.
    pub fn last_response(&self) -> Option<DeviceResponse> {
        self.shared.last_response.borrow().clone()
    }

    /// Start advertising `connection_methods` and return the engagement to show the verifier.
    ///
    /// The session is in [SessionState::Connecting] before any transport is touched. If nothing
    /// can be advertised it goes back to [SessionState::Idle] and the error is returned.
    pub async fn start(&self, connection_methods: Vec<ConnectionMethod>) -> Result<Engagement, Error> {
        let mut active = self.active.lock().await;
        if self.state() != SessionState::Idle {
            return Err(Error::SessionAlreadyActive);
        }
        if connection_methods.is_empty() {
            return Err(Error::MalformedEngagement(
                "no connection methods to advertise".into(),
            ));
        }
        if let Some(finished) = active.take() {
            finished.retire().await;
        }

        self.shared
            .transition(SessionState::Connecting)
            .map_err(|_| Error::SessionAlreadyActive)?;
        self.shared.last_error.send_replace(None);
        self.shared.last_response.send_replace(None);

        match self.bring_up(connection_methods).await {
            Ok((engagement, session)) => {
                *active = Some(session);
                Ok(engagement)
            }
            Err(e) => {
                self.shared.fail(e.clone());
                Err(e)
            }
        }
    }

    async fn bring_up(
        &self,
        connection_methods: Vec<ConnectionMethod>,
    ) -> Result<(Engagement, ActiveSession), Error> {
        let config = self.context.config();
        let key = EphemeralKeyPair::generate();
        let e_device_key_bytes = Tag24::new(key.public_key())
            .map_err(|e| Error::MalformedEngagement(e.to_string()))?;
        let options = AdvertiseOptions {
            ble_ident: session::ble_ident(&e_device_key_bytes)?,
            use_l2cap: config.ble_use_l2cap,
        };

        let mut advertised = self
            .context
            .transports()
            .advertise(&connection_methods, &options)
            .await?;
        let advertised_methods = advertised
            .iter()
            .map(|transport| transport.connection_method().clone())
            .collect();
        let engagement = match engagement::encode(
            key.public_key(),
            advertised_methods,
            &config.engagement_version,
        ) {
            Ok(engagement) => engagement,
            Err(e) => {
                transport::close_all(&mut advertised).await;
                return Err(e);
            }
        };
        tracing::debug!("device engagement: {}", engagement.qr_code_uri);

        let (cancel, cancelled) = watch::channel(false);
        let (actions, action_receiver) = mpsc::channel(4);
        let flow = Flow {
            context: self.context.clone(),
            shared: self.shared.clone(),
            key,
            device_engagement: engagement.device_engagement.clone(),
            advertised,
            cancelled,
            actions: action_receiver,
            pending_reply: None,
        };
        let flow = tokio::spawn(flow.run());
        Ok((
            engagement,
            ActiveSession {
                cancel,
                actions,
                flow,
            },
        ))
    }

    /// Pick one of the candidates offered by [Prompt::SelectDocument].
    pub async fn select_document(&self, id: Uuid) -> Result<(), Error> {
        self.act(
            &[SessionState::WaitingForDocumentSelection],
            "select_document",
            |reply| UserAction::SelectDocument { id, reply },
        )
        .await
    }

    /// Disclose `claims`. Resolves once the response has been sent and the session is
    /// [SessionState::Completed], or with the error that sent it back to [SessionState::Idle].
    /// Claims the verifier did not request are refused and the session keeps waiting.
    pub async fn approve(&self, claims: Vec<Claim>) -> Result<(), Error> {
        self.act(&[SessionState::WaitingForConsent], "approve", |reply| {
            UserAction::Approve { claims, reply }
        })
        .await
    }

    /// Refuse the request. Nothing is sent to the verifier; the connection is closed and the
    /// session returns to [SessionState::Idle].
    pub async fn decline(&self) -> Result<(), Error> {
        self.act(
            &[
                SessionState::WaitingForDocumentSelection,
                SessionState::WaitingForConsent,
            ],
            "decline",
            |reply| UserAction::Decline { reply },
        )
        .await
    }

    async fn act(
        &self,
        expected: &[SessionState],
        action: &'static str,
        build: impl FnOnce(Reply) -> UserAction,
    ) -> Result<(), Error> {
        let actions = self
            .active
            .lock()
            .await
            .as_ref()
            .map(|session| session.actions.clone())
            .ok_or(Error::NoActiveSession)?;
        let state = self.state();
        if state == SessionState::Idle {
            return Err(Error::NoActiveSession);
        }
        if !expected.contains(&state) {
            return Err(Error::UnexpectedAction { action, state });
        }

        let (reply, response) = oneshot::channel();
        actions
            .send(build(reply))
            .await
            .map_err(|_| Error::NoActiveSession)?;
        response.await.map_err(|_| Error::NoActiveSession)?
    }

    /// Abandon any exchange in progress and return to [SessionState::Idle]. Advertising stops and
    /// any connection is closed before this returns. Idempotent.
    pub async fn reset(&self) {
        let mut active = self.active.lock().await;
        if let Some(session) = active.take() {
            session.retire().await;
        }
        self.shared.prompt.send_replace(None);
        self.shared.last_response.send_replace(None);
        if let Err(e) = self.shared.transition(SessionState::Idle) {
            tracing::error!("{e}");
        }
    }
}

/// Resolves once the session is told to stop, or the session itself is gone.
async fn cancellation(cancelled: &mut watch::Receiver<bool>) {
    let _ = cancelled.wait_for(|cancelled| *cancelled).await;
}

async fn connect(
    advertised: &mut [Box<dyn AdvertisedTransport>],
    timeout: Option<std::time::Duration>,
    mut cancelled: watch::Receiver<bool>,
) -> Result<Box<dyn Transport>, Error> {
    tokio::select! {
        connected = transport::wait_for_connection(advertised, timeout) => Ok(connected?),
        _ = cancellation(&mut cancelled) => Err(Error::Cancelled),
    }
}

/// A message from the verifier while the session waits on the user.
fn unexpected_message(message: Result<Vec<u8>, transport::Error>) -> Error {
    let bytes = match message {
        Ok(bytes) => bytes,
        Err(e) => return e.into(),
    };
    match SessionData::from_slice(&bytes) {
        Ok(SessionData {
            status: Some(session::Status::SessionTermination),
            ..
        }) => {
            tracing::info!("verifier terminated the session");
            Error::ConnectionAborted
        }
        _ => Error::ProtocolViolation("verifier sent a message before the response".into()),
    }
}

/// One exchange, from advertising to the response.
struct Flow {
    context: Arc<AppContext>,
    shared: Arc<Shared>,
    key: EphemeralKeyPair,
    device_engagement: Tag24<DeviceEngagement>,
    advertised: Vec<Box<dyn AdvertisedTransport>>,
    cancelled: watch::Receiver<bool>,
    actions: mpsc::Receiver<UserAction>,
    /// The approve or decline that ended the user's part, answered with the final outcome.
    pending_reply: Option<Reply>,
}

impl Flow {
    async fn run(mut self) {
        let mut advertised = std::mem::take(&mut self.advertised);
        let connected = connect(
            &mut advertised,
            self.context.config().connection_timeout(),
            self.cancelled.clone(),
        )
        .await;
        transport::close_all(&mut advertised).await;
        drop(advertised);

        let result = match connected {
            Ok(mut transport) => {
                let exchanged = self.exchange(transport.as_mut()).await;
                transport.close().await;
                exchanged.and_then(|response| self.shared.complete(response))
            }
            Err(e) => Err(e),
        };

        let reply = match result {
            Ok(()) => {
                tracing::info!("presentment completed");
                Ok(())
            }
            Err(Error::Declined) => {
                self.shared.fail(Error::Declined);
                Ok(())
            }
            Err(e) => {
                self.shared.fail(e.clone());
                Err(e)
            }
        };
        if let Some(pending) = self.pending_reply.take() {
            let _ = pending.send(reply);
        }
    }

    async fn exchange(&mut self, transport: &mut dyn Transport) -> Result<DeviceResponse, Error> {
        self.shared.transition(SessionState::WaitingForSource)?;
        let message = {
            let mut cancelled = self.cancelled.clone();
            tokio::select! {
                message = transport.receive() => message?,
                _ = cancellation(&mut cancelled) => return Err(Error::Cancelled),
            }
        };
        self.shared.transition(SessionState::Processing)?;

        let establishment = SessionEstablishment::from_slice(&message).map_err(|e| {
            Error::ProtocolViolation(format!("expected a session establishment: {e}"))
        })?;
        let e_reader_key = establishment.e_reader_key.as_ref().clone();
        let shared_secret = self.key.diffie_hellman(&e_reader_key)?;
        let session_transcript =
            SessionTranscript::new(self.device_engagement.clone(), establishment.e_reader_key);
        let mut cipher = SessionCipher::new(Role::Device, &shared_secret, &session_transcript)?;
        let request = cipher.decrypt(establishment.data.as_ref())?;
        let device_request = DeviceRequest::from_slice(&request)
            .map_err(|e| Error::ProtocolViolation(format!("undecodable device request: {e}")))?;
        if !device_request.version.starts_with("1.") {
            return Err(Error::ProtocolViolation(format!(
                "unsupported device request version {}",
                device_request.version
            )));
        }

        let requests = self.evaluate(&device_request, &session_transcript)?;
        let documents = self.context.documents().documents();
        let (candidate, selected) = match self
            .context
            .coordinator()
            .match_requests(&requests, &documents)
        {
            MatchResult::None => return Err(Error::NoMatchingDocument),
            MatchResult::Single(candidate) => (candidate, None),
            MatchResult::Multiple(candidates) => {
                let (candidate, reply) = self.select_document(transport, candidates).await?;
                (candidate, Some(reply))
            }
        };
        let approved = self.consent(transport, &candidate, selected).await?;

        let config = self.context.config();
        let signing = SigningContext {
            session_transcript,
            e_reader_key,
            prefer_signature_to_key_agreement: config.prefer_signature_to_key_agreement,
            domain: config.domain_mdoc_signature.clone(),
            at: OffsetDateTime::now_utc(),
        };
        let response = self
            .context
            .coordinator()
            .build_response(&candidate, &approved, &signing)?;
        let encoded = response
            .clone()
            .to_vec()
            .map_err(|e| Error::Response(e.to_string()))?;
        let session_data = SessionData {
            data: Some(ByteStr::from(cipher.encrypt(&encoded)?)),
            status: None,
        };
        let message = session_data
            .to_vec()
            .map_err(|e| Error::Response(e.to_string()))?;
        transport.send(&message).await?;
        tracing::info!("response sent for {}", candidate.document.doc_type);
        Ok(response)
    }

    /// Evaluate the verifier behind every document request. An invalid chain ends the session, as
    /// does an untrusted verifier when the policy is to block them.
    fn evaluate(
        &self,
        device_request: &DeviceRequest,
        session_transcript: &SessionTranscript,
    ) -> Result<Vec<VerifierRequest>, Error> {
        let options = ValidationOptions::default();
        let policy = self.context.config().untrusted_verifier;
        device_request
            .doc_requests
            .iter()
            .map(|doc_request| {
                let trust = self.context.trust().evaluate_request(
                    doc_request,
                    session_transcript,
                    &options,
                );
                match &trust {
                    TrustDecision::ChainInvalid(reason) => {
                        return Err(Error::ChainInvalid(reason.clone()))
                    }
                    TrustDecision::Untrusted if policy == UntrustedVerifierPolicy::Block => {
                        return Err(Error::UntrustedVerifier)
                    }
                    TrustDecision::Untrusted => {
                        tracing::warn!("continuing with an untrusted verifier")
                    }
                    TrustDecision::Trusted(_) => {}
                }
                let reader_chain = doc_request
                    .reader_auth
                    .as_ref()
                    .and_then(|reader_auth| X5Chain::from_cose_sign1(reader_auth).ok().flatten());
                Ok(VerifierRequest {
                    items_request: doc_request.items_request.as_ref().clone(),
                    reader_chain,
                    trust,
                })
            })
            .collect()
    }

    /// Wait for the user. The verifier should stay silent meanwhile; a termination from it means
    /// it gave up, anything else is a protocol violation.
    async fn next_action(&mut self, transport: &mut dyn Transport) -> Result<UserAction, Error> {
        let mut cancelled = self.cancelled.clone();
        tokio::select! {
            action = self.actions.recv() => action.ok_or(Error::Cancelled),
            message = transport.receive() => Err(unexpected_message(message)),
            _ = cancellation(&mut cancelled) => Err(Error::Cancelled),
        }
    }

    async fn select_document(
        &mut self,
        transport: &mut dyn Transport,
        candidates: Vec<Candidate>,
    ) -> Result<(Candidate, Reply), Error> {
        self.shared.prompt.send_replace(Some(Prompt::SelectDocument {
            candidates: candidates.clone(),
        }));
        self.shared
            .transition(SessionState::WaitingForDocumentSelection)?;
        loop {
            match self.next_action(transport).await? {
                UserAction::SelectDocument { id, reply } => {
                    match candidates.iter().find(|c| c.document.id == id) {
                        Some(candidate) => return Ok((candidate.clone(), reply)),
                        None => {
                            let _ = reply.send(Err(Error::UnknownCandidate(id)));
                        }
                    }
                }
                UserAction::Decline { reply } => {
                    self.pending_reply = Some(reply);
                    return Err(Error::Declined);
                }
                other => other.reject(SessionState::WaitingForDocumentSelection),
            }
        }
    }

    /// Ask for consent to disclose from `candidate`. `selected` is the pending document selection,
    /// answered once the session has moved on to consent.
    async fn consent(
        &mut self,
        transport: &mut dyn Transport,
        candidate: &Candidate,
        selected: Option<Reply>,
    ) -> Result<Vec<Claim>, Error> {
        self.shared
            .prompt
            .send_replace(Some(Prompt::Consent(candidate.clone())));
        self.shared.transition(SessionState::WaitingForConsent)?;
        if let Some(reply) = selected {
            let _ = reply.send(Ok(()));
        }
        loop {
            match self.next_action(transport).await? {
                UserAction::Approve { claims, reply } => {
                    if let Some(claim) = claims.iter().find(|c| !candidate.request.is_requested(c)) {
                        let _ = reply.send(Err(Error::ClaimNotRequested(claim.clone())));
                        continue;
                    }
                    self.pending_reply = Some(reply);
                    return Ok(claims);
                }
                UserAction::Decline { reply } => {
                    self.pending_reply = Some(reply);
                    return Err(Error::Declined);
                }
                other => other.reject(SessionState::WaitingForConsent),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::PresentmentConfig;
    use crate::definitions::device_engagement::PeripheralServerMode;
    use crate::definitions::BleOptions;
    use crate::transport::loopback::LoopbackMedium;

    fn ble(uuid: Uuid) -> ConnectionMethod {
        ConnectionMethod::Ble(BleOptions {
            peripheral_server_mode: Some(PeripheralServerMode {
                uuid,
                ble_device_address: None,
            }),
            central_client_mode: None,
            l2cap_psm: None,
        })
    }

    fn session(medium: &LoopbackMedium) -> PresentmentSession {
        let context = AppContext::builder(PresentmentConfig::default())
            .transports(Arc::new(medium.clone()))
            .build()
            .unwrap();
        PresentmentSession::new(context)
    }

    #[test]
    fn transition_table() {
        use SessionState::*;
        let all = [
            Idle,
            Connecting,
            WaitingForSource,
            Processing,
            WaitingForDocumentSelection,
            WaitingForConsent,
            Completed,
        ];
        for state in all {
            assert!(state.can_transition_to(Idle));
        }
        assert!(Idle.can_transition_to(Connecting));
        assert!(Processing.can_transition_to(WaitingForConsent));
        assert!(WaitingForDocumentSelection.can_transition_to(WaitingForConsent));
        assert!(!Idle.can_transition_to(Processing));
        assert!(!Connecting.can_transition_to(Completed));
        assert!(!WaitingForConsent.can_transition_to(WaitingForDocumentSelection));
        assert!(!Completed.can_transition_to(Connecting));
        assert_eq!(
            WaitingForDocumentSelection.to_string(),
            "WAITING_FOR_DOCUMENT_SELECTION"
        );
    }

    #[test]
    fn illegal_transitions_leave_the_state_alone() {
        let shared = Shared::new();
        let mut transitions = shared.transitions.subscribe();
        assert_eq!(
            shared.transition(SessionState::Completed),
            Err(Error::IllegalTransition {
                from: SessionState::Idle,
                to: SessionState::Completed
            })
        );
        assert_eq!(shared.state(), SessionState::Idle);
        shared.transition(SessionState::Connecting).unwrap();
        assert_eq!(
            transitions.try_recv().unwrap(),
            Transition {
                from: SessionState::Idle,
                to: SessionState::Connecting
            }
        );
        assert!(transitions.try_recv().is_err());
    }

    #[test_log::test(tokio::test)]
    async fn start_moves_to_connecting_and_refuses_a_second_start() {
        let medium = LoopbackMedium::new();
        let session = session(&medium);
        let uuid = Uuid::new_v4();

        let engagement = session.start(vec![ble(uuid)]).await.unwrap();
        assert!(engagement.qr_code_uri.starts_with("mdoc:"));
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(medium.is_advertising(uuid).await);

        assert_eq!(
            session.start(vec![ble(Uuid::new_v4())]).await,
            Err(Error::SessionAlreadyActive)
        );
        assert_eq!(session.state(), SessionState::Connecting);

        session.reset().await;
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!medium.is_advertising(uuid).await);
        assert_eq!(session.last_error(), Some(Error::Cancelled));
    }

    #[test_log::test(tokio::test)]
    async fn start_without_methods_stays_idle() {
        let session = session(&LoopbackMedium::new());
        let mut transitions = session.transitions();
        assert!(matches!(
            session.start(vec![]).await,
            Err(Error::MalformedEngagement(_))
        ));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(transitions.try_recv().is_err());
    }

    #[test_log::test(tokio::test)]
    async fn failed_advertising_returns_to_idle() {
        let session = session(&LoopbackMedium::new());
        let mut transitions = session.transitions();
        let unsupported = ConnectionMethod::Nfc(Default::default());
        assert_eq!(
            session.start(vec![unsupported]).await,
            Err(Error::Transport(transport::Error::NothingAdvertised))
        );
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(transitions.recv().await.unwrap().to, SessionState::Connecting);
        assert_eq!(transitions.recv().await.unwrap().to, SessionState::Idle);
        assert_eq!(
            session.last_error(),
            Some(Error::Transport(transport::Error::NothingAdvertised))
        );
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn connection_timeout_returns_to_idle() {
        let medium = LoopbackMedium::new();
        let config = PresentmentConfig {
            connection_timeout_secs: Some(5),
            ..Default::default()
        };
        let context = AppContext::builder(config)
            .transports(Arc::new(medium.clone()))
            .build()
            .unwrap();
        let session = PresentmentSession::new(context);
        let uuid = Uuid::new_v4();
        session.start(vec![ble(uuid)]).await.unwrap();
        let mut state = session.subscribe();

        state
            .wait_for(|state| *state == SessionState::Idle)
            .await
            .unwrap();
        assert_eq!(session.last_error(), Some(Error::ConnectionTimeout));
        assert!(!medium.is_advertising(uuid).await);
    }

    #[test_log::test(tokio::test)]
    async fn user_actions_need_a_waiting_session() {
        let session = session(&LoopbackMedium::new());
        assert_eq!(session.decline().await, Err(Error::NoActiveSession));

        session.start(vec![ble(Uuid::new_v4())]).await.unwrap();
        assert_eq!(
            session.approve(vec![]).await,
            Err(Error::UnexpectedAction {
                action: "approve",
                state: SessionState::Connecting
            })
        );
        session.reset().await;
        session.reset().await;
        assert_eq!(session.state(), SessionState::Idle);
    }
}
