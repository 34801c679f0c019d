//! Holder-side presentment: the engagement shown to the verifier, the session state machine
//! driving one exchange, trust evaluation of the verifier and the response built from the user's
//! consent.
pub mod credential;
pub mod device;
pub mod engagement;
pub mod presentment;
pub mod trust;

use uuid::Uuid;

use crate::definitions::session;
use crate::transport;

pub use credential::{Credential, CredentialKey, DocumentStore, HeldDocument, InMemoryDocumentStore};
pub use device::{PresentmentSession, Prompt, SessionState, Transition};
pub use engagement::Engagement;
pub use presentment::{Candidate, Claim, MatchResult, PresentmentCoordinator};
pub use trust::{TrustDecision, TrustEvaluator};

/// Why an operation failed, or why a session went back to [SessionState::Idle].
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("malformed device engagement: {0}")]
    MalformedEngagement(String),
    #[error("a presentment session is already active")]
    SessionAlreadyActive,
    #[error("no presentment session is active")]
    NoActiveSession,
    #[error("no verifier connected before the deadline")]
    ConnectionTimeout,
    #[error("the verifier went away")]
    ConnectionAborted,
    #[error(transparent)]
    Transport(transport::Error),
    #[error(transparent)]
    Session(#[from] session::Error),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("verifier certificate chain is invalid: {0}")]
    ChainInvalid(String),
    #[error("verifier is not trusted")]
    UntrustedVerifier,
    #[error("no held document matches the request")]
    NoMatchingDocument,
    #[error("document {0} has no credential usable for device authentication")]
    NoEligibleCredential(Uuid),
    #[error("{0} was not requested")]
    ClaimNotRequested(Claim),
    #[error("{0} is not one of the offered documents")]
    UnknownCandidate(Uuid),
    #[error("the user declined")]
    Declined,
    #[error("the session was reset")]
    Cancelled,
    #[error("{action} is not possible while {state}")]
    UnexpectedAction {
        action: &'static str,
        state: SessionState,
    },
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: SessionState, to: SessionState },
    #[error("unable to build the response: {0}")]
    Response(String),
}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        match e {
            transport::Error::Closed => Error::ConnectionAborted,
            transport::Error::ConnectionTimeout => Error::ConnectionTimeout,
            other => Error::Transport(other),
        }
    }
}
