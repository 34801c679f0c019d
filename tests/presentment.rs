use anyhow::Result;
use tokio::sync::broadcast;
use uuid::Uuid;

use mdoc_presentment::config::UntrustedVerifierPolicy;
use mdoc_presentment::definitions::device_response::DocumentErrorCode;
use mdoc_presentment::definitions::DeviceAuth;
use mdoc_presentment::presentation::{
    Claim, Error, PresentmentSession, Prompt, SessionState, Transition, TrustDecision,
};
use mdoc_presentment::transport::loopback::LoopbackMedium;
use mdoc_presentment::PresentmentConfig;

use crate::common::{
    ble, held_document, presentment_session, wait_for_state, ReaderIdentity, SimulatedVerifier,
    DOC_TYPE, NAMESPACE,
};

mod common;

fn drain(transitions: &mut broadcast::Receiver<Transition>) -> Vec<SessionState> {
    let mut states = Vec::new();
    while let Ok(transition) = transitions.try_recv() {
        states.push(transition.to);
    }
    states
}

async fn engage(
    session: &PresentmentSession,
    medium: &LoopbackMedium,
) -> Result<SimulatedVerifier> {
    let engagement = session.start(vec![ble(Uuid::new_v4())]).await?;
    SimulatedVerifier::connect(medium, &engagement.qr_code_uri).await
}

#[test_log::test(tokio::test)]
async fn consent_discloses_exactly_the_approved_claim() -> Result<()> {
    let medium = LoopbackMedium::new();
    let reader = ReaderIdentity::issue()?;
    let session = presentment_session(
        &medium,
        PresentmentConfig::default(),
        vec![held_document(
            DOC_TYPE,
            "Driving licence",
            &["family_name", "birth_date", "age_over_21"],
        )],
        vec![reader.trust_point()?],
    )?;
    let mut transitions = session.transitions();

    let mut verifier = engage(&session, &medium).await?;
    verifier
        .request(DOC_TYPE, &["family_name", "age_over_21"], Some(&reader))
        .await?;
    wait_for_state(&session, SessionState::WaitingForConsent).await?;

    let Some(Prompt::Consent(candidate)) = session.prompt() else {
        panic!("expected a consent prompt");
    };
    assert!(candidate.request.trust.is_trusted());
    assert_eq!(
        candidate.request.trust.trust_point().unwrap().display_name,
        "Test Reader Root"
    );
    assert_eq!(candidate.available_claims().len(), 2);

    session
        .approve(vec![Claim::new(NAMESPACE, "age_over_21")])
        .await?;
    assert_eq!(session.state(), SessionState::Completed);

    let response = verifier.receive_response().await?;
    assert_eq!(
        response.disclosed_claims(),
        vec![(NAMESPACE.to_string(), "age_over_21".to_string())]
    );
    let document = response.documents.as_ref().unwrap().first();
    assert_eq!(
        document.errors.as_ref().unwrap()[NAMESPACE]["family_name"],
        DocumentErrorCode::DataNotReturned
    );
    assert_eq!(session.last_response(), Some(response));
    assert_eq!(session.last_error(), None);
    assert!(verifier.is_hung_up().await);

    assert_eq!(
        drain(&mut transitions),
        vec![
            SessionState::Connecting,
            SessionState::WaitingForSource,
            SessionState::Processing,
            SessionState::WaitingForConsent,
            SessionState::Completed,
        ]
    );

    session.reset().await;
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.last_response(), None);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn no_matching_document_returns_to_idle_without_a_response() -> Result<()> {
    let medium = LoopbackMedium::new();
    let session = presentment_session(
        &medium,
        PresentmentConfig::default(),
        vec![held_document(DOC_TYPE, "Driving licence", &["family_name"])],
        vec![],
    )?;
    let mut transitions = session.transitions();

    let mut verifier = engage(&session, &medium).await?;
    verifier
        .request("org.example.membership", &["member_id"], None)
        .await?;
    assert!(verifier.is_hung_up().await);
    wait_for_state(&session, SessionState::Idle).await?;

    assert_eq!(session.last_error(), Some(Error::NoMatchingDocument));
    assert_eq!(session.last_response(), None);
    assert_eq!(
        drain(&mut transitions),
        vec![
            SessionState::Connecting,
            SessionState::WaitingForSource,
            SessionState::Processing,
            SessionState::Idle,
        ]
    );
    Ok(())
}

#[test_log::test(tokio::test)]
async fn reset_while_connecting_stops_advertising() -> Result<()> {
    let medium = LoopbackMedium::new();
    let session = presentment_session(&medium, PresentmentConfig::default(), vec![], vec![])?;
    let uuid = Uuid::new_v4();

    let engagement = session.start(vec![ble(uuid)]).await?;
    assert_eq!(session.state(), SessionState::Connecting);
    assert_eq!(
        session.start(vec![ble(Uuid::new_v4())]).await,
        Err(Error::SessionAlreadyActive)
    );

    session.reset().await;
    assert_eq!(session.state(), SessionState::Idle);
    assert!(!medium.is_advertising(uuid).await);
    assert!(SimulatedVerifier::connect(&medium, &engagement.qr_code_uri)
        .await
        .is_err());

    // A fresh start after a reset advertises again.
    session.start(vec![ble(uuid)]).await?;
    assert!(medium.is_advertising(uuid).await);
    session.reset().await;
    Ok(())
}

#[test_log::test(tokio::test)]
async fn forged_reader_chain_ends_the_session() -> Result<()> {
    let medium = LoopbackMedium::new();
    let trusted = ReaderIdentity::issue()?;
    let impostor = ReaderIdentity::issue()?;
    let session = presentment_session(
        &medium,
        PresentmentConfig::default(),
        vec![held_document(DOC_TYPE, "Driving licence", &["family_name"])],
        vec![trusted.trust_point()?],
    )?;

    let mut verifier = engage(&session, &medium).await?;
    verifier
        .request(DOC_TYPE, &["family_name"], Some(&impostor))
        .await?;
    assert!(verifier.is_hung_up().await);
    wait_for_state(&session, SessionState::Idle).await?;
    assert!(matches!(session.last_error(), Some(Error::ChainInvalid(_))));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn untrusted_verifiers_follow_the_policy() -> Result<()> {
    let medium = LoopbackMedium::new();
    let stranger = ReaderIdentity::issue()?;
    let documents = vec![held_document(DOC_TYPE, "Driving licence", &["family_name"])];

    let blocking = presentment_session(
        &medium,
        PresentmentConfig {
            untrusted_verifier: UntrustedVerifierPolicy::Block,
            ..Default::default()
        },
        documents.clone(),
        vec![],
    )?;
    let mut verifier = engage(&blocking, &medium).await?;
    verifier
        .request(DOC_TYPE, &["family_name"], Some(&stranger))
        .await?;
    assert!(verifier.is_hung_up().await);
    wait_for_state(&blocking, SessionState::Idle).await?;
    assert_eq!(blocking.last_error(), Some(Error::UntrustedVerifier));

    let warning = presentment_session(&medium, PresentmentConfig::default(), documents, vec![])?;
    let mut verifier = engage(&warning, &medium).await?;
    verifier
        .request(DOC_TYPE, &["family_name"], Some(&stranger))
        .await?;
    wait_for_state(&warning, SessionState::WaitingForConsent).await?;
    let Some(Prompt::Consent(candidate)) = warning.prompt() else {
        panic!("expected a consent prompt");
    };
    assert_eq!(candidate.request.trust, TrustDecision::Untrusted);
    assert!(candidate.request.reader_chain.is_some());
    warning.reset().await;
    assert!(verifier.is_hung_up().await);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn several_candidates_ask_for_a_document_first() -> Result<()> {
    let medium = LoopbackMedium::new();
    let personal = held_document(DOC_TYPE, "Personal licence", &["family_name"]);
    let work = held_document(DOC_TYPE, "Work licence", &["family_name"]);
    let work_id = work.id;
    let session = presentment_session(
        &medium,
        PresentmentConfig::default(),
        vec![personal, work],
        vec![],
    )?;

    let mut verifier = engage(&session, &medium).await?;
    verifier.request(DOC_TYPE, &["family_name"], None).await?;
    wait_for_state(&session, SessionState::WaitingForDocumentSelection).await?;
    let Some(Prompt::SelectDocument { candidates }) = session.prompt() else {
        panic!("expected a document selection prompt");
    };
    assert_eq!(candidates.len(), 2);

    assert_eq!(
        session.approve(vec![]).await,
        Err(Error::UnexpectedAction {
            action: "approve",
            state: SessionState::WaitingForDocumentSelection
        })
    );
    let unknown = Uuid::new_v4();
    assert_eq!(
        session.select_document(unknown).await,
        Err(Error::UnknownCandidate(unknown))
    );
    session.select_document(work_id).await?;
    assert_eq!(session.state(), SessionState::WaitingForConsent);
    let Some(Prompt::Consent(candidate)) = session.prompt() else {
        panic!("expected a consent prompt");
    };
    assert_eq!(candidate.document.display_name, "Work licence");

    session
        .approve(vec![Claim::new(NAMESPACE, "family_name")])
        .await?;
    let response = verifier.receive_response().await?;
    let document = response.documents.as_ref().unwrap().first();
    let item = &document.issuer_signed.namespaces.as_ref().unwrap()[NAMESPACE][0];
    assert_eq!(
        item.as_ref().element_value,
        ciborium::Value::Text("Work licence family_name".into())
    );
    Ok(())
}

#[test_log::test(tokio::test)]
async fn declining_sends_nothing() -> Result<()> {
    let medium = LoopbackMedium::new();
    let session = presentment_session(
        &medium,
        PresentmentConfig::default(),
        vec![held_document(DOC_TYPE, "Driving licence", &["family_name", "portrait"])],
        vec![],
    )?;

    let mut verifier = engage(&session, &medium).await?;
    verifier.request(DOC_TYPE, &["family_name"], None).await?;
    wait_for_state(&session, SessionState::WaitingForConsent).await?;

    assert_eq!(
        session
            .approve(vec![Claim::new(NAMESPACE, "portrait")])
            .await,
        Err(Error::ClaimNotRequested(Claim::new(NAMESPACE, "portrait")))
    );
    assert_eq!(session.state(), SessionState::WaitingForConsent);

    session.decline().await?;
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.last_error(), Some(Error::Declined));
    assert_eq!(session.last_response(), None);
    assert!(verifier.is_hung_up().await);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn verifier_termination_during_consent_aborts() -> Result<()> {
    let medium = LoopbackMedium::new();
    let session = presentment_session(
        &medium,
        PresentmentConfig::default(),
        vec![held_document(DOC_TYPE, "Driving licence", &["family_name"])],
        vec![],
    )?;

    let mut verifier = engage(&session, &medium).await?;
    verifier.request(DOC_TYPE, &["family_name"], None).await?;
    wait_for_state(&session, SessionState::WaitingForConsent).await?;
    verifier.terminate().await?;

    wait_for_state(&session, SessionState::Idle).await?;
    assert_eq!(session.last_error(), Some(Error::ConnectionAborted));
    assert!(session.prompt().is_none());
    assert_eq!(session.approve(vec![]).await, Err(Error::NoActiveSession));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn second_request_is_a_protocol_violation() -> Result<()> {
    let medium = LoopbackMedium::new();
    let session = presentment_session(
        &medium,
        PresentmentConfig::default(),
        vec![held_document(DOC_TYPE, "Driving licence", &["family_name"])],
        vec![],
    )?;

    let mut verifier = engage(&session, &medium).await?;
    verifier.request(DOC_TYPE, &["family_name"], None).await?;
    wait_for_state(&session, SessionState::WaitingForConsent).await?;
    verifier.request(DOC_TYPE, &["family_name"], None).await?;

    wait_for_state(&session, SessionState::Idle).await?;
    assert!(matches!(
        session.last_error(),
        Some(Error::ProtocolViolation(_))
    ));
    assert_eq!(session.last_response(), None);
    assert!(session.prompt().is_none());
    assert!(verifier.is_hung_up().await);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn reset_while_waiting_for_source_closes_the_connection() -> Result<()> {
    let medium = LoopbackMedium::new();
    let session = presentment_session(&medium, PresentmentConfig::default(), vec![], vec![])?;
    let mut transitions = session.transitions();

    let mut verifier = engage(&session, &medium).await?;
    wait_for_state(&session, SessionState::WaitingForSource).await?;
    session.reset().await;

    assert_eq!(session.state(), SessionState::Idle);
    assert!(verifier.is_hung_up().await);
    assert_eq!(
        drain(&mut transitions),
        vec![
            SessionState::Connecting,
            SessionState::WaitingForSource,
            SessionState::Idle,
        ]
    );
    Ok(())
}

#[test_log::test(tokio::test)]
async fn key_agreement_mode_answers_with_a_detached_mac() -> Result<()> {
    let medium = LoopbackMedium::new();
    let session = presentment_session(
        &medium,
        PresentmentConfig {
            prefer_signature_to_key_agreement: false,
            ..Default::default()
        },
        vec![held_document(DOC_TYPE, "Driving licence", &["family_name"])],
        vec![],
    )?;

    let mut verifier = engage(&session, &medium).await?;
    verifier.request(DOC_TYPE, &["family_name"], None).await?;
    wait_for_state(&session, SessionState::WaitingForConsent).await?;
    session
        .approve(vec![Claim::new(NAMESPACE, "family_name")])
        .await?;
    assert_eq!(session.state(), SessionState::Completed);

    let response = verifier.receive_response().await?;
    let document = response.documents.as_ref().unwrap().first();
    let DeviceAuth::DeviceMac(mac0) = &document.device_signed.device_auth else {
        panic!("expected a device MAC");
    };
    assert_eq!(mac0.payload, None);
    assert_eq!(mac0.tag.len(), 32);
    Ok(())
}
