use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use lime_channel::{
    AllowAllAuthenticator, AuthenticationResult, Authenticator, Channel, ChannelConfig,
    ChannelError, ClientNegotiator, ClientSessionOptions, ServerNegotiator, ServerSessionOptions,
};
use lime_core::{
    Authentication, AuthenticationScheme, DomainRole, Envelope, Identity, Node, Session,
    SessionCompression, SessionEncryption, SessionState, reason_codes,
};
use lime_protocol::{InMemoryTransport, Transport};

fn server_node() -> Node {
    Node::parse("postmaster@example.org/server").unwrap()
}

fn alice() -> Identity {
    Identity::parse("alice@example.org").unwrap()
}

async fn expect_session(transport: &InMemoryTransport) -> Session {
    match transport.receive().await.unwrap() {
        Envelope::Session(session) => session,
        other => panic!("expected a session, got {:?}", other),
    }
}

struct PasswordAuthenticator {
    password: &'static str,
}

#[async_trait]
impl Authenticator for PasswordAuthenticator {
    async fn authenticate(
        &self,
        _identity: &Identity,
        authentication: &Authentication,
    ) -> AuthenticationResult {
        match authentication {
            Authentication::Plain { password } if password == self.password => {
                AuthenticationResult::Success(DomainRole::Member)
            }
            _ => AuthenticationResult::Failure,
        }
    }
}

/// Challenges a plain password with a key round before accepting.
struct ChallengingAuthenticator {
    rounds: AtomicUsize,
}

#[async_trait]
impl Authenticator for ChallengingAuthenticator {
    async fn authenticate(
        &self,
        _identity: &Identity,
        authentication: &Authentication,
    ) -> AuthenticationResult {
        self.rounds.fetch_add(1, Ordering::SeqCst);
        match authentication {
            Authentication::Plain { .. } => {
                AuthenticationResult::Challenge(Authentication::key("nonce"))
            }
            Authentication::Key { key } if key == "nonce-signed" => {
                AuthenticationResult::Success(DomainRole::Authority)
            }
            _ => AuthenticationResult::Failure,
        }
    }
}

#[tokio::test]
async fn negotiates_options_and_authenticates() {
    let encryption = vec![SessionEncryption::None, SessionEncryption::Tls];
    let (client_end, server_end) = InMemoryTransport::pair(16);
    let client_transport = Arc::new(client_end.with_encryption_options(encryption.clone()));
    let server_transport = Arc::new(server_end.with_encryption_options(encryption.clone()));

    let client = Channel::new(client_transport.clone(), ChannelConfig::default());
    let server = Channel::new(server_transport.clone(), ChannelConfig::default());

    let server_negotiator = ServerNegotiator::new(
        ServerSessionOptions::new(server_node())
            .with_encryption_options(encryption)
            .with_compression_options(vec![SessionCompression::None])
            .with_scheme_options(vec![AuthenticationScheme::Plain]),
    );
    let client_negotiator = ClientNegotiator::new(
        ClientSessionOptions::new(alice(), Authentication::plain("secret"))
            .with_encryption(vec![SessionEncryption::Tls]),
    );
    let authenticator = PasswordAuthenticator { password: "secret" };

    let (server_session, client_session) = tokio::join!(
        server_negotiator.establish(&server, &authenticator),
        client_negotiator.establish(&client),
    );
    let server_session = server_session.unwrap();
    let client_session = client_session.unwrap();

    assert_eq!(client.state(), SessionState::Established);
    assert_eq!(server.state(), SessionState::Established);
    assert!(client.is_usable());

    assert_eq!(server_session.session_id, client_session.session_id);
    assert_eq!(server_session.role, DomainRole::Member);
    assert_eq!(client_session.remote_node, server_node());
    assert_eq!(server_session.remote_node.identity, alice());
    assert!(server_session.remote_node.is_complete());
    assert_eq!(client_session.local_node, server_session.remote_node);

    assert_eq!(client_transport.encryption(), SessionEncryption::Tls);
    assert_eq!(server_transport.encryption(), SessionEncryption::Tls);

    // new, option choice, credentials
    assert_eq!(client.stats().sent, 3);
    assert_eq!(server.stats().received, 3);
}

#[tokio::test]
async fn skips_option_round_without_a_choice() {
    let (client_end, server_end) = InMemoryTransport::pair(16);
    let client = Channel::new(Arc::new(client_end), ChannelConfig::default());
    let server = Channel::new(Arc::new(server_end), ChannelConfig::default());

    let server_negotiator = ServerNegotiator::new(
        ServerSessionOptions::new(server_node())
            .with_scheme_options(vec![AuthenticationScheme::Guest]),
    );
    let client_negotiator =
        ClientNegotiator::new(ClientSessionOptions::new(alice(), Authentication::Guest).with_instance("phone"));

    let (server_session, client_session) = tokio::join!(
        server_negotiator.establish(&server, &AllowAllAuthenticator),
        client_negotiator.establish(&client),
    );

    let server_session = server_session.unwrap();
    assert_eq!(
        server_session.remote_node,
        Node::parse("alice@example.org/phone").unwrap()
    );
    assert_eq!(client_session.unwrap().session_id, server_session.session_id);
    assert_eq!(client.stats().sent, 2);
}

#[tokio::test]
async fn unoffered_option_fails_the_session() {
    let (client_end, server_end) = InMemoryTransport::pair(16);
    let encryption = vec![SessionEncryption::None, SessionEncryption::Tls];
    let server = Channel::new(
        Arc::new(server_end.with_encryption_options(encryption.clone())),
        ChannelConfig::default(),
    );
    let negotiator = ServerNegotiator::new(
        ServerSessionOptions::new(server_node()).with_encryption_options(encryption.clone()),
    );

    let server_task = tokio::spawn(async move {
        let result = negotiator.establish(&server, &AllowAllAuthenticator).await;
        (result, server.state())
    });

    client_end
        .send(&Session::new(SessionState::New).into())
        .await
        .unwrap();
    let offer = expect_session(&client_end).await;
    assert_eq!(offer.state, SessionState::Negotiating);
    assert_eq!(offer.encryption_options, Some(encryption));
    assert_eq!(offer.compression_options, Some(vec![SessionCompression::None]));

    let mut pick = Session::new(SessionState::Negotiating);
    pick.header.id = offer.header.id.clone();
    pick.compression = Some(SessionCompression::GZip);
    pick.encryption = Some(SessionEncryption::None);
    client_end.send(&pick.into()).await.unwrap();

    let failed = expect_session(&client_end).await;
    assert_eq!(failed.state, SessionState::Failed);
    assert_eq!(
        failed.reason.map(|r| r.code),
        Some(reason_codes::SESSION_NEGOTIATION_INVALID_OPTIONS)
    );

    let (result, state) = server_task.await.unwrap();
    assert!(matches!(
        result,
        Err(ChannelError::ProtocolViolation { reason })
            if reason.code == reason_codes::SESSION_NEGOTIATION_INVALID_OPTIONS
    ));
    assert_eq!(state, SessionState::Failed);
}

#[tokio::test]
async fn repeated_authentication_failures_fail_the_session() {
    let (client_end, server_end) = InMemoryTransport::pair(16);
    let client = Channel::new(Arc::new(client_end), ChannelConfig::default());
    let server = Channel::new(Arc::new(server_end), ChannelConfig::default());

    let server_negotiator = ServerNegotiator::new(
        ServerSessionOptions::new(server_node()).with_max_authentication_attempts(2),
    );
    let client_negotiator =
        ClientNegotiator::new(ClientSessionOptions::new(alice(), Authentication::plain("wrong")));
    let authenticator = PasswordAuthenticator { password: "secret" };

    let (server_result, client_result) = tokio::join!(
        server_negotiator.establish(&server, &authenticator),
        client_negotiator.establish(&client),
    );

    assert!(matches!(
        server_result,
        Err(ChannelError::SessionFailed { reason })
            if reason.code == reason_codes::SESSION_AUTHENTICATION_FAILED
    ));
    assert!(matches!(
        client_result,
        Err(ChannelError::SessionFailed { reason })
            if reason.code == reason_codes::SESSION_AUTHENTICATION_FAILED
    ));
    assert_eq!(server.state(), SessionState::Failed);
    assert_eq!(client.closed().await, SessionState::Failed);
    // new + two credential attempts
    assert_eq!(client.stats().sent, 3);
}

#[tokio::test]
async fn challenge_rounds_do_not_count_as_failures() {
    let (client_end, server_end) = InMemoryTransport::pair(16);
    let client = Channel::new(Arc::new(client_end), ChannelConfig::default());
    let server = Channel::new(Arc::new(server_end), ChannelConfig::default());

    let server_negotiator = ServerNegotiator::new(
        ServerSessionOptions::new(server_node())
            .with_scheme_options(vec![AuthenticationScheme::Plain, AuthenticationScheme::Key])
            .with_max_authentication_attempts(1),
    );
    let client_negotiator = ClientNegotiator::new(
        ClientSessionOptions::new(alice(), Authentication::plain("secret")).with_challenge_responder(
            |challenge| match challenge {
                Authentication::Key { key } => Authentication::key(format!("{}-signed", key)),
                other => other.clone(),
            },
        ),
    );
    let authenticator = ChallengingAuthenticator {
        rounds: AtomicUsize::new(0),
    };

    let (server_session, client_session) = tokio::join!(
        server_negotiator.establish(&server, &authenticator),
        client_negotiator.establish(&client),
    );

    assert_eq!(server_session.unwrap().role, DomainRole::Authority);
    assert!(client_session.is_ok());
    assert_eq!(authenticator.rounds.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unaccepted_scheme_fails_the_client() {
    let (client_end, server_end) = InMemoryTransport::pair(16);
    let client = Channel::new(Arc::new(client_end), ChannelConfig::default());
    let server = Channel::new(Arc::new(server_end), ChannelConfig::default());

    let server_negotiator = ServerNegotiator::new(
        ServerSessionOptions::new(server_node())
            .with_scheme_options(vec![AuthenticationScheme::Key]),
    );
    let client_negotiator =
        ClientNegotiator::new(ClientSessionOptions::new(alice(), Authentication::plain("secret")));

    let (server_result, client_result) = tokio::join!(
        server_negotiator.establish(&server, &AllowAllAuthenticator),
        client_negotiator.establish(&client),
    );

    assert!(matches!(
        client_result,
        Err(ChannelError::SessionFailed { reason })
            if reason.code == reason_codes::SESSION_AUTHENTICATION_FAILED
    ));
    assert!(server_result.is_err());
    assert_eq!(server.closed().await, SessionState::Failed);
}

#[tokio::test(start_paused = true)]
async fn silent_client_times_out() {
    let (client_end, server_end) = InMemoryTransport::pair(16);
    let config = ChannelConfig::default().with_negotiation_timeout(Duration::from_secs(5));
    let server = Channel::new(Arc::new(server_end), config);
    let negotiator = ServerNegotiator::new(ServerSessionOptions::new(server_node()));

    let server_task = tokio::spawn(async move {
        negotiator.establish(&server, &AllowAllAuthenticator).await
    });

    client_end
        .send(&Session::new(SessionState::New).into())
        .await
        .unwrap();
    let offer = expect_session(&client_end).await;
    assert_eq!(offer.state, SessionState::Authenticating);
    assert!(offer.scheme_options.is_some());

    let failed = expect_session(&client_end).await;
    assert_eq!(failed.state, SessionState::Failed);
    assert_eq!(
        failed.reason.map(|r| r.code),
        Some(reason_codes::SESSION_NEGOTIATION_TIMEOUT)
    );
    assert!(matches!(
        server_task.await.unwrap(),
        Err(ChannelError::Timeout { .. })
    ));
}

#[tokio::test]
async fn first_envelope_must_be_a_new_session() {
    let (client_end, server_end) = InMemoryTransport::pair(16);
    let server = Channel::new(Arc::new(server_end), ChannelConfig::default());
    let negotiator = ServerNegotiator::new(ServerSessionOptions::new(server_node()));

    let server_task = tokio::spawn(async move {
        negotiator.establish(&server, &AllowAllAuthenticator).await
    });

    client_end
        .send(&Session::new(SessionState::Authenticating).into())
        .await
        .unwrap();
    let failed = expect_session(&client_end).await;
    assert_eq!(
        failed.reason.map(|r| r.code),
        Some(reason_codes::SESSION_INVALID_ACTION_FOR_STATE)
    );
    assert!(matches!(
        server_task.await.unwrap(),
        Err(ChannelError::ProtocolViolation { .. })
    ));
}
