use std::sync::Arc;
use std::time::Duration;

use lime_channel::{
    AllowAllAuthenticator, Channel, ChannelConfig, ChannelError, ClientNegotiator,
    ClientSessionOptions, OverflowPolicy, ServerNegotiator, ServerSessionOptions,
};
use lime_core::{
    Authentication, AuthenticationScheme, Command, CommandMethod, CommandStatus, Document,
    Envelope, Event, Identity, Message, Node, Notification, QueueError, Reason, Session,
    SessionState, reason_codes,
};
use lime_protocol::{InMemoryTransport, Transport};

fn server_node() -> Node {
    Node::parse("postmaster@example.org/server").unwrap()
}

fn client_options() -> ClientSessionOptions {
    ClientSessionOptions::new(
        Identity::parse("alice@example.org").unwrap(),
        Authentication::Guest,
    )
    .with_instance("laptop")
}

struct Pair {
    client: Channel,
    server: Channel,
    client_transport: Arc<InMemoryTransport>,
}

async fn established_pair(config: ChannelConfig) -> Pair {
    let (client_end, server_end) = InMemoryTransport::pair(64);
    let client_transport = Arc::new(client_end);
    let client = Channel::new(client_transport.clone(), config.clone());
    let server = Channel::new(Arc::new(server_end), config);

    let server_negotiator = ServerNegotiator::new(
        ServerSessionOptions::new(server_node())
            .with_scheme_options(vec![AuthenticationScheme::Guest]),
    );
    let client_negotiator = ClientNegotiator::new(client_options());
    let (server_session, client_session) = tokio::join!(
        server_negotiator.establish(&server, &AllowAllAuthenticator),
        client_negotiator.establish(&client),
    );
    server_session.unwrap();
    client_session.unwrap();

    Pair {
        client,
        server,
        client_transport,
    }
}

async fn expect_envelope(transport: &InMemoryTransport) -> Envelope {
    tokio::time::timeout(Duration::from_secs(5), transport.receive())
        .await
        .expect("timed out waiting for an envelope")
        .unwrap()
}

async fn expect_session(transport: &InMemoryTransport) -> Session {
    match expect_envelope(transport).await {
        Envelope::Session(session) => session,
        other => panic!("expected a session, got {:?}", other),
    }
}

async fn expect_command(transport: &InMemoryTransport) -> Command {
    match expect_envelope(transport).await {
        Envelope::Command(command) => command,
        other => panic!("expected a command, got {:?}", other),
    }
}

/// Establishes a client channel against a hand-driven server end.
async fn client_with_scripted_server(config: ChannelConfig) -> (Channel, InMemoryTransport) {
    let (client_end, peer) = InMemoryTransport::pair(64);
    let client = Channel::new(Arc::new(client_end), config);
    let negotiator = ClientNegotiator::new(client_options());

    let negotiation = async {
        let new = expect_session(&peer).await;
        assert_eq!(new.state, SessionState::New);

        let mut offer = Session::new(SessionState::Authenticating);
        offer.header.id = Some("session-1".to_string());
        offer.header.from = Some(server_node());
        offer.scheme_options = Some(vec![AuthenticationScheme::Guest]);
        peer.send(&offer.into()).await.unwrap();

        let credentials = expect_session(&peer).await;
        assert_eq!(credentials.scheme, Some(AuthenticationScheme::Guest));

        let mut established = Session::new(SessionState::Established);
        established.header.id = Some("session-1".to_string());
        established.header.from = Some(server_node());
        established.header.to = credentials.header.from.clone();
        peer.send(&established.into()).await.unwrap();
    };
    let (session, ()) = tokio::join!(negotiator.establish(&client), negotiation);
    session.unwrap();

    (client, peer)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition never became true");
}

#[tokio::test]
async fn messages_and_notifications_reach_the_peer() {
    let pair = established_pair(ChannelConfig::default()).await;

    pair.client
        .send_message(Message::new(Document::text("hello")))
        .await
        .unwrap();
    pair.client
        .send_notification(Notification::new(Event::Received).with_id("m-1"))
        .await
        .unwrap();

    let message = pair.server.receive_message().await.unwrap();
    assert_eq!(message.content.as_text(), Some("hello"));

    let notification = pair.server.receive_notification().await.unwrap();
    assert_eq!(notification.event, Event::Received);
    assert_eq!(notification.header.id.as_deref(), Some("m-1"));

    // Guest session with no option round: new, credentials, then two.
    assert_eq!(pair.client.stats().sent, 4);
}

#[tokio::test]
async fn process_command_returns_the_matching_response() {
    let pair = established_pair(ChannelConfig::default()).await;

    let server = pair.server.clone();
    let responder = tokio::spawn(async move {
        let request = server.receive_command().await.unwrap();
        assert_eq!(request.uri.as_deref(), Some("/account"));
        let response = request
            .success_response()
            .with_resource(Document::text("alice"));
        server.send_command(response).await.unwrap();
    });

    let response = pair
        .client
        .process_command(Command::new(CommandMethod::Get, "/account"))
        .await
        .unwrap();
    responder.await.unwrap();

    assert_eq!(response.status, CommandStatus::Success);
    assert!(response.header.id.is_some());
    assert_eq!(
        response.resource_document().unwrap(),
        Some(Document::text("alice"))
    );
    assert_eq!(pair.client.pending_commands(), 0);
}

#[tokio::test]
async fn unmatched_responses_go_to_the_command_queue() {
    let (client, peer) = client_with_scripted_server(ChannelConfig::default()).await;

    let caller = client.clone();
    let call = tokio::spawn(async move {
        caller
            .process_command(Command::new(CommandMethod::Get, "/presence").with_id("c-1"))
            .await
    });

    let request = expect_command(&peer).await;
    assert_eq!(request.header.id.as_deref(), Some("c-1"));

    let mut stray = request.success_response();
    stray.header.id = Some("someone-else".to_string());
    peer.send(&stray.into()).await.unwrap();
    peer.send(&request.success_response().into()).await.unwrap();

    let response = call.await.unwrap().unwrap();
    assert_eq!(response.header.id.as_deref(), Some("c-1"));

    let forwarded = client.receive_command().await.unwrap();
    assert_eq!(forwarded.header.id.as_deref(), Some("someone-else"));
    assert_eq!(forwarded.status, CommandStatus::Success);
}

#[tokio::test]
async fn duplicate_command_ids_are_rejected() {
    let (client, peer) = client_with_scripted_server(ChannelConfig::default()).await;

    let caller = client.clone();
    let call = tokio::spawn(async move {
        caller
            .process_command(Command::new(CommandMethod::Get, "/a").with_id("dup"))
            .await
    });
    wait_until(|| client.pending_commands() == 1).await;

    let second = client
        .process_command(Command::new(CommandMethod::Get, "/b").with_id("dup"))
        .await;
    assert!(matches!(second, Err(ChannelError::DuplicateCommandId(id)) if id == "dup"));

    let request = expect_command(&peer).await;
    peer.send(&request.success_response().into()).await.unwrap();
    assert!(call.await.unwrap().is_ok());
    assert!(client.is_usable());
}

#[tokio::test]
async fn cancelled_command_forgets_its_id() {
    let (client, peer) = client_with_scripted_server(ChannelConfig::default()).await;

    let attempt = tokio::time::timeout(
        Duration::from_millis(20),
        client.process_command(Command::new(CommandMethod::Get, "/slow").with_id("c-9")),
    )
    .await;
    assert!(attempt.is_err());
    assert_eq!(client.pending_commands(), 0);

    let request = expect_command(&peer).await;
    peer.send(&request.success_response().into()).await.unwrap();

    let late = client.receive_command().await.unwrap();
    assert_eq!(late.header.id.as_deref(), Some("c-9"));
    assert!(client.is_usable());
}

#[tokio::test]
async fn command_timeout_leaves_the_channel_usable() {
    let config = ChannelConfig::default().with_command_timeout(Duration::from_millis(30));
    let (client, _peer) = client_with_scripted_server(config).await;

    let result = client
        .process_command(Command::new(CommandMethod::Get, "/never"))
        .await;
    assert!(matches!(result, Err(ChannelError::Timeout { .. })));
    assert_eq!(client.pending_commands(), 0);
    assert_eq!(client.state(), SessionState::Established);
}

#[tokio::test]
async fn transport_fault_fails_every_pending_command() {
    let pair = established_pair(ChannelConfig::default()).await;

    let calls: Vec<_> = (0..5)
        .map(|i| {
            let client = pair.client.clone();
            tokio::spawn(async move {
                client
                    .process_command(Command::new(CommandMethod::Get, format!("/item/{}", i)))
                    .await
            })
        })
        .collect();
    wait_until(|| pair.client.pending_commands() == 5).await;

    pair.client_transport.fail("link lost");

    for call in calls {
        let error = call.await.unwrap().unwrap_err();
        assert!(error.is_transport_fault(), "unexpected error: {error}");
    }
    assert_eq!(pair.client.pending_commands(), 0);
    assert_eq!(pair.client.closed().await, SessionState::Failed);
    assert!(matches!(pair.client.fault(), Some(ChannelError::Transport(_))));
    assert_eq!(pair.server.closed().await, SessionState::Failed);
}

#[tokio::test]
async fn finish_handshake_closes_both_sides() {
    let pair = established_pair(ChannelConfig::default()).await;

    pair.client.finish().await.unwrap();

    assert_eq!(pair.client.state(), SessionState::Finished);
    assert_eq!(pair.server.closed().await, SessionState::Finished);
    assert!(pair.server.fault().is_none());
    assert!(matches!(
        pair.client
            .send_message(Message::new(Document::text("after")))
            .await,
        Err(ChannelError::Closed)
    ));
}

#[tokio::test]
async fn unanswered_finish_times_out() {
    let config = ChannelConfig::default().with_finish_timeout(Duration::from_millis(30));
    let (client, peer) = client_with_scripted_server(config).await;

    let result = client.finish().await;
    assert!(matches!(result, Err(ChannelError::Timeout { .. })));
    assert_eq!(client.state(), SessionState::Failed);

    let finishing = expect_session(&peer).await;
    assert_eq!(finishing.state, SessionState::Finishing);
    assert_eq!(finishing.header.id.as_deref(), Some("session-1"));
}

#[tokio::test]
async fn renegotiation_after_establishment_fails_the_session() {
    let (client, peer) = client_with_scripted_server(ChannelConfig::default()).await;

    peer.send(&Session::new(SessionState::Negotiating).into())
        .await
        .unwrap();

    assert_eq!(client.closed().await, SessionState::Failed);
    let failed = expect_session(&peer).await;
    assert_eq!(failed.state, SessionState::Failed);
    assert_eq!(
        failed.reason.map(|r| r.code),
        Some(reason_codes::SESSION_INVALID_ACTION_FOR_STATE)
    );
    assert!(matches!(
        client.fault(),
        Some(ChannelError::ProtocolViolation { .. })
    ));
}

#[tokio::test]
async fn peer_failure_is_reported_as_the_fault() {
    let (client, peer) = client_with_scripted_server(ChannelConfig::default()).await;

    let waiting = client.clone();
    let receiver = tokio::spawn(async move { waiting.receive_message().await });

    peer.send(&Session::failed(Reason::new(reason_codes::SESSION_ERROR, "shutting down")).into())
        .await
        .unwrap();

    assert_eq!(client.closed().await, SessionState::Failed);
    assert!(matches!(
        client.fault(),
        Some(ChannelError::SessionFailed { reason }) if reason.code == reason_codes::SESSION_ERROR
    ));
    assert!(matches!(
        receiver.await.unwrap(),
        Err(ChannelError::Closed)
    ));
}

#[tokio::test]
async fn drop_policy_discards_overflow() {
    let config = ChannelConfig::default()
        .with_buffer_limit(1)
        .with_overflow(OverflowPolicy::Drop);
    let (client, peer) = client_with_scripted_server(config).await;

    for i in 0..3 {
        peer.send(&Message::new(Document::text(format!("m{}", i))).into())
            .await
            .unwrap();
    }
    wait_until(|| client.stats().dropped == 2).await;

    let first = client.receive_message().await.unwrap();
    assert_eq!(first.content.as_text(), Some("m0"));
    assert_eq!(client.stats().dropped, 2);
    assert!(client.is_usable());
}

#[tokio::test]
async fn backpressure_delivers_everything_in_order() {
    let config = ChannelConfig::default().with_buffer_limit(1);
    let (client, peer) = client_with_scripted_server(config).await;

    let sender = tokio::spawn(async move {
        for i in 0..5 {
            peer.send(&Message::new(Document::text(format!("m{}", i))).into())
                .await
                .unwrap();
        }
        peer
    });

    for i in 0..5 {
        let message = client.receive_message().await.unwrap();
        assert_eq!(message.content.as_text(), Some(format!("m{}", i).as_str()));
    }
    let _peer = sender.await.unwrap();
    assert_eq!(client.stats().dropped, 0);
}

#[tokio::test]
async fn full_queue_does_not_hide_transport_fault() {
    let pair = established_pair(ChannelConfig::default().with_buffer_limit(1)).await;

    // One message fills the queue, the second parks the pump.
    let before = pair.client.stats().received;
    for i in 0..3 {
        pair.server
            .send_message(Message::new(Document::text(format!("m{}", i))))
            .await
            .unwrap();
    }
    wait_until(|| pair.client.stats().received == before + 2).await;

    let client = pair.client.clone();
    let call = tokio::spawn(async move {
        client
            .process_command(Command::new(CommandMethod::Get, "/account"))
            .await
    });
    wait_until(|| pair.client.pending_commands() == 1).await;

    pair.client_transport.fail("link lost");

    let result = tokio::time::timeout(Duration::from_secs(5), call)
        .await
        .expect("command still waiting after the transport failed")
        .unwrap();
    assert!(matches!(result, Err(ChannelError::Transport(_))));
    assert_eq!(pair.client.closed().await, SessionState::Failed);
    assert_eq!(pair.client.pending_commands(), 0);
}

#[tokio::test]
async fn unread_requests_do_not_hold_back_responses() {
    let pair = established_pair(ChannelConfig::default().with_buffer_limit(2)).await;

    let client = pair.client.clone();
    let call = tokio::spawn(async move {
        client
            .process_command(Command::new(CommandMethod::Get, "/account").with_id("mine"))
            .await
    });

    let request = pair.server.receive_command().await.unwrap();
    assert_eq!(request.header.id.as_deref(), Some("mine"));
    for i in 0..3 {
        pair.server
            .send_command(Command::new(CommandMethod::Get, format!("/contacts/{}", i)))
            .await
            .unwrap();
    }
    pair.server
        .send_command(request.success_response())
        .await
        .unwrap();

    let response = tokio::time::timeout(Duration::from_secs(5), call)
        .await
        .expect("response stuck behind unread requests")
        .unwrap()
        .unwrap();
    assert_eq!(response.status, CommandStatus::Success);
    assert_eq!(pair.client.stats().dropped, 1);

    for i in 0..2 {
        let unread = pair.client.receive_command().await.unwrap();
        assert_eq!(unread.uri.as_deref(), Some(format!("/contacts/{}", i).as_str()));
    }
    assert!(pair.client.is_usable());
}

#[tokio::test]
async fn finish_completes_with_a_full_queue() {
    let pair = established_pair(ChannelConfig::default().with_buffer_limit(1)).await;

    let before = pair.client.stats().received;
    for i in 0..3 {
        pair.server
            .send_message(Message::new(Document::text(format!("m{}", i))))
            .await
            .unwrap();
    }
    wait_until(|| pair.client.stats().received == before + 2).await;

    tokio::time::timeout(Duration::from_secs(5), pair.client.finish())
        .await
        .expect("finish blocked by the unread messages")
        .unwrap();

    assert_eq!(pair.client.state(), SessionState::Finished);
    assert_eq!(pair.server.closed().await, SessionState::Finished);
    assert_eq!(pair.client.stats().dropped, 2);

    let buffered = pair.client.receive_message().await.unwrap();
    assert_eq!(buffered.content.as_text(), Some("m0"));
}

#[tokio::test]
async fn simultaneous_finish_closes_both_sides() {
    let pair = established_pair(ChannelConfig::default()).await;

    let (client, server) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(pair.client.finish(), pair.server.finish())
    })
    .await
    .expect("crossed finish handshakes never completed");

    client.unwrap();
    server.unwrap();
    assert_eq!(pair.client.state(), SessionState::Finished);
    assert_eq!(pair.server.state(), SessionState::Finished);
    assert!(pair.client.fault().is_none());
    assert!(pair.server.fault().is_none());
}

#[tokio::test]
async fn promises_limit_rejects_extra_receivers() {
    let config = ChannelConfig::default().with_promises_limit(1);
    let (client, peer) = client_with_scripted_server(config).await;

    let first = client.receive_message();
    tokio::pin!(first);
    tokio::select! {
        biased;
        _ = &mut first => panic!("nothing was sent yet"),
        _ = tokio::task::yield_now() => {}
    }

    let second = client.receive_message().await;
    assert!(matches!(
        second,
        Err(ChannelError::Queue(QueueError::PromisesLimitReached { limit: 1 }))
    ));

    peer.send(&Message::new(Document::text("only")).into())
        .await
        .unwrap();
    let message = first.await.unwrap();
    assert_eq!(message.content.as_text(), Some("only"));
}
