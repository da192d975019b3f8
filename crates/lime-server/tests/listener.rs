use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use lime_channel::{Channel, ChannelConfig, ChannelError, ClientNegotiator, ClientSessionOptions};
use lime_core::{
    Authentication, Command, CommandMethod, CommandStatus, Document, DomainRole, Identity,
    Message, Node, SessionState, reason_codes,
};
use lime_protocol::{EnvelopeSerializer, TcpTransport, Transport};
use lime_server::{ChannelListener, MemoryAuthenticator, ServerConfig, ShutdownHandle};

fn alice() -> Identity {
    Identity::parse("alice@example.org").unwrap()
}

fn server_config() -> ServerConfig {
    ServerConfig::new(
        "127.0.0.1:0",
        Node::parse("postmaster@example.org/server").unwrap(),
    )
}

fn authenticator() -> MemoryAuthenticator {
    let authenticator = MemoryAuthenticator::new();
    authenticator.set_password(alice(), "secret", DomainRole::Member);
    authenticator
}

async fn connect(addr: SocketAddr, password: &str) -> (Channel, Result<(), ChannelError>) {
    let transport = TcpTransport::new(EnvelopeSerializer::default());
    transport
        .open(&format!("net.tcp://{}", addr))
        .await
        .unwrap();
    let channel = Channel::new(Arc::new(transport), ChannelConfig::default());
    let options = ClientSessionOptions::new(alice(), Authentication::plain(password))
        .with_instance("test");
    let result = ClientNegotiator::new(options)
        .establish(&channel)
        .await
        .map(|_| ());
    (channel, result)
}

#[tokio::test]
async fn accepts_and_establishes_over_tcp() {
    let listener = ChannelListener::bind(server_config()).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let pending = listener.accept().await.unwrap();
        let connection = pending.establish(&authenticator()).await.unwrap();
        assert_eq!(connection.session.role, DomainRole::Member);
        assert_eq!(connection.session.remote_node.to_string(), "alice@example.org/test");

        let request = connection.channel.receive_command().await.unwrap();
        connection
            .channel
            .send_command(request.success_response())
            .await
            .unwrap();
        connection.channel.closed().await
    });

    let (client, result) = connect(addr, "secret").await;
    result.unwrap();
    assert_eq!(client.state(), SessionState::Established);
    assert_eq!(
        client.remote_node().map(|node| node.to_string()),
        Some("postmaster@example.org/server".to_string())
    );

    let response = client
        .process_command(Command::new(CommandMethod::Get, "/ping"))
        .await
        .unwrap();
    assert_eq!(response.status, CommandStatus::Success);

    client.finish().await.unwrap();
    let server_state = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(server_state, SessionState::Finished);
}

#[tokio::test]
async fn wrong_password_fails_the_session() {
    let config = server_config().with_max_authentication_attempts(1);
    let listener = ChannelListener::bind(config).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let pending = listener.accept().await.unwrap();
        pending.establish(&authenticator()).await
    });

    let (client, result) = connect(addr, "guess").await;
    assert!(matches!(
        result,
        Err(ChannelError::SessionFailed { reason })
            if reason.code == reason_codes::SESSION_AUTHENTICATION_FAILED
    ));
    assert_eq!(client.state(), SessionState::Failed);
    assert!(server.await.unwrap().is_err());
}

#[tokio::test]
async fn echo_handler_runs_until_shutdown() {
    let listener = ChannelListener::bind(server_config()).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = ShutdownHandle::new();

    let stop = shutdown.clone();
    let server = tokio::spawn(async move {
        listener
            .run_until_shutdown(
                Arc::new(authenticator()),
                |connection| async move {
                    while let Ok(message) = connection.channel.receive_message().await {
                        if connection.channel.send_message(message).await.is_err() {
                            break;
                        }
                    }
                },
                stop.wait(),
            )
            .await
    });

    let (client, result) = connect(addr, "secret").await;
    result.unwrap();
    client
        .send_message(Message::new(Document::text("echo?")))
        .await
        .unwrap();
    let echoed = client.receive_message().await.unwrap();
    assert_eq!(echoed.content.as_text(), Some("echo?"));
    client.finish().await.unwrap();

    shutdown.trigger();
    let result = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn connection_limit_holds_back_accepts() {
    let config = server_config().with_max_connections(1);
    let listener = ChannelListener::bind(config).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let _first_socket = tokio::net::TcpStream::connect(addr).await.unwrap();
    let first = listener.accept().await.unwrap();
    assert_eq!(listener.available_connections(), 0);

    let _second_socket = tokio::net::TcpStream::connect(addr).await.unwrap();
    let blocked = tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
    assert!(blocked.is_err());

    drop(first);
    let second = tokio::time::timeout(Duration::from_secs(5), listener.accept())
        .await
        .unwrap();
    assert!(second.is_ok());
}
