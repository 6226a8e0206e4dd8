mod common;

use std::time::{Duration, Instant};

use anyhow::Result;
use common::{
    LOCALHOST, expect_connect, expect_event, fast_config, free_port, init_tracing, start_client,
    start_server, within,
};
use serde_json::json;
use spark_courier::{
    EndpointEvent, EventKind, MAIN_CONNECTION_ID, TcpDialingEndpoint, TcpListeningEndpoint,
    TransportTarget,
};

#[tokio::test(flavor = "multi_thread")]
async fn dialer_reconnects_after_forced_close() -> Result<()> {
    init_tracing();
    let (server, port, mut server_events) = start_server(fast_config()).await?;
    let (client, mut client_events) = start_client(fast_config(), port).await?;
    let first = expect_connect(&mut server_events).await?;

    let closed_at = Instant::now();
    assert!(server.destroy(first.as_str()).is_some());

    match expect_event(&mut client_events, EventKind::Disconnect).await? {
        EndpointEvent::Disconnect(Some(info)) => assert_eq!(info.id().as_str(), MAIN_CONNECTION_ID),
        other => panic!("unexpected event {other:?}"),
    }
    match expect_event(&mut client_events, EventKind::Connect).await? {
        EndpointEvent::Connect(info) => assert_eq!(info.id().as_str(), MAIN_CONNECTION_ID),
        other => panic!("unexpected event {other:?}"),
    }
    expect_event(&mut client_events, EventKind::Started).await?;
    assert!(closed_at.elapsed() >= client.config().reconnect_delay());

    let second = expect_connect(&mut server_events).await?;
    assert_ne!(first, second);

    server.use_handler("ping", |message, _| {
        message.respond(json!({"pong": true}))?;
        Ok(())
    });
    let response = within(client.request("ping", json!({}), None, None)).await??;
    assert_eq!(response.body()["pong"], true);

    client.stop().await;
    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_completes_and_prevents_reconnect() -> Result<()> {
    init_tracing();
    let (server, port, mut server_events) = start_server(fast_config()).await?;
    let (client, mut client_events) = start_client(fast_config(), port).await?;
    expect_connect(&mut server_events).await?;

    within(client.stop()).await?;
    assert_eq!(client.connection_count(), 0);
    expect_event(&mut client_events, EventKind::Stopped).await?;
    expect_event(&mut server_events, EventKind::Disconnect).await?;

    tokio::time::sleep(client.config().reconnect_delay() * 3).await;
    assert_eq!(client.connection_count(), 0);
    assert_eq!(server.connection_count(), 0);

    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_without_session_still_notifies() -> Result<()> {
    init_tracing();
    let client = TcpDialingEndpoint::new(fast_config());
    let mut events = client.events();
    within(client.stop()).await?;
    assert_eq!(
        expect_event(&mut events, EventKind::Stopped).await?,
        EndpointEvent::Stopped
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn dialer_keeps_retrying_until_listener_appears() -> Result<()> {
    init_tracing();
    let port = free_port().await?;
    let client = TcpDialingEndpoint::new(fast_config());
    let mut client_events = client.events();
    client.start((LOCALHOST, port));

    // 至少经历一次失败的拨号。
    assert_eq!(
        expect_event(&mut client_events, EventKind::Disconnect).await?,
        EndpointEvent::Disconnect(None)
    );

    let server = TcpListeningEndpoint::new(fast_config());
    let mut server_events = server.events();
    server.start(TransportTarget::new(LOCALHOST, port));
    expect_event(&mut server_events, EventKind::Started).await?;

    expect_event(&mut client_events, EventKind::Started).await?;
    assert!(client.connection(MAIN_CONNECTION_ID).is_some());

    client.stop().await;
    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn listener_retries_bind_until_port_is_free() -> Result<()> {
    init_tracing();
    let blocker = tokio::net::TcpListener::bind((LOCALHOST, 0)).await?;
    let port = blocker.local_addr()?.port();

    let server = TcpListeningEndpoint::new(fast_config());
    let mut events = server.events();
    server.start(TransportTarget::new(LOCALHOST, port));

    // 端口被占用期间至少经历两次绑定尝试。
    tokio::time::sleep(server.config().relisten_delay() * 2).await;
    assert!(server.local_addr().is_none());

    let freed_at = Instant::now();
    drop(blocker);
    expect_event(&mut events, EventKind::Started).await?;
    assert_eq!(server.local_addr().map(|addr| addr.port()), Some(port));
    assert!(freed_at.elapsed() <= server.config().relisten_delay() + Duration::from_secs(1));

    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn listener_stop_disconnects_every_client() -> Result<()> {
    init_tracing();
    let (server, port, mut server_events) = start_server(fast_config()).await?;
    let (first, mut first_events) = start_client(fast_config(), port).await?;
    let (second, mut second_events) = start_client(fast_config(), port).await?;
    expect_connect(&mut server_events).await?;
    expect_connect(&mut server_events).await?;

    within(server.stop()).await?;
    assert!(server.local_addr().is_none());
    assert_eq!(server.connection_count(), 0);
    expect_event(&mut first_events, EventKind::Disconnect).await?;
    expect_event(&mut second_events, EventKind::Disconnect).await?;

    first.stop().await;
    second.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn restarting_listener_cycles_stopped_then_started() -> Result<()> {
    init_tracing();
    let (server, _port, mut events) = start_server(fast_config()).await?;

    server.start(TransportTarget::new(LOCALHOST, 0));
    let mut seen = Vec::new();
    while !seen.contains(&EventKind::Started) {
        let event = within(events.next()).await?.expect("endpoint alive");
        seen.push(event.kind());
    }
    assert_eq!(seen, [EventKind::Stopped, EventKind::Started]);
    assert!(server.local_addr().is_some());

    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn connection_introspection_reports_addresses() -> Result<()> {
    init_tracing();
    let (server, port, mut server_events) = start_server(fast_config()).await?;
    let (client, _) = start_client(fast_config(), port).await?;
    let id = expect_connect(&mut server_events).await?;

    let main = client.connection(MAIN_CONNECTION_ID).expect("main connection");
    assert_eq!(main.peer_addr().map(|addr| addr.port()), Some(port));
    let accepted = server.connection(id.as_str()).expect("accepted connection");
    assert_eq!(accepted.local_addr().map(|addr| addr.port()), Some(port));
    assert_eq!(server.connections().len(), 1);

    client.stop().await;
    server.stop().await;
    Ok(())
}
