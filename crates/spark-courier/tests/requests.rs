mod common;

use std::time::{Duration, Instant};

use anyhow::Result;
use common::{expect_connect, fast_config, init_tracing, start_client, start_server, within};
use serde_json::json;
use spark_courier::{CLIENT_STOPPED_REASON, Fault, RequestError, SERVER_STOPPED_REASON};

#[tokio::test(flavor = "multi_thread")]
async fn echo_request_resolves_with_body() -> Result<()> {
    init_tracing();
    let (server, port, _server_events) = start_server(fast_config()).await?;
    server.use_handler("echo", |message, _| {
        let body = message.body().clone();
        message.respond(body)?;
        Ok(())
    });

    let (client, _) = start_client(fast_config(), port).await?;
    let response = within(client.request("echo", json!({"data": "x"}), None, None)).await??;
    assert_eq!(serde_json::Value::Object(response.body().clone()), json!({"data": "x"}));
    assert_eq!(response.path(), "echo");
    assert_eq!(client.pending_requests(), 0);

    client.stop().await;
    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn server_can_request_from_client() -> Result<()> {
    init_tracing();
    let (server, port, mut server_events) = start_server(fast_config()).await?;
    let (client, _) = start_client(fast_config(), port).await?;
    client.use_handler("whoami", |message, _| {
        message.respond(json!({"role": "client"}))?;
        Ok(())
    });
    let client_id = expect_connect(&mut server_events).await?;

    let response = within(server.request("whoami", json!({}), Some(client_id.clone()), None)).await??;
    assert_eq!(response.body()["role"], "client");
    assert_eq!(response.origin(), Some(&client_id));

    client.stop().await;
    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn unanswered_request_times_out_after_its_timeout() -> Result<()> {
    init_tracing();
    let (server, port, _server_events) = start_server(fast_config()).await?;
    let (client, _) = start_client(fast_config(), port).await?;

    let started = Instant::now();
    let err = within(client.request("missing", json!({}), None, Some(Duration::from_millis(50))))
        .await?
        .expect_err("nobody answers");
    let elapsed = started.elapsed();
    assert!(matches!(err, RequestError::TimedOut));
    assert_eq!(err.to_string(), "Request timed out.");
    assert!(elapsed >= Duration::from_millis(50), "rejected early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1000), "rejected late: {elapsed:?}");
    assert_eq!(client.pending_requests(), 0);

    client.stop().await;
    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn handler_error_rejects_requester() -> Result<()> {
    init_tracing();
    let (server, port, _server_events) = start_server(fast_config()).await?;
    server.use_handler("explode", |_, _| Err(anyhow::anyhow!("boom")));
    server.use_handler("deny", |_, _| {
        Err(Fault::new("denied").with_field("status", 403).into())
    });

    let (client, _) = start_client(fast_config(), port).await?;

    let err = within(client.request("explode", json!({}), None, None))
        .await?
        .expect_err("handler failed");
    assert_eq!(err.to_string(), "boom");
    let response = err.response().expect("rejection carries the reply");
    assert_eq!(response.body()["error"]["message"], "boom");

    let err = within(client.request("deny", json!({}), None, None))
        .await?
        .expect_err("handler failed");
    assert_eq!(err.to_string(), "denied");
    let remote = err.remote().expect("remote error");
    assert_eq!(remote.field("status"), Some(&json!(403)));

    client.stop().await;
    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn explicit_error_reply_rejects_requester() -> Result<()> {
    init_tracing();
    let (server, port, _server_events) = start_server(fast_config()).await?;
    server.use_handler("lookup", |message, _| {
        message.respond(json!({"error": "not found"}))?;
        Ok(())
    });
    server.use_handler("soft", |message, _| {
        message.respond(json!({"error": false, "value": 1}))?;
        Ok(())
    });

    let (client, _) = start_client(fast_config(), port).await?;
    let err = within(client.request("lookup", json!({}), None, None))
        .await?
        .expect_err("error reply");
    assert_eq!(err.to_string(), "not found");

    let response = within(client.request("soft", json!({}), None, None)).await??;
    assert_eq!(response.body()["value"], 1);

    client.stop().await;
    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn once_handler_answers_once_then_requests_time_out() -> Result<()> {
    init_tracing();
    let (server, port, _server_events) = start_server(fast_config()).await?;
    server.use_once("ticket", |message, _| {
        message.respond(json!({"ticket": 1}))?;
        Ok(())
    });

    let (client, _) = start_client(fast_config(), port).await?;
    let timeout = Some(Duration::from_millis(200));
    let first = within(client.request("ticket", json!({}), None, timeout)).await??;
    assert_eq!(first.body()["ticket"], 1);

    let second = within(client.request("ticket", json!({}), None, timeout))
        .await?
        .expect_err("handler already consumed");
    assert!(matches!(second, RequestError::TimedOut));

    client.stop().await;
    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn second_reply_to_same_message_is_rejected() -> Result<()> {
    init_tracing();
    let (server, port, _server_events) = start_server(fast_config()).await?;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    server.use_handler("twice", move |message, _| {
        message.respond(json!({"n": 1}))?;
        let _ = tx.send(message.respond(json!({"n": 2})).is_err());
        Ok(())
    });

    let (client, _) = start_client(fast_config(), port).await?;
    let response = within(client.request("twice", json!({}), None, None)).await??;
    assert_eq!(response.body()["n"], 1);
    assert_eq!(within(rx.recv()).await?, Some(true));

    client.stop().await;
    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn stopping_rejects_pending_requests_with_role_reason() -> Result<()> {
    init_tracing();
    let (server, port, mut server_events) = start_server(fast_config()).await?;
    let (client, _) = start_client(fast_config(), port).await?;
    let client_id = expect_connect(&mut server_events).await?;

    let from_client = client.request("slow", json!({}), None, Some(Duration::from_secs(30)));
    let from_server = server.request("slow", json!({}), Some(client_id), Some(Duration::from_secs(30)));

    client.stop().await;
    let err = within(from_client).await?.expect_err("cleared");
    assert_eq!(err.to_string(), CLIENT_STOPPED_REASON);
    assert!(matches!(err, RequestError::Cleared { .. }));

    server.stop().await;
    let err = within(from_server).await?.expect_err("cleared");
    assert_eq!(err.to_string(), SERVER_STOPPED_REASON);
    Ok(())
}
