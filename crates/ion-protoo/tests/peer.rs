use std::time::Duration;

use anyhow::Result;
use ion_protoo::{Peer, PeerError, PeerEvents, DEFAULT_REQUEST_TIMEOUT};
use serde_json::json;
use tokio::{net::TcpListener, task::JoinHandle};

/// Accept a single protoo connection and answer its requests:
/// `echo` is accepted with its own data, `fail` is rejected, anything else is
/// left unanswered.
async fn spawn_server() -> Result<(String, JoinHandle<Result<(Peer, PeerEvents, String)>>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("ws://{}/ws", listener.local_addr()?);
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        let (peer, events, path) = Peer::accept(stream, "server", DEFAULT_REQUEST_TIMEOUT).await?;
        let requests = events.requests.clone();
        tokio::spawn(async move {
            let mut unanswered = vec![];
            while let Ok(request) = requests.recv_async().await {
                let method = request.method().to_owned();
                match method.as_str() {
                    "echo" => {
                        let data = request.data().clone();
                        request.accept(&data)?;
                    }
                    "fail" => request.reject(404, "not found")?,
                    _ => unanswered.push(request),
                }
            }
            Ok::<_, PeerError>(())
        });
        Ok((peer, events, path))
    });
    Ok((url, handle))
}

#[tokio::test]
async fn test_request_accepted() -> Result<()> {
    let _ = pretty_env_logger::try_init();
    let (url, server) = spawn_server().await?;
    let (client, _events) = Peer::connect(&format!("{url}?peer=alice"), "alice", DEFAULT_REQUEST_TIMEOUT).await?;
    let (_server_peer, _server_events, path) = server.await??;
    assert_eq!(path, "/ws?peer=alice");

    let data = client.request("echo", &json!({"rid": "r1"})).await?;
    assert_eq!(data, json!({"rid": "r1"}));
    // ids are not reused between requests
    let data = client.request("echo", &json!([1, 2, 3])).await?;
    assert_eq!(data, json!([1, 2, 3]));
    Ok(())
}

#[tokio::test]
async fn test_request_rejected() -> Result<()> {
    let _ = pretty_env_logger::try_init();
    let (url, server) = spawn_server().await?;
    let (client, _events) = Peer::connect(&url, "alice", DEFAULT_REQUEST_TIMEOUT).await?;
    let _server = server.await??;

    match client.request("fail", &json!({})).await {
        Err(PeerError::Rejected(e)) => {
            assert_eq!(e.code, 404);
            assert_eq!(e.reason, "not found");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_request_times_out() -> Result<()> {
    let _ = pretty_env_logger::try_init();
    let (url, server) = spawn_server().await?;
    let timeout = Duration::from_millis(200);
    let (client, _events) = Peer::connect(&url, "alice", timeout).await?;
    let _server = server.await??;

    assert!(matches!(
        client.request("ignored", &json!({})).await,
        Err(PeerError::Timeout(t)) if t == timeout
    ));
    Ok(())
}

#[tokio::test]
async fn test_notifications_delivered() -> Result<()> {
    let _ = pretty_env_logger::try_init();
    let (url, server) = spawn_server().await?;
    let (_client, events) = Peer::connect(&url, "alice", DEFAULT_REQUEST_TIMEOUT).await?;
    let (server_peer, _server_events, _) = server.await??;

    server_peer.notify("stream-add", &json!({"mid": "m1"}))?;
    server_peer.notify("stream-remove", &json!({"mid": "m1"}))?;

    let first = events.notifications.recv_async().await?;
    assert_eq!(first.method, "stream-add");
    assert_eq!(first.data, json!({"mid": "m1"}));
    let second = events.notifications.recv_async().await?;
    assert_eq!(second.method, "stream-remove");
    Ok(())
}

#[tokio::test]
async fn test_remote_close_fails_pending_requests() -> Result<()> {
    let _ = pretty_env_logger::try_init();
    let (url, server) = spawn_server().await?;
    let (client, events) = Peer::connect(&url, "alice", DEFAULT_REQUEST_TIMEOUT).await?;
    let (server_peer, _server_events, _) = server.await??;

    let data = json!({});
    let pending = client.request("ignored", &data);
    let closer = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        server_peer.close();
    };
    let (result, _) = tokio::join!(pending, closer);
    assert!(matches!(result, Err(PeerError::Closed)));

    let event = events.close.recv_async().await?;
    assert_eq!(event.code, Some(1000));
    assert!(client.is_closed());
    assert!(matches!(client.request("echo", &json!({})).await, Err(PeerError::Closed)));
    Ok(())
}
