//! Direct transport against a real WebSocket device on loopback.

mod common;

use device_link::protocol::RpcRequest;
use device_link::{Client, ClientOptions, NamedMessage, ReconnectPolicy, UploadOutcome};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use common::{init_tracing, wait_open};

/// Serves one client: sums RPC arguments, acks uploads at end of stream.
/// Returns the reassembled upload.
async fn run_device(listener: TcpListener) -> anyhow::Result<Vec<u8>> {
    let (stream, _) = listener.accept().await?;
    let mut ws = accept_async(stream).await?;

    let mut received = Vec::new();
    let mut frames = 0u64;

    while let Some(message) = ws.next().await {
        match message? {
            Message::Text(text) => {
                let message = NamedMessage::parse(text.as_str())?;
                let request = RpcRequest::from_payload(&message.payload)?;
                let sum: i64 = request.args.iter().filter_map(Value::as_i64).sum();

                // Firmware spelling of the envelope.
                let reply = json!(["AJAX", [request.id, {"rsp": sum}]]);
                ws.send(Message::Text(reply.to_string().into())).await?;
            }
            Message::Binary(data) => {
                let (&tag, payload) = data.split_first().ok_or_else(|| anyhow::anyhow!("empty"))?;
                frames += 1;
                received.extend_from_slice(payload);
                if tag == 2 {
                    let ack = json!(["uploadack", frames]);
                    ws.send(Message::Text(ack.to_string().into())).await?;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    Ok(received)
}

#[tokio::test]
async fn test_direct_websocket_session() -> anyhow::Result<()> {
    init_tracing();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let device = tokio::spawn(run_device(listener));

    let client = Client::builder()
        .options(
            ClientOptions::new()
                .with_dev_url(format!("ws://127.0.0.1:{port}/"))
                .with_reconnect(ReconnectPolicy::immediate().with_max_attempts(1)),
        )
        .build()?;
    client.connect()?;
    wait_open(&client).await;

    let sum = client.call("math/add", vec![json!(2), json!(3)]).await?;
    assert_eq!(sum, json!(5));

    let data: Vec<u8> = (0..2801u32).map(|i| (i % 256) as u8).collect();
    let outcome = client.upload(data.clone()).await?;
    assert_eq!(
        outcome,
        UploadOutcome::Completed {
            frames: 3,
            bytes: 2801
        }
    );

    client.shutdown().await;
    assert_eq!(device.await??, data);
    Ok(())
}

#[tokio::test]
async fn test_unreachable_device_cannot_connect() -> anyhow::Result<()> {
    init_tracing();

    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.local_addr()?.port()
    };

    let client = Client::builder()
        .options(ClientOptions::new().with_dev_url(format!("ws://127.0.0.1:{port}/")))
        .build()?;
    client.connect()?;

    common::wait_until(|| client.status() == device_link::ConnectionState::CannotConnect).await;
    Ok(())
}
