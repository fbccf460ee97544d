mod common;

use std::{net::SocketAddr, time::Duration};

use futures_util::{SinkExt, StreamExt};
use palaver::{bus::ChannelKey, conversations};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, Message as WsMessage},
    MaybeTlsStream, WebSocketStream,
};

use common::{app, TestApp, PROFILE_HEADER};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(addr: SocketAddr, query: &str, profile_id: Option<&str>) -> Result<Client, tokio_tungstenite::tungstenite::Error> {
    let mut request = format!("ws://{addr}/api/socket/ws?{query}").into_client_request()?;
    if let Some(profile_id) = profile_id {
        request.headers_mut().insert(PROFILE_HEADER, profile_id.parse().unwrap());
    }
    let (client, _) = connect_async(request).await?;
    Ok(client)
}

async fn next_json(client: &mut Client) -> Value {
    let read = async {
        loop {
            match client.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                _ => continue,
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), read).await.unwrap()
}

async fn wait_for_subscribers(app: &TestApp, key: &ChannelKey, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while app.bus.subscriber_count(key) != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn socket_posts_frames_and_streams_them_back() {
    let app = app().await;
    let addr = app.serve().await;
    let conversation = conversations::resolve(&app.db_pool, "m1", "m2").await.unwrap();
    let key = ChannelKey::messages(&conversation.id);
    let query = format!("conversationId={}", conversation.id);

    let mut sender = connect(addr, &query, Some("p1")).await.unwrap();
    let mut other = connect(addr, &query, Some("p2")).await.unwrap();
    wait_for_subscribers(&app, &key, 2).await;

    sender
        .send(WsMessage::text(json!({ "content": "hi" }).to_string()))
        .await
        .unwrap();

    let echoed = next_json(&mut sender).await;
    assert_eq!(echoed["memberId"], "m1");
    assert_eq!(echoed["conversationId"], conversation.id.as_str());
    assert_eq!(echoed["content"], "hi");
    assert_eq!(next_json(&mut other).await, echoed);
    assert_eq!(app.count("direct_messages").await, 1);

    sender.close(None).await.unwrap();
    drop(sender);
    wait_for_subscribers(&app, &key, 1).await;
    other.close(None).await.unwrap();
    drop(other);
    wait_for_subscribers(&app, &key, 0).await;
}

#[tokio::test]
async fn invalid_frames_are_skipped_without_closing_the_socket() {
    let app = app().await;
    let addr = app.serve().await;
    let mut client = connect(addr, "channelId=ch1", Some("p3")).await.unwrap();

    client.send(WsMessage::text("not json")).await.unwrap();
    client.send(WsMessage::text(json!({ "content": "  " }).to_string())).await.unwrap();
    client
        .send(WsMessage::text(json!({ "fileUrl": "https://files.example/a.png" }).to_string()))
        .await
        .unwrap();

    let pushed = next_json(&mut client).await;
    assert_eq!(pushed["channelId"], "ch1");
    assert_eq!(pushed["memberId"], "m3");
    assert_eq!(app.count("messages").await, 1);
}

#[tokio::test]
async fn upgrade_is_refused_to_anonymous_and_outsiders() {
    let app = app().await;
    let addr = app.serve().await;
    let conversation = conversations::resolve(&app.db_pool, "m1", "m2").await.unwrap();
    let query = format!("conversationId={}", conversation.id);

    assert!(connect(addr, &query, None).await.is_err());
    assert!(connect(addr, &query, Some("p3")).await.is_err());
    assert!(connect(addr, "", Some("p1")).await.is_err());
    assert_eq!(app.bus.subscriber_count(&ChannelKey::messages(&conversation.id)), 0);
}
