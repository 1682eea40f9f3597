#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{
    LocalRealtimeBus, MessagingPolicy, PresenceRegistry, ServiceDependencies, Services,
    SystemClock,
};
use axum::Router;
use config::AppConfig;
use futures_util::{SinkExt, StreamExt};
use infrastructure::Infrastructure;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::{net::TcpListener, net::TcpStream, sync::oneshot, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState, USER_ID_HEADER};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 使用进程内存储装配完整路由
pub fn build_router() -> Router {
    let config = AppConfig::default();
    let infrastructure = Infrastructure::in_memory();
    let presence = Arc::new(PresenceRegistry::new());
    let services = Services::new(ServiceDependencies {
        repositories: infrastructure.repositories,
        bus: Arc::new(LocalRealtimeBus::new(presence.clone())),
        presence,
        clock: Arc::new(SystemClock),
        policy: MessagingPolicy::from_config(&config),
    });
    router(AppState::new(services, &config))
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub client: Client,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let router = build_router();
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            client: Client::new(),
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// 以手机号注册并返回用户 id
    pub async fn register(&self, phone: &str) -> String {
        let response = self
            .client
            .post(self.url("/api/users/register"))
            .json(&json!({
                "phone_number": phone,
                "device": {
                    "device_name": "test-device",
                    "device_type": "web",
                    "public_key": "pk"
                }
            }))
            .send()
            .await
            .expect("register");
        let body: Value = response.json().await.expect("registration json");
        body["user"]["id"].as_str().expect("user id").to_owned()
    }

    pub async fn post(&self, user_id: &str, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .header(USER_ID_HEADER, user_id)
            .json(&body)
            .send()
            .await
            .expect("post")
    }

    pub async fn get(&self, user_id: &str, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .header(USER_ID_HEADER, user_id)
            .send()
            .await
            .expect("get")
    }

    pub async fn create_direct_chat(&self, user_id: &str, other: &str) -> String {
        let chat: Value = self
            .post(
                user_id,
                "/api/chats",
                json!({"type": "direct", "participants": [other]}),
            )
            .await
            .json()
            .await
            .expect("chat json");
        chat["id"].as_str().expect("chat id").to_owned()
    }

    /// 建立 WebSocket 连接并完成认证
    pub async fn connect(&self, user_id: &str) -> WsClient {
        let (mut ws, _) = connect_async(format!("ws://{}/ws", self.addr))
            .await
            .expect("ws connect");
        send_event(&mut ws, json!({"event": "authenticate", "data": {"user_id": user_id}}))
            .await;
        let authenticated = next_event(&mut ws, "authenticated").await;
        assert_eq!(authenticated["data"]["user_id"], user_id);
        ws
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

pub async fn send_event(ws: &mut WsClient, event: Value) {
    ws.send(TungsteniteMessage::Text(event.to_string().into()))
        .await
        .expect("send event");
}

/// 读取下一个指定名称的事件，跳过其他事件
pub async fn next_event(ws: &mut WsClient, name: &str) -> Value {
    let wait = async {
        loop {
            let frame = ws.next().await.expect("ws open").expect("ws frame");
            if let TungsteniteMessage::Text(payload) = frame {
                let event: Value = serde_json::from_str(payload.as_str()).expect("event json");
                if event["event"] == name {
                    return event;
                }
            }
        }
    };
    timeout(Duration::from_secs(5), wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {name}"))
}

/// 在给定时间内没有收到指定名称的事件
pub async fn assert_no_event(ws: &mut WsClient, name: &str, wait: Duration) {
    let result = timeout(wait, async {
        loop {
            match ws.next().await {
                Some(Ok(TungsteniteMessage::Text(payload))) => {
                    let event: Value = serde_json::from_str(payload.as_str()).expect("event json");
                    if event["event"] == name {
                        return event;
                    }
                }
                Some(Ok(_)) => {}
                _ => std::future::pending::<()>().await,
            }
        }
    })
    .await;
    if let Ok(event) = result {
        panic!("unexpected {name} event: {event}");
    }
}
