#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{request::Parts, Method, Request, StatusCode},
    Router,
};
use palaver::{
    bus::FanoutBus,
    config::VideoConfig,
    db::{self, Profile},
    identity::IdentityResolver,
    AppResult, AppState,
};
use serde_json::Value;
use sqlx::SqlitePool;
use tower::ServiceExt;

pub const PROFILE_HEADER: &str = "x-profile-id";

/// Trusts whatever profile id the request names.
pub struct HeaderIdentity;

#[async_trait]
impl IdentityResolver for HeaderIdentity {
    async fn resolve(&self, parts: &mut Parts, db_pool: &SqlitePool) -> AppResult<Option<Profile>> {
        let Some(profile_id) = parts.headers.get(PROFILE_HEADER).and_then(|v| v.to_str().ok()) else {
            return Ok(None);
        };
        Ok(db::profile_by_id(db_pool, profile_id).await?)
    }
}

pub struct TestApp {
    pub db_pool: SqlitePool,
    pub bus: FanoutBus,
    pub router: Router,
}

pub fn video_config() -> VideoConfig {
    VideoConfig {
        api_key: Some("devkey".into()),
        api_secret: Some("devsecret-devsecret-devsecret".into()),
        url: Some("wss://livekit.example".into()),
        token_ttl: time::Duration::hours(6),
    }
}

pub async fn app_with(
    identity: Arc<dyn IdentityResolver>,
    video: VideoConfig,
    request_timeout: Duration,
) -> TestApp {
    let db_pool = db::connect_in_memory().await.unwrap();
    seed(&db_pool).await;
    let bus = FanoutBus::new();

    let router = palaver::router(AppState {
        db_pool: db_pool.clone(),
        bus: bus.clone(),
        video,
        identity,
        request_timeout,
    });

    TestApp { db_pool, bus, router }
}

pub async fn app_with_video(video: VideoConfig) -> TestApp {
    app_with(Arc::new(HeaderIdentity), video, Duration::from_secs(5)).await
}

pub async fn app() -> TestApp {
    app_with_video(video_config()).await
}

/// Profiles p1, p2, p3 as members m1, m2, m3 of server s1, with channel ch1.
async fn seed(db_pool: &SqlitePool) {
    for n in 1..=3 {
        sqlx::query("INSERT INTO profiles (id,user_id,name) VALUES (?,?,?)")
            .bind(format!("p{n}"))
            .bind(format!("user_{n}"))
            .bind(format!("Person {n}"))
            .execute(db_pool)
            .await
            .unwrap();
    }
    sqlx::query("INSERT INTO servers (id,name,profile_id) VALUES ('s1','Server','p1')")
        .execute(db_pool)
        .await
        .unwrap();
    for n in 1..=3 {
        sqlx::query("INSERT INTO members (id,profile_id,server_id) VALUES (?,?,'s1')")
            .bind(format!("m{n}"))
            .bind(format!("p{n}"))
            .execute(db_pool)
            .await
            .unwrap();
    }
    sqlx::query("INSERT INTO channels (id,name,server_id) VALUES ('ch1','general','s1')")
        .execute(db_pool)
        .await
        .unwrap();
}

impl TestApp {
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        profile_id: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(profile_id) = profile_id {
            request = request.header(PROFILE_HEADER, profile_id);
        }
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    /// Serves the router on an ephemeral local port for real socket clients.
    pub async fn serve(&self) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = self.router.clone();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        addr
    }

    pub async fn count(&self, table: &str) -> i64 {
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.db_pool)
            .await
            .unwrap();
        count
    }
}
