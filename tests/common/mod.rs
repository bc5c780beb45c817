#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header::AUTHORIZATION, HeaderMap, Request, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use fernet::Fernet;
use serde_json::{json, Value};

use asset_tenancy::app::AppState;
use asset_tenancy::auth::{generate_jwt, Claims, TenantClaims};
use asset_tenancy::config::AppConfig;
use asset_tenancy::database::{AliasRegistry, ConnectivityProbe, ProbeError, TenantConnection};
use asset_tenancy::services::{HttpDirectoryClient, SecretDecryptor, TenantResolver};

pub const JWT_SECRET: &str = "test-jwt-secret";

/// In-process stand-in for the central accounts service
#[derive(Clone, Default)]
pub struct FakeAccounts {
    inner: Arc<FakeAccountsInner>,
}

#[derive(Default)]
struct FakeAccountsInner {
    responses: Mutex<HashMap<String, (u16, Value)>>,
    hits: AtomicUsize,
    last_authorization: Mutex<Option<String>>,
    delay: Mutex<Duration>,
}

impl FakeAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// `key` is `client_id=<id>` or `username=<name>`
    pub fn respond(&self, key: &str, status: u16, body: Value) {
        self.inner
            .responses
            .lock()
            .unwrap()
            .insert(key.to_string(), (status, body));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.inner.delay.lock().unwrap() = delay;
    }

    pub fn hits(&self) -> usize {
        self.inner.hits.load(Ordering::SeqCst)
    }

    pub fn last_authorization(&self) -> Option<String> {
        self.inner.last_authorization.lock().unwrap().clone()
    }

    /// Serve on an ephemeral loopback port and return the base URL
    pub async fn start(&self) -> Result<String> {
        let app = Router::new()
            .route("/client-db-info/by-client-id", get(by_client_id))
            .route("/client-db-info/by-username", get(by_username))
            .with_state(self.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind fake accounts service")?;
        let addr = listener.local_addr()?;

        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(format!("http://{}", addr))
    }

    async fn answer(&self, key: String, headers: &HeaderMap) -> (StatusCode, Json<Value>) {
        self.inner.hits.fetch_add(1, Ordering::SeqCst);
        *self.inner.last_authorization.lock().unwrap() = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let delay = *self.inner.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let configured = self.inner.responses.lock().unwrap().get(&key).cloned();
        match configured {
            Some((status, body)) => (StatusCode::from_u16(status).unwrap(), Json(body)),
            None => (StatusCode::NOT_FOUND, Json(json!({ "detail": "Not found." }))),
        }
    }
}

async fn by_client_id(
    State(accounts): State<FakeAccounts>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let key = format!("client_id={}", params.get("client_id").cloned().unwrap_or_default());
    accounts.answer(key, &headers).await
}

async fn by_username(
    State(accounts): State<FakeAccounts>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let key = format!("username={}", params.get("username").cloned().unwrap_or_default());
    accounts.answer(key, &headers).await
}

/// Probe that never touches the network
#[derive(Default)]
pub struct CountingProbe {
    calls: AtomicUsize,
    targets: Mutex<Vec<String>>,
    failure: Mutex<Option<String>>,
    delay: Mutex<Duration>,
}

impl CountingProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn targets(&self) -> Vec<String> {
        self.targets.lock().unwrap().clone()
    }

    pub fn fail_with(&self, cause: &str) {
        *self.failure.lock().unwrap() = Some(cause.to_string());
    }

    pub fn succeed(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl ConnectivityProbe for CountingProbe {
    async fn probe(&self, connection: &TenantConnection) -> Result<(), ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.targets.lock().unwrap().push(connection.describe());

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failure = self.failure.lock().unwrap().clone();
        match failure {
            Some(cause) => Err(ProbeError::Connect {
                target: connection.describe(),
                cause,
            }),
            None => Ok(()),
        }
    }
}

/// Everything a test needs: fake collaborators plus the real resolver
pub struct Harness {
    pub accounts: FakeAccounts,
    pub probe: Arc<CountingProbe>,
    pub registry: Arc<AliasRegistry>,
    pub resolver: Arc<TenantResolver>,
    pub state: AppState,
    pub fernet: Fernet,
    pub config: AppConfig,
}

impl Harness {
    pub async fn start() -> Result<Self> {
        Self::start_with_token(None).await
    }

    pub async fn start_with_token(token: Option<&str>) -> Result<Self> {
        let accounts = FakeAccounts::new();
        let base_url = accounts.start().await?;

        let key = Fernet::generate_key();
        let fernet = Fernet::new(&key).context("generated key should be valid")?;
        let decryptor = SecretDecryptor::from_key(Some(key.as_str()))?;

        let directory =
            HttpDirectoryClient::with_timeout(&base_url, token.map(String::from), Duration::from_secs(2))?;
        let probe = CountingProbe::new();
        let registry = Arc::new(AliasRegistry::new());

        let mut config = AppConfig::development();
        config.security.jwt_secret = JWT_SECRET.to_string();

        let resolver = Arc::new(TenantResolver::new(
            registry.clone(),
            Arc::new(directory),
            Arc::new(decryptor),
            probe.clone(),
            config.database.clone(),
        ));
        let state = AppState::new(resolver.clone(), JWT_SECRET);

        Ok(Self {
            accounts,
            probe,
            registry,
            resolver,
            state,
            fernet,
            config,
        })
    }

    /// Directory record with an encrypted password
    pub fn record(&self, client_id: i64, password: &str) -> Value {
        json!({
            "alias": format!("client_{}", client_id),
            "db_name": format!("assets_{}", client_id),
            "db_user": "asset_user",
            "db_host": "db.internal",
            "db_port": "5432",
            "db_password_encrypted": self.fernet.encrypt(password.as_bytes()),
        })
    }

    pub fn serve_client(&self, client_id: i64) {
        self.accounts
            .respond(&format!("client_id={}", client_id), 200, self.record(client_id, "tenant-pw"));
    }
}

pub fn token_for(tenant: Option<TenantClaims>) -> String {
    generate_jwt(&Claims::new("user-1".to_string(), tenant, 1), JWT_SECRET).expect("token")
}

pub fn client_claims(client_id: i64) -> TenantClaims {
    TenantClaims {
        alias: Some(format!("client_{}", client_id)),
        client_id: Some(client_id),
        client_username: None,
    }
}

pub fn get_with_token(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_json(response: axum::response::Response) -> Result<Value> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
