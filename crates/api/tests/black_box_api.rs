use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::StatusCode;
use serde_json::json;

use funil_api::app::{build_app, build_app_with, AppServices};
use funil_api::config::AppConfig;
use funil_auth::{JwtClaims, PrincipalId, Role};
use funil_core::TenantId;
use funil_infra::MemoryStore;
use funil_integrations::WebhookVerifier;
use funil_outreach::{MailSender, OutboundEmail, SendError};
use jsonwebtoken::{Algorithm, EncodingKey, Header};

const JWT_SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(config: AppConfig) -> Self {
        let app = build_app(config).await;
        Self::serve(app).await
    }

    async fn spawn_with(config: AppConfig, services: AppServices) -> Self {
        let app = build_app_with(config, services);
        Self::serve(app).await
    }

    async fn serve(app: axum::Router) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(tenant_id: TenantId, roles: Vec<Role>) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: PrincipalId::new(),
        tenant_id,
        roles,
        issued_at: now - ChronoDuration::minutes(1),
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

fn in_memory_services(mailer: Option<Arc<dyn MailSender>>) -> AppServices {
    let store = Arc::new(MemoryStore::new());
    AppServices {
        contacts: store.clone(),
        deals: store.clone(),
        timeline: store.clone(),
        directory: store.clone(),
        tags: store.clone(),
        inbox: store.clone(),
        outreach: store,
        registry: None,
        ai: None,
        mailer,
        whatsapp: None,
        webhook_verifier: None,
    }
}

#[tokio::test]
async fn health_needs_no_token() {
    let server = TestServer::spawn(AppConfig::for_tests(JWT_SECRET)).await;
    let res = reqwest::get(format!("{}/health", server.base_url))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn protected_routes_reject_missing_and_garbage_tokens() {
    let server = TestServer::spawn(AppConfig::for_tests(JWT_SECRET)).await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/organizations", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(format!("{}/organizations", server.base_url))
        .bearer_auth("not-a-token")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn organization_crud_round_trip() {
    let server = TestServer::spawn(AppConfig::for_tests(JWT_SECRET)).await;
    let client = reqwest::Client::new();
    let token = mint_jwt(TenantId::new(), vec![Role::new("admin")]);

    let res = client
        .post(format!("{}/organizations", server.base_url))
        .bearer_auth(&token)
        .json(&json!({ "name": "Acme Ltda", "cnpj": "11.222.333/0001-81" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: serde_json::Value = res.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["cnpj"], "11222333000181");
    assert_eq!(created["cnpj_formatted"], "11.222.333/0001-81");

    let res = client
        .get(format!("{}/organizations/{}", server.base_url, id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .get(format!("{}/organizations?search=acme", server.base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let listed: serde_json::Value = res.json().await.unwrap();
    assert_eq!(listed["total"], 1);

    let res = client
        .get(format!("{}/organizations?search=zebra", server.base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let listed: serde_json::Value = res.json().await.unwrap();
    assert_eq!(listed["total"], 0);
}

#[tokio::test]
async fn duplicate_cnpj_is_a_conflict() {
    let server = TestServer::spawn(AppConfig::for_tests(JWT_SECRET)).await;
    let client = reqwest::Client::new();
    let token = mint_jwt(TenantId::new(), vec![Role::new("admin")]);

    for (name, expected) in [
        ("Primeira", StatusCode::CREATED),
        ("Segunda", StatusCode::CONFLICT),
    ] {
        let res = client
            .post(format!("{}/organizations", server.base_url))
            .bearer_auth(&token)
            .json(&json!({ "name": name, "cnpj": "11222333000181" }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), expected);
    }
}

#[tokio::test]
async fn merge_transfers_deals_and_can_be_undone() {
    let server = TestServer::spawn(AppConfig::for_tests(JWT_SECRET)).await;
    let client = reqwest::Client::new();
    let token = mint_jwt(TenantId::new(), vec![Role::new("admin")]);

    let create_org = |name: &str| {
        let client = client.clone();
        let token = token.clone();
        let url = format!("{}/organizations", server.base_url);
        let body = json!({ "name": name });
        async move {
            let res = client
                .post(url)
                .bearer_auth(token)
                .json(&body)
                .send()
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::CREATED);
            let v: serde_json::Value = res.json().await.unwrap();
            v["id"].as_str().unwrap().to_string()
        }
    };

    let a = create_org("Acme Matriz").await;
    let b = create_org("Acme Filial").await;

    // One pipeline + one deal parented to B.
    let res = client
        .post(format!("{}/pipelines", server.base_url))
        .bearer_auth(&token)
        .json(&json!({
            "name": "Vendas",
            "stages": [
                { "name": "Prospecção", "position": 0, "probability": 10 },
                { "name": "Fechamento", "position": 1, "probability": 90 }
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let pipeline: serde_json::Value = res.json().await.unwrap();
    let pipeline_id = pipeline["id"].as_str().unwrap();

    let res = client
        .post(format!("{}/deals", server.base_url))
        .bearer_auth(&token)
        .json(&json!({
            "title": "Contrato anual",
            "value_cents": 120000_00,
            "pipeline_id": pipeline_id,
            "organization_id": b,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let deal: serde_json::Value = res.json().await.unwrap();
    let deal_id = deal["id"].as_str().unwrap().to_string();

    // Merge B into A.
    let res = client
        .post(format!("{}/organizations/{}/merge", server.base_url, a))
        .bearer_auth(&token)
        .json(&json!({ "delete_id": b }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let merged: serde_json::Value = res.json().await.unwrap();
    let backup_id = merged["backup_id"].as_str().unwrap().to_string();

    // The deal now parents to A.
    let res = client
        .get(format!("{}/deals/{}", server.base_url, deal_id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let deal: serde_json::Value = res.json().await.unwrap();
    assert_eq!(deal["organization_id"].as_str().unwrap(), a);

    // B no longer exists.
    let res = client
        .get(format!("{}/organizations/{}", server.base_url, b))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // Exactly one organizations_merged history entry on A.
    let res = client
        .get(format!("{}/organizations/{}/history", server.base_url, a))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let history: serde_json::Value = res.json().await.unwrap();
    let merged_entries: Vec<_> = history["items"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e["kind"] == "organizations_merged")
        .collect();
    assert_eq!(merged_entries.len(), 1);

    // Undo restores B and the deal's parent.
    let res = client
        .post(format!(
            "{}/organizations/merge-backups/{}/undo",
            server.base_url, backup_id
        ))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client
        .get(format!("{}/organizations/{}", server.base_url, b))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .get(format!("{}/deals/{}", server.base_url, deal_id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let deal: serde_json::Value = res.json().await.unwrap();
    assert_eq!(deal["organization_id"].as_str().unwrap(), b);
}

#[tokio::test]
async fn rep_role_cannot_merge() {
    let server = TestServer::spawn(AppConfig::for_tests(JWT_SECRET)).await;
    let client = reqwest::Client::new();
    let tenant = TenantId::new();
    let admin = mint_jwt(tenant, vec![Role::new("admin")]);
    let rep = mint_jwt(tenant, vec![Role::new("rep")]);

    let mut ids = Vec::new();
    for name in ["A", "B"] {
        let res = client
            .post(format!("{}/organizations", server.base_url))
            .bearer_auth(&admin)
            .json(&json!({ "name": name }))
            .send()
            .await
            .unwrap();
        let v: serde_json::Value = res.json().await.unwrap();
        ids.push(v["id"].as_str().unwrap().to_string());
    }

    let res = client
        .post(format!("{}/organizations/{}/merge", server.base_url, ids[0]))
        .bearer_auth(&rep)
        .json(&json!({ "delete_id": ids[1] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn tag_filter_with_no_members_lists_nothing() {
    let server = TestServer::spawn(AppConfig::for_tests(JWT_SECRET)).await;
    let client = reqwest::Client::new();
    let token = mint_jwt(TenantId::new(), vec![Role::new("admin")]);

    let res = client
        .post(format!("{}/organizations", server.base_url))
        .bearer_auth(&token)
        .json(&json!({ "name": "Acme" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = client
        .post(format!("{}/tags", server.base_url))
        .bearer_auth(&token)
        .json(&json!({ "name": "VIP", "color": "#ff0000" }))
        .send()
        .await
        .unwrap();
    let tag: serde_json::Value = res.json().await.unwrap();
    let tag_id = tag["id"].as_str().unwrap();

    let res = client
        .get(format!(
            "{}/organizations?tags={}",
            server.base_url, tag_id
        ))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let listed: serde_json::Value = res.json().await.unwrap();
    assert_eq!(listed["total"], 0);
    assert_eq!(listed["items"].as_array().unwrap().len(), 0);
}

struct StubMailer {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl MailSender for StubMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<(), SendError> {
        self.sent.lock().unwrap().push(email.to.clone());
        Ok(())
    }
}

#[tokio::test]
async fn campaign_send_is_admin_only_and_resolves_recipients() {
    let stub = Arc::new(StubMailer {
        sent: Mutex::new(Vec::new()),
    });
    let services = in_memory_services(Some(stub.clone()));
    let server = TestServer::spawn_with(AppConfig::for_tests(JWT_SECRET), services).await;
    let client = reqwest::Client::new();
    let tenant = TenantId::new();
    let admin = mint_jwt(tenant, vec![Role::new("admin")]);
    let manager = mint_jwt(tenant, vec![Role::new("manager")]);

    let res = client
        .post(format!("{}/campaigns", server.base_url))
        .bearer_auth(&admin)
        .json(&json!({
            "name": "Lançamento",
            "subject": "Novidade",
            "body": "Olá!"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let campaign: serde_json::Value = res.json().await.unwrap();
    let id = campaign["id"].as_str().unwrap().to_string();

    let res = client
        .post(format!("{}/campaigns/{}/recipients", server.base_url, id))
        .bearer_auth(&admin)
        .json(&json!({
            "recipients": [
                { "email": "ana@example.com" },
                { "email": "bruno@example.com" }
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // Sending is admin-only.
    let res = client
        .post(format!("{}/campaigns/{}/send", server.base_url, id))
        .bearer_auth(&manager)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .post(format!("{}/campaigns/{}/send", server.base_url, id))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let finished: serde_json::Value = res.json().await.unwrap();
    assert_eq!(finished["status"], "done");
    assert_eq!(finished["sent_count"], 2);
    assert_eq!(
        *stub.sent.lock().unwrap(),
        vec!["ana@example.com", "bruno@example.com"]
    );
}

fn signed_webhook_secret() -> String {
    format!(
        "whsec_{}",
        base64::engine::general_purpose::STANDARD.encode(b"relay-signing-key")
    )
}

#[tokio::test]
async fn webhook_accepts_valid_signature_and_records_the_message() {
    let mut config = AppConfig::for_tests(JWT_SECRET);
    let secret = signed_webhook_secret();
    config.webhook_secret = Some(secret.clone());
    let server = TestServer::spawn(config).await;
    let client = reqwest::Client::new();

    let tenant = TenantId::new();
    let token = mint_jwt(tenant, vec![Role::new("admin")]);

    let payload = serde_json::to_vec(&json!({
        "type": "message.received",
        "tenant_id": tenant.as_uuid(),
        "from": "+5511912345678",
        "body": "Olá, quero um orçamento",
        "message_id": "wamid.001"
    }))
    .unwrap();

    let verifier = WebhookVerifier::new(&secret).unwrap();
    let timestamp = Utc::now().timestamp().to_string();
    let signature = verifier.sign("msg_1", &timestamp, &payload).unwrap();

    let res = client
        .post(format!("{}/webhooks/whatsapp", server.base_url))
        .header("svix-id", "msg_1")
        .header("svix-timestamp", &timestamp)
        .header("svix-signature", &signature)
        .header("content-type", "application/json")
        .body(payload.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // The conversation is visible through the authenticated inbox.
    let res = client
        .get(format!("{}/inbox/conversations", server.base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let conversations: serde_json::Value = res.json().await.unwrap();
    let items = conversations["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["phone"], "+5511912345678");
    assert_eq!(items[0]["unread_count"], 1);
}

#[tokio::test]
async fn webhook_rejects_tampered_bodies_and_stale_timestamps() {
    let mut config = AppConfig::for_tests(JWT_SECRET);
    let secret = signed_webhook_secret();
    config.webhook_secret = Some(secret.clone());
    let server = TestServer::spawn(config).await;
    let client = reqwest::Client::new();

    let tenant = TenantId::new();
    let payload = serde_json::to_vec(&json!({
        "type": "message.received",
        "tenant_id": tenant.as_uuid(),
        "from": "+5511912345678",
        "body": "Olá",
        "message_id": "wamid.002"
    }))
    .unwrap();

    let verifier = WebhookVerifier::new(&secret).unwrap();
    let timestamp = Utc::now().timestamp().to_string();
    let signature = verifier.sign("msg_2", &timestamp, &payload).unwrap();

    // Tampered body.
    let res = client
        .post(format!("{}/webhooks/whatsapp", server.base_url))
        .header("svix-id", "msg_2")
        .header("svix-timestamp", &timestamp)
        .header("svix-signature", &signature)
        .body("{\"hacked\":true}")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // Stale timestamp (signed correctly, but outside the window).
    let stale = (Utc::now().timestamp() - 301).to_string();
    let stale_signature = verifier.sign("msg_2", &stale, &payload).unwrap();
    let res = client
        .post(format!("{}/webhooks/whatsapp", server.base_url))
        .header("svix-id", "msg_2")
        .header("svix-timestamp", &stale)
        .header("svix-signature", &stale_signature)
        .body(payload)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // Missing headers.
    let res = client
        .post(format!("{}/webhooks/whatsapp", server.base_url))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}
