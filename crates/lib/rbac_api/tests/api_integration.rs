//! Integration tests: full router over an in-memory credential store.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::{Duration, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use rbac_api::{AppState, config::ApiConfig};
use rbac_core::auth::external::ExternalTokenVerifier;
use rbac_core::auth::jwt::{KeyPair, TokenCodec};
use rbac_core::auth::password::hash_password_with_cost;
use rbac_core::models::auth::{GrantId, Identity, IdentityId, RoleId};
use rbac_core::store::memory::MemoryStore;
use rbac_core::store::{CredentialStore, NewEndpointGrant, NewIdentity};
use serde_json::{Value, json};
use tower::ServiceExt;

const PRIVATE_PEM: &str = include_str!("../../rbac_core/tests/fixtures/private.pem");
const PUBLIC_PEM: &str = include_str!("../../rbac_core/tests/fixtures/public.pem");

const AUD: &str = "shop-app";
const ISS: &str = "https://accounts.example.com";

struct TestApp {
    app: Router,
    store: Arc<MemoryStore>,
    codec: TokenCodec,
    ana: Identity,
    staff: RoleId,
}

impl TestApp {
    async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let ana = store
            .create_identity(NewIdentity {
                login: "ana".into(),
                email: "ana@example.com".into(),
                name: "Ana".into(),
                password_hash: Some(hash_password_with_cost("correct horse", 4).unwrap()),
                provider: "local".into(),
                provider_id: None,
                active: true,
            })
            .await
            .unwrap();
        let staff = store.add_role("staff").await;
        store.assign_role(ana.id, "staff").await.unwrap();

        let codec = TokenCodec::new(
            KeyPair::from_pem(PRIVATE_PEM.as_bytes(), PUBLIC_PEM.as_bytes()).unwrap(),
        );
        let config = ApiConfig {
            external_audiences: vec![AUD.into()],
            external_issuers: vec![ISS.into()],
            ..ApiConfig::default()
        };
        let external =
            ExternalTokenVerifier::new(config.external_audiences.clone(), config.external_issuers.clone());
        let state = AppState::new(store.clone(), codec.clone(), external, config);

        Self {
            app: rbac_api::router(state),
            store,
            codec,
            ana,
            staff,
        }
    }

    async fn allow(&self, method: &str, path: &str) -> GrantId {
        let grant = match self
            .store
            .insert_grant(NewEndpointGrant {
                path: path.into(),
                method: method.into(),
                description: String::new(),
                hidden: false,
                public: false,
            })
            .await
            .unwrap()
        {
            Some(grant) => grant.id,
            None => self
                .store
                .list_grants()
                .await
                .unwrap()
                .into_iter()
                .find(|g| g.path == path && g.method == method)
                .unwrap()
                .id,
        };
        self.store.grant(self.staff, grant).await;
        grant
    }

    fn token(&self) -> String {
        self.codec.issue(&self.ana).unwrap()
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let resp = self.app.clone().oneshot(req).await.expect("request");
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .expect("read body");
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(Value::Null)
        };
        (status, json)
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut req = Request::builder().uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(req.body(Body::empty()).unwrap()).await
    }

    async fn send_json(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Value,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(req.body(Body::from(body.to_string())).unwrap()).await
    }
}

#[tokio::test]
async fn health_is_public() {
    let t = TestApp::new().await;
    let (status, body) = t.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn login_returns_identity_and_usable_token() {
    let t = TestApp::new().await;
    let (status, body) = t
        .send_json("POST", "/login", None, json!({ "user": "ana", "password": "correct horse" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["login"], "ana");
    assert_eq!(body["id"], t.ana.id.0);
    assert!(body.get("password_hash").is_none());
    assert!(body["last_login"].is_string());

    let token = body["token"].as_str().unwrap();
    assert_eq!(token.split('.').count(), 3);
    let claims = t.codec.verify(token).unwrap();
    assert_eq!(claims.identity_id(), t.ana.id);
    assert_eq!(claims.iss, "RBAC");
}

#[tokio::test]
async fn login_failures_are_indistinguishable() {
    let t = TestApp::new().await;
    let (s1, b1) = t
        .send_json("POST", "/login", None, json!({ "user": "ana", "password": "wrong" }))
        .await;
    let (s2, b2) = t
        .send_json("POST", "/login", None, json!({ "user": "nobody", "password": "x" }))
        .await;
    assert_eq!(s1, StatusCode::UNAUTHORIZED);
    assert_eq!(s2, StatusCode::UNAUTHORIZED);
    assert_eq!(b1, b2);
    assert_eq!(b1["error"], "Invalid credentials");
}

#[tokio::test]
async fn malformed_login_body_is_bad_request() {
    let t = TestApp::new().await;
    let (status, body) = t.send_json("POST", "/login", None, json!({ "user": "ana" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let req = Request::builder()
        .method("POST")
        .uri("/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = t.send(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn protected_routes_require_a_valid_token() {
    let t = TestApp::new().await;
    t.allow("GET", "/me").await;

    let (status, body) = t.get("/me", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = t.get("/me", Some("not-a-token")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .uri("/me")
        .header(header::AUTHORIZATION, t.token())
        .body(Body::empty())
        .unwrap();
    let (status, _) = t.send(req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = t.get("/me", Some(t.token().as_str())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "ana@example.com");
}

#[tokio::test]
async fn expired_token_is_rejected() {
    let t = TestApp::new().await;
    t.allow("GET", "/me").await;
    let stale = t
        .codec
        .issue_at(&t.ana, Utc::now() - Duration::hours(2))
        .unwrap();
    let (status, body) = t.get("/me", Some(stale.as_str())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Token expired");
}

#[tokio::test]
async fn grants_are_reread_on_every_request() {
    let t = TestApp::new().await;
    let token = t.token();

    let (status, body) = t.get("/me/permissions", Some(token.as_str())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].is_string());

    let grant = t.allow("GET", "/me/permissions").await;
    let (status, body) = t.get("/me/permissions", Some(token.as_str())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["role"]["name"], "staff");
    assert_eq!(body[0]["grants"][0]["path"], "/me/permissions");

    t.store.revoke(t.staff, grant).await;
    let (status, _) = t.get("/me/permissions", Some(token.as_str())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn placeholder_grants_match_one_segment_and_method() {
    let t = TestApp::new().await;
    t.allow("GET", "/roles/{id}/apis").await;
    let token = t.token();

    let staff = t.staff.0;
    let (status, body) = t.get(&format!("/roles/{staff}/apis"), Some(token.as_str())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"]["name"], "staff");

    let (status, _) = t
        .send_json("PUT", &format!("/roles/{staff}/apis"), Some(token.as_str()), json!({ "apis": [] }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn replacing_role_grants_takes_effect_immediately() {
    let t = TestApp::new().await;
    t.allow("PUT", "/roles/{id}/apis").await;
    let me = t.allow("GET", "/me").await;
    let token = t.token();
    let user_role = t.store.role_id("user").await.unwrap();

    let (status, body) = t
        .send_json(
            "PUT",
            &format!("/roles/{}/apis", user_role.0),
            Some(token.as_str()),
            json!({ "apis": [me.0, 999_999] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"]["name"], "user");
    assert_eq!(body["grants"].as_array().unwrap().len(), 1);

    let (status, _) = t
        .send_json("PUT", "/roles/424242/apis", Some(token.as_str()), json!({ "apis": [] }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deleted_identity_with_live_token_is_unauthorized() {
    let t = TestApp::new().await;
    t.allow("GET", "/me").await;
    let token = t.token();
    t.store.soft_delete(t.ana.id).await;
    let (status, _) = t.get("/me", Some(token.as_str())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn refresh_extends_a_valid_token() {
    let t = TestApp::new().await;
    let old = t
        .codec
        .issue_at(&t.ana, Utc::now() - Duration::minutes(30))
        .unwrap();
    let old_exp = t.codec.verify(&old).unwrap().exp;

    let (status, body) = t.get("/refresh", Some(old.as_str())).await;
    assert_eq!(status, StatusCode::OK);
    let fresh = body["token"].as_str().unwrap();
    let claims = t.codec.verify(fresh).unwrap();
    assert!(claims.exp > old_exp);
    assert_eq!(claims.identity_id(), t.ana.id);

    let expired = t
        .codec
        .issue_at(&t.ana, Utc::now() - Duration::hours(2))
        .unwrap();
    let (status, _) = t.get("/refresh", Some(expired.as_str())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = t.get("/refresh", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn auth_check_reports_session_state() {
    let t = TestApp::new().await;
    let (status, body) = t.get("/auth/check", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "No token provided");

    let (status, body) = t.get("/auth/check", Some(t.token().as_str())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "valid");
    assert_eq!(body["identity_id"], t.ana.id.0);

    let (status, body) = t.get("/auth/check", Some("a.b.c")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid token");
}

#[tokio::test]
async fn apis_sync_reports_and_registers_routes() {
    let t = TestApp::new().await;
    t.allow("GET", "/apis/sync").await;
    t.allow("POST", "/apis/sync").await;
    let token = t.token();

    let (status, report) = t.get("/apis/sync", Some(token.as_str())).await;
    assert_eq!(status, StatusCode::OK);
    let existing = report["existing"].as_array().unwrap();
    let missing = report["missing"].as_array().unwrap();
    assert_eq!(existing.len(), 2);
    assert!(missing.contains(&json!({ "method": "GET", "path": "/me" })));
    assert!(!missing.contains(&json!({ "method": "GET", "path": "/apis/sync" })));

    let (status, body) = t
        .send_json(
            "POST",
            "/apis/sync",
            Some(token.as_str()),
            json!({ "endpoints": [
                { "method": "GET", "path": "/me" },
                { "method": "GET", "path": "/apis/sync" },
            ]}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["added"], json!([{ "method": "GET", "path": "/me" }]));

    // Registered but ungranted: still forbidden.
    let (status, _) = t.get("/me", Some(token.as_str())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = t
        .send_json(
            "POST",
            "/apis/sync",
            Some(token.as_str()),
            json!({ "endpoints": [{ "method": "GET", "path": "no-slash" }] }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

fn external_token(email: &str, aud: &str) -> String {
    let now = Utc::now();
    encode(
        &Header::default(),
        &json!({
            "aud": aud,
            "iss": ISS,
            "exp": (now + Duration::minutes(10)).timestamp(),
            "iat": now.timestamp(),
            "auth_time": now.timestamp(),
            "sub": "ext-7",
            "email": email,
            "email_verified": true,
            "name": "Bob",
        }),
        &EncodingKey::from_secret(b"unused"),
    )
    .unwrap()
}

#[tokio::test]
async fn external_login_creates_identity_once() {
    let t = TestApp::new().await;
    let token = external_token("bob@example.com", AUD);

    let (status, body) = t
        .send_json("POST", "/login/external", None, json!({ "id_token": token }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "bob@example.com");
    assert_eq!(body["provider"], "external");
    assert_eq!(body["roles"], json!(["user"]));
    let id = IdentityId(body["id"].as_i64().unwrap());
    assert!(t.codec.verify(body["token"].as_str().unwrap()).is_ok());

    let (status, again) = t
        .send_json("POST", "/login/external", None, json!({ "id_token": token }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["id"], id.0);
}

#[tokio::test]
async fn external_login_rejects_foreign_audience_generically() {
    let t = TestApp::new().await;
    let token = external_token("eve@example.com", "other-app");
    let (status, body) = t
        .send_json("POST", "/login/external", None, json!({ "id_token": token }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid external token");
    assert!(t.store.identity_by_email("eve@example.com").await.unwrap().is_none());
}
