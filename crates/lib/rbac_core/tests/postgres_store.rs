//! `PgCredentialStore` against a live PostgreSQL.
//!
//! Set `TEST_DATABASE_URL` (environment or `.env.test`) to run these; each
//! test migrates a private schema and drops it afterwards. Without the
//! variable the tests return early.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Duration, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use rbac_core::auth::external::ExternalTokenVerifier;
use rbac_core::auth::resolver::{DEFAULT_ROLE, IdentityResolver};
use rbac_core::migrate::MIGRATOR;
use rbac_core::store::postgres::PgCredentialStore;
use rbac_core::store::{CredentialStore, NewIdentity};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tokio::time::Instant;

const AUD: &str = "shop-app";
const ISS: &str = "https://accounts.example.com";

struct TestDb {
    admin: PgPool,
    pool: PgPool,
    schema: String,
}

impl TestDb {
    async fn connect() -> Option<Self> {
        dotenvy::from_filename(".env.test").ok();
        let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
            eprintln!("TEST_DATABASE_URL not set; skipping");
            return None;
        };

        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        let schema = format!("rbac_test_{}_{nanos}", std::process::id());
        let admin = PgPoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .expect("connect to test database");
        admin
            .execute(format!("CREATE SCHEMA {schema}").as_str())
            .await
            .expect("create schema");

        let search_path = format!("SET search_path TO {schema}");
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .after_connect(move |conn, _meta| {
                let search_path = search_path.clone();
                Box::pin(async move {
                    conn.execute(search_path.as_str()).await?;
                    Ok(())
                })
            })
            .connect(&url)
            .await
            .expect("connect with test schema");
        MIGRATOR.run(&pool).await.expect("migrate");

        Some(Self { admin, pool, schema })
    }

    fn store(&self) -> Arc<PgCredentialStore> {
        Arc::new(PgCredentialStore::new(self.pool.clone()))
    }

    async fn teardown(self) {
        self.pool.close().await;
        self.admin
            .execute(format!("DROP SCHEMA {} CASCADE", self.schema).as_str())
            .await
            .expect("drop schema");
    }
}

fn soon() -> Instant {
    Instant::now() + std::time::Duration::from_secs(10)
}

fn external_token(email: &str, name: &str) -> String {
    let now = Utc::now();
    encode(
        &Header::default(),
        &json!({
            "aud": AUD,
            "iss": ISS,
            "exp": (now + Duration::minutes(10)).timestamp(),
            "iat": now.timestamp(),
            "auth_time": now.timestamp(),
            "sub": "ext-7",
            "email": email,
            "email_verified": true,
            "name": name,
        }),
        &EncodingKey::from_secret(b"unused"),
    )
    .unwrap()
}

fn local(login: &str, email: &str) -> NewIdentity {
    NewIdentity {
        login: login.into(),
        email: email.into(),
        name: login.into(),
        password_hash: None,
        provider: "local".into(),
        provider_id: None,
        active: true,
    }
}

#[tokio::test]
async fn external_login_stores_long_email_and_name() {
    let Some(db) = TestDb::connect().await else {
        return;
    };
    let resolver = IdentityResolver::new(
        db.store(),
        ExternalTokenVerifier::new(vec![AUD.into()], vec![ISS.into()]),
        DEFAULT_ROLE,
    );

    let email = format!("{}@subdomain.example-company.com", "a".repeat(48));
    let name = "N".repeat(60);
    let created = resolver
        .login_external(&external_token(&email, &name), soon())
        .await
        .unwrap();
    assert_eq!(created.login, email);
    assert_eq!(created.name, name);
    assert_eq!(created.roles, vec![DEFAULT_ROLE]);

    let renamed = "M".repeat(80);
    let again = resolver
        .login_external(&external_token(&email, &renamed), soon())
        .await
        .unwrap();
    assert_eq!(again.id, created.id);
    assert_eq!(again.name, renamed);

    db.teardown().await;
}

#[tokio::test]
async fn login_lookup_prefers_login_over_email() {
    let Some(db) = TestDb::connect().await else {
        return;
    };
    let store = db.store();
    let by_email = store
        .create_identity(local("ana", "ana@example.com"))
        .await
        .unwrap();
    let by_login = store
        .create_identity(local("ana@example.com", "other@example.com"))
        .await
        .unwrap();

    let found = store.identity_by_login("ana@example.com").await.unwrap().unwrap();
    assert_eq!(found.identity.id, by_login.id);
    let found = store.identity_by_login("ana").await.unwrap().unwrap();
    assert_eq!(found.identity.id, by_email.id);

    db.teardown().await;
}
