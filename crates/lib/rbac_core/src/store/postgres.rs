//! PostgreSQL credential store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{CredentialStore, IdentityUpdate, NewEndpointGrant, NewIdentity, StoreError};
use crate::models::auth::{
    EndpointGrant, GrantId, Identity, IdentityId, IdentityWithPassword, Role, RoleGrants, RoleId,
};

/// Identity columns plus aggregated role names. Callers append a filter and
/// `GROUP BY u.id`.
const IDENTITY_SELECT: &str = "SELECT u.id, u.login, u.email, u.name, u.last_name, \
     u.password_hash, u.provider, u.provider_id, u.active, u.last_login, \
     COALESCE(array_agg(r.name::text ORDER BY r.name) FILTER (WHERE r.name IS NOT NULL), '{}') AS roles \
     FROM users u \
     LEFT JOIN user_roles ur ON ur.user_id = u.id \
     LEFT JOIN roles r ON r.id = ur.role_id \
     WHERE u.deleted_at IS NULL";

const GRANT_COLUMNS: &str = "g.id, g.path, g.method, g.description, g.hidden, g.public";

#[derive(sqlx::FromRow)]
struct IdentityRow {
    id: i64,
    login: String,
    email: String,
    name: String,
    last_name: String,
    password_hash: Option<String>,
    provider: String,
    provider_id: Option<String>,
    active: bool,
    last_login: Option<DateTime<Utc>>,
    roles: Vec<String>,
}

impl IdentityRow {
    fn into_parts(self) -> IdentityWithPassword {
        IdentityWithPassword {
            identity: Identity {
                id: IdentityId(self.id),
                login: self.login,
                email: self.email,
                name: self.name,
                last_name: self.last_name,
                provider: self.provider,
                provider_id: self.provider_id,
                active: self.active,
                last_login: self.last_login,
                roles: self.roles,
            },
            password_hash: self.password_hash,
        }
    }
}

#[derive(sqlx::FromRow)]
struct GrantRow {
    id: i64,
    path: String,
    method: String,
    description: String,
    hidden: bool,
    public: bool,
}

impl From<GrantRow> for EndpointGrant {
    fn from(row: GrantRow) -> Self {
        EndpointGrant {
            id: GrantId(row.id),
            path: row.path,
            method: row.method,
            description: row.description,
            hidden: row.hidden,
            public: row.public,
        }
    }
}

/// One row per (role, grant); grant columns are NULL for roles without grants.
#[derive(sqlx::FromRow)]
struct RoleGrantRow {
    role_id: i64,
    role_name: String,
    grant_id: Option<i64>,
    path: Option<String>,
    method: Option<String>,
    description: Option<String>,
    hidden: Option<bool>,
    public: Option<bool>,
}

/// Fold ordered (role, grant) rows into one `RoleGrants` per role.
fn fold_role_rows(rows: Vec<RoleGrantRow>) -> Vec<RoleGrants> {
    let mut out: Vec<RoleGrants> = Vec::new();
    for row in rows {
        let is_new_role = out.last().is_none_or(|last| last.role.id.0 != row.role_id);
        if is_new_role {
            out.push(RoleGrants {
                role: Role {
                    id: RoleId(row.role_id),
                    name: row.role_name.clone(),
                },
                grants: Vec::new(),
            });
        }
        if let (Some(id), Some(path), Some(method)) = (row.grant_id, row.path, row.method)
            && let Some(current) = out.last_mut()
        {
            current.grants.push(EndpointGrant {
                id: GrantId(id),
                path,
                method,
                description: row.description.unwrap_or_default(),
                hidden: row.hidden.unwrap_or(false),
                public: row.public.unwrap_or(false),
            });
        }
    }
    out
}

fn map_unique_violation(e: sqlx::Error, what: &str) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(format!("{what} already exists"))
        }
        _ => StoreError::Db(e),
    }
}

/// Credential store backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// First live identity matching `filter`, ranked by `order`.
    async fn fetch_identity(
        &self,
        filter: &str,
        order: &str,
        value: &str,
    ) -> Result<Option<IdentityWithPassword>, StoreError> {
        let sql = format!("{IDENTITY_SELECT} AND {filter} GROUP BY u.id ORDER BY {order} LIMIT 1");
        let row = sqlx::query_as::<_, IdentityRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(IdentityRow::into_parts))
    }

    async fn require_identity(&self, id: IdentityId) -> Result<Identity, StoreError> {
        self.identity_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("identity {id}")))
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn identity_by_id(&self, id: IdentityId) -> Result<Option<Identity>, StoreError> {
        let sql = format!("{IDENTITY_SELECT} AND u.id = $1 GROUP BY u.id");
        let row = sqlx::query_as::<_, IdentityRow>(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.into_parts().identity))
    }

    async fn identity_by_login(
        &self,
        login_or_email: &str,
    ) -> Result<Option<IdentityWithPassword>, StoreError> {
        // A login match wins over another identity's email match.
        self.fetch_identity(
            "(u.login = $1 OR u.email = $1)",
            "(u.login = $1) DESC, u.id",
            login_or_email,
        )
        .await
    }

    async fn identity_by_email(&self, email: &str) -> Result<Option<Identity>, StoreError> {
        Ok(self
            .fetch_identity("u.email = $1", "u.id", email)
            .await?
            .map(|r| r.identity))
    }

    async fn roles_with_grants(&self, id: IdentityId) -> Result<Vec<RoleGrants>, StoreError> {
        let rows = sqlx::query_as::<_, RoleGrantRow>(
            "SELECT r.id AS role_id, r.name AS role_name, g.id AS grant_id, g.path, g.method, \
                    g.description, g.hidden, g.public \
             FROM user_roles ur \
             JOIN users u ON u.id = ur.user_id AND u.deleted_at IS NULL \
             JOIN roles r ON r.id = ur.role_id \
             LEFT JOIN role_grants rg ON rg.role_id = r.id \
             LEFT JOIN endpoint_grants g ON g.id = rg.grant_id \
             WHERE ur.user_id = $1 \
             ORDER BY r.id, g.id",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(fold_role_rows(rows))
    }

    async fn create_identity(&self, new: NewIdentity) -> Result<Identity, StoreError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO users (login, email, name, password_hash, provider, provider_id, active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
        )
        .bind(&new.login)
        .bind(&new.email)
        .bind(&new.name)
        .bind(&new.password_hash)
        .bind(&new.provider)
        .bind(&new.provider_id)
        .bind(new.active)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "login or email"))?;
        self.require_identity(IdentityId(id)).await
    }

    async fn update_identity(
        &self,
        id: IdentityId,
        update: IdentityUpdate,
    ) -> Result<Identity, StoreError> {
        let result = sqlx::query(
            "UPDATE users SET login = COALESCE($2, login), name = COALESCE($3, name), \
                    active = COALESCE($4, active), updated_at = now() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id.0)
        .bind(&update.login)
        .bind(&update.name)
        .bind(update.active)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "login"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("identity {id}")));
        }
        self.require_identity(id).await
    }

    async fn record_login(&self, id: IdentityId, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET last_login = $2 WHERE id = $1 AND deleted_at IS NULL")
            .bind(id.0)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn assign_role(&self, id: IdentityId, role_name: &str) -> Result<(), StoreError> {
        let role_id = sqlx::query_scalar::<_, i64>("SELECT id FROM roles WHERE name = $1")
            .bind(role_name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("role '{role_name}'")))?;
        sqlx::query(
            "INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(id.0)
        .bind(role_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_grants(&self) -> Result<Vec<EndpointGrant>, StoreError> {
        let sql = format!("SELECT {GRANT_COLUMNS} FROM endpoint_grants g ORDER BY g.id");
        let rows = sqlx::query_as::<_, GrantRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(EndpointGrant::from).collect())
    }

    async fn insert_grant(
        &self,
        grant: NewEndpointGrant,
    ) -> Result<Option<EndpointGrant>, StoreError> {
        let row = sqlx::query_as::<_, GrantRow>(
            "INSERT INTO endpoint_grants (path, method, description, hidden, public) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (path, method) DO NOTHING \
             RETURNING id, path, method, description, hidden, public",
        )
        .bind(&grant.path)
        .bind(&grant.method)
        .bind(&grant.description)
        .bind(grant.hidden)
        .bind(grant.public)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(EndpointGrant::from))
    }

    async fn role_grants(&self, role_id: RoleId) -> Result<RoleGrants, StoreError> {
        let name = sqlx::query_scalar::<_, String>("SELECT name FROM roles WHERE id = $1")
            .bind(role_id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("role {}", role_id.0)))?;
        let sql = format!(
            "SELECT {GRANT_COLUMNS} FROM role_grants rg \
             JOIN endpoint_grants g ON g.id = rg.grant_id \
             WHERE rg.role_id = $1 ORDER BY g.id"
        );
        let rows = sqlx::query_as::<_, GrantRow>(&sql)
            .bind(role_id.0)
            .fetch_all(&self.pool)
            .await?;
        Ok(RoleGrants {
            role: Role { id: role_id, name },
            grants: rows.into_iter().map(EndpointGrant::from).collect(),
        })
    }

    async fn replace_role_grants(
        &self,
        role_id: RoleId,
        grant_ids: &[GrantId],
    ) -> Result<RoleGrants, StoreError> {
        let ids: Vec<i64> = grant_ids.iter().map(|g| g.0).collect();
        let mut tx = self.pool.begin().await?;
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM roles WHERE id = $1)")
            .bind(role_id.0)
            .fetch_one(&mut *tx)
            .await?;
        if !exists {
            return Err(StoreError::NotFound(format!("role {}", role_id.0)));
        }
        sqlx::query("DELETE FROM role_grants WHERE role_id = $1")
            .bind(role_id.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO role_grants (role_id, grant_id) \
             SELECT $1, id FROM endpoint_grants WHERE id = ANY($2)",
        )
        .bind(role_id.0)
        .bind(&ids)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        self.role_grants(role_id).await
    }
}
