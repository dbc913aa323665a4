//! Embedded schema migrations (`rbac_core/migrations/`).

use sqlx::PgPool;
use sqlx::migrate::{MigrateError, Migrator};

/// Users, roles, endpoint grants and their join tables; seeds the `admin`
/// and `user` roles.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Bring the schema behind `pool` up to date.
pub async fn migrate(pool: &PgPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}
