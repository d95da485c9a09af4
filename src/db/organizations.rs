//! Organization registry

use crate::db::ConstraintViolation;
use crate::error::{AppError, AppResult};
use crate::models::Organization;
use crate::validation::ValidationError;
use sqlx::PgPool;
use uuid::Uuid;

pub async fn list_organizations(pool: &PgPool) -> Result<Vec<Organization>, sqlx::Error> {
    sqlx::query_as::<_, Organization>("SELECT * FROM organizations ORDER BY name")
        .fetch_all(pool)
        .await
}

pub async fn organization_exists(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM organizations WHERE id = $1)")
        .bind(id)
        .fetch_one(pool)
        .await
}

/// Register an organization. Names are unique.
pub async fn insert_organization(
    pool: &PgPool,
    name: &str,
    description: Option<&str>,
) -> AppResult<Organization> {
    sqlx::query_as::<_, Organization>(
        "INSERT INTO organizations (name, description) VALUES ($1, $2) RETURNING *",
    )
    .bind(name)
    .bind(description)
    .fetch_one(pool)
    .await
    .map_err(|e| -> AppError {
        match ConstraintViolation::of(&e) {
            Some(ConstraintViolation::Unique) => {
                ValidationError::invalid("name", "an organization with this name exists").into()
            }
            _ => e.into(),
        }
    })
}
