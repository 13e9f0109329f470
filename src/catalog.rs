//! Catalog Store (§4.1): persists templates and runtime configurations and
//! resolves effective launch parameters. Keys are immutable once created.

use sqlx::PgPool;

use crate::error::{Error, Result};
use crate::models::{RuntimeConfig, Template};

/// List templates, optionally restricted to `active=true`. Callers pass
/// `students_only=true` to additionally filter on `allowed_for_students`
/// (§4.1: "Students reading the catalog see only entries flagged
/// `allowed_for_students=true` and `active=true`").
pub async fn list_templates(
    pool: &PgPool,
    active_only: bool,
    students_only: bool,
) -> Result<Vec<Template>> {
    let rows = sqlx::query_as::<_, Template>(
        "SELECT * FROM templates
         WHERE ($1 OR active)
           AND ($2 OR allowed_for_students)
         ORDER BY key",
    )
    .bind(!active_only)
    .bind(!students_only)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn get_template(pool: &PgPool, key: &str) -> Result<Template> {
    sqlx::query_as::<_, Template>("SELECT * FROM templates WHERE key = $1")
        .bind(key)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::not_found("template", key))
}

pub async fn list_runtimes(pool: &PgPool, active_only: bool) -> Result<Vec<RuntimeConfig>> {
    let rows = sqlx::query_as::<_, RuntimeConfig>(
        "SELECT * FROM runtime_configs WHERE ($1 OR active) ORDER BY key",
    )
    .bind(!active_only)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn get_runtime(pool: &PgPool, key: &str) -> Result<RuntimeConfig> {
    sqlx::query_as::<_, RuntimeConfig>("SELECT * FROM runtime_configs WHERE key = $1")
        .bind(key)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::not_found("runtime_config", key))
}

/// Admin CRUD: insert a new template. The key is immutable from here on —
/// `update_template` below can never change it.
pub async fn create_template(pool: &PgPool, template: &Template) -> Result<Template> {
    sqlx::query_as::<_, Template>(
        "INSERT INTO templates (key, image, default_port, exposure, tags, allowed_for_students, active)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING *",
    )
    .bind(&template.key)
    .bind(&template.image)
    .bind(template.default_port)
    .bind(&template.exposure)
    .bind(&template.tags)
    .bind(template.allowed_for_students)
    .bind(template.active)
    .fetch_one(pool)
    .await
    .map_err(Error::from)
}

/// Admin CRUD: edit everything but the key. Deactivating a template must not
/// affect running labs — this function only ever touches the catalog row.
pub async fn update_template(pool: &PgPool, key: &str, template: &Template) -> Result<Template> {
    sqlx::query_as::<_, Template>(
        "UPDATE templates
         SET image = $2, default_port = $3, exposure = $4, tags = $5,
             allowed_for_students = $6, active = $7
         WHERE key = $1
         RETURNING *",
    )
    .bind(key)
    .bind(&template.image)
    .bind(template.default_port)
    .bind(&template.exposure)
    .bind(&template.tags)
    .bind(template.allowed_for_students)
    .bind(template.active)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::not_found("template", key))
}

pub async fn deactivate_template(pool: &PgPool, key: &str) -> Result<()> {
    let result = sqlx::query("UPDATE templates SET active = FALSE WHERE key = $1")
        .bind(key)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::not_found("template", key));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_round_trips_through_serde() {
        let t = Template {
            id: 1,
            key: "jupyter".into(),
            image: "jupyter/base-notebook:latest".into(),
            default_port: 8888,
            exposure: "ClusterIP".into(),
            tags: vec!["python".into(), "notebook".into()],
            allowed_for_students: true,
            active: true,
        };
        let json = serde_json::to_string(&t).unwrap();
        let back: Template = serde_json::from_str(&json).unwrap();
        assert_eq!(back.key, t.key);
        assert_eq!(back.tags, t.tags);
    }

    #[sqlx::test]
    async fn template_crud_round_trip(pool: PgPool) -> sqlx::Result<()> {
        let template = Template {
            id: 0,
            key: "jupyter".into(),
            image: "jupyter/base-notebook:latest".into(),
            default_port: 8888,
            exposure: "ClusterIP".into(),
            tags: vec!["python".into(), "notebook".into()],
            allowed_for_students: true,
            active: true,
        };

        let created = create_template(&pool, &template).await.unwrap();
        assert_eq!(created.key, "jupyter");

        let fetched = get_template(&pool, "jupyter").await.unwrap();
        assert_eq!(fetched.image, template.image);

        deactivate_template(&pool, "jupyter").await.unwrap();
        let deactivated = get_template(&pool, "jupyter").await.unwrap();
        assert!(!deactivated.active);

        assert!(get_template(&pool, "does-not-exist").await.is_err());

        Ok(())
    }
}
