use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ContainerRecord {
    pub inv_number: i64,
    pub container_id: Option<String>,
    pub delivery_notes: Option<String>,
    pub shipping_line: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Records still waiting for a container id.
pub async fn list_pending(db: &PgPool) -> anyhow::Result<Vec<ContainerRecord>> {
    let rows = sqlx::query_as::<_, ContainerRecord>(
        r#"
        SELECT inv_number, container_id, delivery_notes, shipping_line, updated_at
        FROM container_list
        WHERE container_id IS NULL
        ORDER BY inv_number
        "#,
    )
    .fetch_all(db)
    .await?;
    Ok(rows)
}

/// Records that already carry a container id, most recently assigned first.
pub async fn list_history(db: &PgPool) -> anyhow::Result<Vec<ContainerRecord>> {
    let rows = sqlx::query_as::<_, ContainerRecord>(
        r#"
        SELECT inv_number, container_id, delivery_notes, shipping_line, updated_at
        FROM container_history
        ORDER BY updated_at DESC, inv_number
        "#,
    )
    .fetch_all(db)
    .await?;
    Ok(rows)
}

/// Set the container id on a pending record. `None` when the record does
/// not exist or was already assigned. Absent optional fields keep their
/// stored values.
pub async fn assign_container(
    db: &PgPool,
    inv_number: i64,
    container_id: &str,
    delivery_notes: Option<&str>,
    shipping_line: Option<&str>,
) -> anyhow::Result<Option<ContainerRecord>> {
    let row = sqlx::query_as::<_, ContainerRecord>(
        r#"
        UPDATE container_list
           SET container_id   = $2,
               delivery_notes = COALESCE($3, delivery_notes),
               shipping_line  = COALESCE($4, shipping_line),
               updated_at     = now()
         WHERE inv_number = $1
           AND container_id IS NULL
        RETURNING inv_number, container_id, delivery_notes, shipping_line, updated_at
        "#,
    )
    .bind(inv_number)
    .bind(container_id)
    .bind(delivery_notes)
    .bind(shipping_line)
    .fetch_optional(db)
    .await?;
    Ok(row)
}
