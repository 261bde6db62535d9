use crate::models::{RawVisit, VisitRecord};
use serde_json::Value;
use sqlx::PgPool;

/// Persist one raw visit exactly as fetched. Action details go into their own
/// column; the rest of the upstream document lands in `visit_info`.
pub async fn create_raw_visit(pool: &PgPool, visit: &RawVisit) -> Result<VisitRecord, sqlx::Error> {
    let action_details =
        serde_json::to_value(&visit.action_details).unwrap_or_else(|_| Value::Array(vec![]));

    let record = sqlx::query_as::<_, VisitRecord>(
        r#"
        INSERT INTO raw_visits (visitor_id, user_id, action_details, visit_info)
        VALUES ($1, $2, $3, $4)
        RETURNING id, visitor_id, user_id, action_details, visit_info, created_at
        "#,
    )
    .bind(&visit.visitor_id)
    .bind(&visit.user_id)
    .bind(action_details)
    .bind(visit.visit_info())
    .fetch_one(pool)
    .await?;

    Ok(record)
}

/// All stored visits for a visitor, oldest first.
pub async fn find_by_visitor_id(
    pool: &PgPool,
    visitor_id: &str,
) -> Result<Vec<VisitRecord>, sqlx::Error> {
    let records = sqlx::query_as::<_, VisitRecord>(
        r#"
        SELECT id, visitor_id, user_id, action_details, visit_info, created_at
        FROM raw_visits
        WHERE visitor_id = $1
        ORDER BY created_at ASC
        "#,
    )
    .bind(visitor_id)
    .fetch_all(pool)
    .await?;

    Ok(records)
}
