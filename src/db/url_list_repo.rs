use crate::models::UrlListRecord;
use sqlx::PgPool;

/// Insert or replace the URL list kept for a visitor.
pub async fn upsert_url_list(
    pool: &PgPool,
    visitor_id: &str,
    urls: &[String],
    user_id: Option<&str>,
) -> Result<UrlListRecord, sqlx::Error> {
    let record = sqlx::query_as::<_, UrlListRecord>(
        r#"
        INSERT INTO visitor_url_lists (visitor_id, user_id, urls)
        VALUES ($1, $2, $3)
        ON CONFLICT (visitor_id)
        DO UPDATE SET urls = EXCLUDED.urls, user_id = EXCLUDED.user_id, updated_at = NOW()
        RETURNING id, visitor_id, user_id, urls, created_at, updated_at
        "#,
    )
    .bind(visitor_id)
    .bind(user_id)
    .bind(urls)
    .fetch_one(pool)
    .await?;

    Ok(record)
}
