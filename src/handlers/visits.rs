/// Visit lookup and URL-list upsert endpoints
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use sqlx::PgPool;

use crate::db::{url_list_repo, visit_repo};
use crate::error::{AppError, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveVisitsRequest {
    pub visitor_id: String,
    pub url: Vec<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// All stored visits for a visitor, 404 when none exist.
pub async fn get_visits_by_visitor_id(
    pool: web::Data<PgPool>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let visitor_id = path.into_inner();

    let visits = visit_repo::find_by_visitor_id(&pool, &visitor_id).await?;
    if visits.is_empty() {
        return Err(AppError::NotFound(format!(
            "No visits found for visitorId: {visitor_id}"
        )));
    }

    Ok(HttpResponse::Ok().json(visits))
}

/// Upsert the URL list kept for a visitor.
pub async fn save_visits(
    pool: web::Data<PgPool>,
    req: web::Json<SaveVisitsRequest>,
) -> Result<HttpResponse> {
    if req.visitor_id.is_empty() {
        return Err(AppError::Validation("visitorId must not be empty".to_string()));
    }

    let record = url_list_repo::upsert_url_list(
        &pool,
        &req.visitor_id,
        &req.url,
        req.user_id.as_deref(),
    )
    .await?;

    Ok(HttpResponse::Ok().json(record))
}

/// Route table for the visits surface.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/visits")
            .route("/save-visits", web::post().to(save_visits))
            .route("/{visitorId}", web::get().to(get_visits_by_visitor_id)),
    );
}
