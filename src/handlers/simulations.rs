// src/handlers/simulations.rs

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use sqlx::PgPool;

use crate::{
    error::AppError,
    models::simulation::{Simulation, SimulationListParams},
    utils::jwt::Claims,
};

pub(crate) const SIMULATION_COLUMNS: &str = "id, title, description, category, level, \
     duration_hours, modules, tags, metrics_enrollments, metrics_completions, \
     metrics_average_rating, metrics_total_reviews, metrics_average_score, \
     is_active, created_by, created_at, updated_at";

/// Lists active simulations with category/level/search filters, newest first.
pub async fn list_simulations(
    State(pool): State<PgPool>,
    Query(params): Query<SimulationListParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = params.page.unwrap_or(1).max(1);
    let limit = params.limit.unwrap_or(12).clamp(1, 100);
    let offset = (page - 1) * limit;

    let sql = format!(
        r#"
        SELECT {SIMULATION_COLUMNS}
        FROM simulations
        WHERE is_active = TRUE
          AND ($1::TEXT IS NULL OR category = $1)
          AND ($2::TEXT IS NULL OR level = $2)
          AND ($3::TEXT IS NULL
               OR title ILIKE '%' || $3 || '%'
               OR description ILIKE '%' || $3 || '%')
        ORDER BY created_at DESC
        LIMIT $4 OFFSET $5
        "#
    );
    let simulations = sqlx::query_as::<_, Simulation>(&sql)
        .bind(&params.category)
        .bind(&params.level)
        .bind(&params.search)
        .bind(limit)
        .bind(offset)
        .fetch_all(&pool)
        .await?;

    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM simulations
        WHERE is_active = TRUE
          AND ($1::TEXT IS NULL OR category = $1)
          AND ($2::TEXT IS NULL OR level = $2)
          AND ($3::TEXT IS NULL
               OR title ILIKE '%' || $3 || '%'
               OR description ILIKE '%' || $3 || '%')
        "#,
    )
    .bind(&params.category)
    .bind(&params.level)
    .bind(&params.search)
    .fetch_one(&pool)
    .await?;

    Ok(Json(serde_json::json!({
        "simulations": simulations,
        "pagination": {
            "current_page": page,
            "total_pages": (total + limit - 1) / limit,
            "total_items": total,
            "items_per_page": limit,
        }
    })))
}

/// Fetches one active simulation by ID.
pub async fn get_simulation(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let sql =
        format!("SELECT {SIMULATION_COLUMNS} FROM simulations WHERE id = $1 AND is_active = TRUE");
    let simulation = sqlx::query_as::<_, Simulation>(&sql)
        .bind(id)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Simulation not found".to_string()))?;

    Ok(Json(simulation))
}

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<i64>,
}

/// Lists active simulations of one category, best-rated first.
pub async fn list_by_category(
    State(pool): State<PgPool>,
    Path(category): Path<String>,
    Query(params): Query<LimitParams>,
) -> Result<impl IntoResponse, AppError> {
    let limit = params.limit.unwrap_or(10).clamp(1, 100);

    let sql = format!(
        "SELECT {SIMULATION_COLUMNS} FROM simulations \
         WHERE category = $1 AND is_active = TRUE \
         ORDER BY metrics_average_rating DESC LIMIT $2"
    );
    let simulations = sqlx::query_as::<_, Simulation>(&sql)
        .bind(&category)
        .bind(limit)
        .fetch_all(&pool)
        .await?;

    Ok(Json(serde_json::json!({
        "category": category,
        "simulations": simulations,
    })))
}

/// Lists highly rated, well-subscribed simulations for the landing page.
pub async fn featured_simulations(
    State(pool): State<PgPool>,
    Query(params): Query<LimitParams>,
) -> Result<impl IntoResponse, AppError> {
    let limit = params.limit.unwrap_or(6).clamp(1, 50);

    let sql = format!(
        "SELECT {SIMULATION_COLUMNS} FROM simulations \
         WHERE is_active = TRUE \
           AND metrics_average_rating >= 4.0 \
           AND metrics_enrollments >= 10 \
         ORDER BY metrics_average_rating DESC, metrics_enrollments DESC \
         LIMIT $1"
    );
    let simulations = sqlx::query_as::<_, Simulation>(&sql)
        .bind(limit)
        .fetch_all(&pool)
        .await?;

    Ok(Json(serde_json::json!({ "simulations": simulations })))
}

/// Returns a simulation's metrics rollup. Enrolled users or admins only.
pub async fn simulation_stats(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let sql = format!("SELECT {SIMULATION_COLUMNS} FROM simulations WHERE id = $1");
    let simulation = sqlx::query_as::<_, Simulation>(&sql)
        .bind(id)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Simulation not found".to_string()))?;

    if !claims.is_admin() {
        let enrolled: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM enrollments WHERE user_id = $1 AND simulation_id = $2",
        )
        .bind(claims.user_id())
        .bind(id)
        .fetch_optional(&pool)
        .await?;

        if enrolled.is_none() {
            return Err(AppError::Forbidden(
                "Access denied. You must be enrolled in this simulation.".to_string(),
            ));
        }
    }

    let completion_rate = if simulation.metrics_enrollments > 0 {
        let rate =
            simulation.metrics_completions as f64 / simulation.metrics_enrollments as f64 * 100.0;
        (rate * 10.0).round() / 10.0
    } else {
        0.0
    };

    Ok(Json(serde_json::json!({
        "stats": {
            "enrollments": simulation.metrics_enrollments,
            "completions": simulation.metrics_completions,
            "average_rating": simulation.metrics_average_rating,
            "total_reviews": simulation.metrics_total_reviews,
            "average_score": simulation.metrics_average_score,
        },
        "completion_rate": completion_rate,
    })))
}
