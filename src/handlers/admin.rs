// src/handlers/admin.rs

use axum::{
    Json,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use validator::Validate;

use crate::{
    error::AppError,
    handlers::{auth::USER_COLUMNS, simulations::SIMULATION_COLUMNS},
    models::{
        enrollment::{AdminEnrollmentRow, EnrollmentWithSimulation},
        simulation::{CreateSimulationRequest, Simulation, UpdateSimulationRequest},
        user::User,
    },
    utils::jwt::Claims,
};

fn pagination(page: Option<i64>, limit: Option<i64>) -> (i64, i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let limit = limit.unwrap_or(10).clamp(1, 100);
    (page, limit, (page - 1) * limit)
}

fn pagination_body(page: i64, limit: i64, total: i64) -> serde_json::Value {
    serde_json::json!({
        "current_page": page,
        "total_pages": (total + limit - 1) / limit,
        "total_items": total,
        "items_per_page": limit,
    })
}

/// Summary row for the dashboard's recent-users panel.
#[derive(Debug, Serialize, sqlx::FromRow)]
struct RecentUser {
    id: i64,
    name: String,
    email: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

/// Summary row for the dashboard's top-simulations panel.
#[derive(Debug, Serialize, sqlx::FromRow)]
struct TopSimulation {
    id: i64,
    title: String,
    category: String,
    metrics_enrollments: i64,
    metrics_completions: i64,
    metrics_average_rating: f64,
}

/// Platform-wide statistics for the admin dashboard.
/// Admin only.
pub async fn dashboard(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let total_users: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE is_active = TRUE")
            .fetch_one(&pool)
            .await?;

    let total_simulations: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM simulations WHERE is_active = TRUE")
            .fetch_one(&pool)
            .await?;

    let total_enrollments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM enrollments")
        .fetch_one(&pool)
        .await?;

    let completed_enrollments: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM enrollments WHERE status = 'completed'")
            .fetch_one(&pool)
            .await?;

    let recent_users = sqlx::query_as::<_, RecentUser>(
        "SELECT id, name, email, created_at FROM users \
         WHERE is_active = TRUE ORDER BY created_at DESC LIMIT 5",
    )
    .fetch_all(&pool)
    .await?;

    let recent_enrollments = sqlx::query_as::<_, AdminEnrollmentRow>(
        r#"
        SELECT
            e.id, e.status, e.enrolled_at, e.completed_at,
            u.id AS user_id, u.name AS user_name, u.email AS user_email,
            s.id AS simulation_id, s.title AS simulation_title, s.category, s.level
        FROM enrollments e
        JOIN users u ON e.user_id = u.id
        JOIN simulations s ON e.simulation_id = s.id
        ORDER BY e.enrolled_at DESC
        LIMIT 5
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let top_simulations = sqlx::query_as::<_, TopSimulation>(
        "SELECT id, title, category, metrics_enrollments, metrics_completions, \
                metrics_average_rating \
         FROM simulations WHERE is_active = TRUE \
         ORDER BY metrics_enrollments DESC LIMIT 5",
    )
    .fetch_all(&pool)
    .await?;

    let completion_rate = if total_enrollments > 0 {
        let rate = completed_enrollments as f64 / total_enrollments as f64 * 100.0;
        (rate * 10.0).round() / 10.0
    } else {
        0.0
    };

    Ok(Json(serde_json::json!({
        "stats": {
            "total_users": total_users,
            "total_simulations": total_simulations,
            "total_enrollments": total_enrollments,
            "completed_enrollments": completed_enrollments,
            "completion_rate": completion_rate,
        },
        "recent_users": recent_users,
        "recent_enrollments": recent_enrollments,
        "top_simulations": top_simulations,
    })))
}

#[derive(Debug, Deserialize)]
pub struct AnalyticsParams {
    /// Lookback window in days.
    pub period: Option<i64>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
struct DailyCount {
    day: String,
    count: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
struct CategoryStat {
    category: String,
    count: i64,
    total_enrollments: i64,
    avg_rating: Option<f64>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
struct StatusCount {
    status: String,
    count: i64,
}

/// Time-series and per-category analytics over a lookback period.
/// Admin only.
pub async fn analytics(
    State(pool): State<PgPool>,
    Query(params): Query<AnalyticsParams>,
) -> Result<impl IntoResponse, AppError> {
    let period = params.period.unwrap_or(30).clamp(1, 365);
    let since = Utc::now() - chrono::Duration::days(period);

    let user_growth = sqlx::query_as::<_, DailyCount>(
        "SELECT to_char(created_at, 'YYYY-MM-DD') AS day, COUNT(*)::BIGINT AS count \
         FROM users WHERE created_at >= $1 GROUP BY 1 ORDER BY 1",
    )
    .bind(since)
    .fetch_all(&pool)
    .await?;

    let enrollment_trends = sqlx::query_as::<_, DailyCount>(
        "SELECT to_char(enrolled_at, 'YYYY-MM-DD') AS day, COUNT(*)::BIGINT AS count \
         FROM enrollments WHERE enrolled_at >= $1 GROUP BY 1 ORDER BY 1",
    )
    .bind(since)
    .fetch_all(&pool)
    .await?;

    let category_stats = sqlx::query_as::<_, CategoryStat>(
        "SELECT category, COUNT(*)::BIGINT AS count, \
                COALESCE(SUM(metrics_enrollments), 0)::BIGINT AS total_enrollments, \
                AVG(metrics_average_rating) AS avg_rating \
         FROM simulations GROUP BY category ORDER BY category",
    )
    .fetch_all(&pool)
    .await?;

    let status_breakdown = sqlx::query_as::<_, StatusCount>(
        "SELECT status, COUNT(*)::BIGINT AS count FROM enrollments GROUP BY status",
    )
    .fetch_all(&pool)
    .await?;

    Ok(Json(serde_json::json!({
        "user_growth": user_growth,
        "enrollment_trends": enrollment_trends,
        "category_stats": category_stats,
        "status_breakdown": status_breakdown,
        "period": period,
    })))
}

#[derive(Debug, Deserialize)]
pub struct AdminUserListParams {
    pub search: Option<String>,
    pub role: Option<String>,
    /// 'active' or 'inactive'; anything else means no filter.
    pub status: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Lists users with search/role/status filters.
/// Admin only.
pub async fn list_users(
    State(pool): State<PgPool>,
    Query(params): Query<AdminUserListParams>,
) -> Result<impl IntoResponse, AppError> {
    let (page, limit, offset) = pagination(params.page, params.limit);
    let is_active = match params.status.as_deref() {
        Some("active") => Some(true),
        Some("inactive") => Some(false),
        _ => None,
    };

    let sql = format!(
        r#"
        SELECT {USER_COLUMNS}
        FROM users
        WHERE ($1::TEXT IS NULL OR name ILIKE '%' || $1 || '%' OR email ILIKE '%' || $1 || '%')
          AND ($2::TEXT IS NULL OR role = $2)
          AND ($3::BOOL IS NULL OR is_active = $3)
        ORDER BY created_at DESC
        LIMIT $4 OFFSET $5
        "#
    );
    let users = sqlx::query_as::<_, User>(&sql)
        .bind(&params.search)
        .bind(&params.role)
        .bind(is_active)
        .bind(limit)
        .bind(offset)
        .fetch_all(&pool)
        .await?;

    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM users
        WHERE ($1::TEXT IS NULL OR name ILIKE '%' || $1 || '%' OR email ILIKE '%' || $1 || '%')
          AND ($2::TEXT IS NULL OR role = $2)
          AND ($3::BOOL IS NULL OR is_active = $3)
        "#,
    )
    .bind(&params.search)
    .bind(&params.role)
    .bind(is_active)
    .fetch_one(&pool)
    .await?;

    Ok(Json(serde_json::json!({
        "users": users,
        "pagination": pagination_body(page, limit, total),
    })))
}

/// Fetches one user together with their enrollments.
/// Admin only.
pub async fn get_user(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
    let user = sqlx::query_as::<_, User>(&sql)
        .bind(id)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    let enrollments = sqlx::query_as::<_, EnrollmentWithSimulation>(
        r#"
        SELECT
            e.id, e.simulation_id, e.status, e.percentage_complete,
            e.time_spent, e.score, e.enrolled_at, e.completed_at,
            s.title, s.category, s.level, s.duration_hours
        FROM enrollments e
        JOIN simulations s ON e.simulation_id = s.id
        WHERE e.user_id = $1
        ORDER BY e.enrolled_at DESC
        "#,
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(serde_json::json!({
        "user": user,
        "enrollments": enrollments,
    })))
}

/// DTO for updating a user. Fields are optional.
#[derive(Debug, Deserialize)]
pub struct AdminUpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
}

/// Updates user information.
/// Admin only.
pub async fn update_user(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
    Json(payload): Json<AdminUpdateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    if payload.name.is_none()
        && payload.email.is_none()
        && payload.role.is_none()
        && payload.is_active.is_none()
    {
        return Ok(StatusCode::OK);
    }

    if let Some(role) = &payload.role {
        if role != "user" && role != "admin" {
            return Err(AppError::BadRequest(
                "Role must be 'user' or 'admin'".to_string(),
            ));
        }
    }

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE users SET ");
    let mut separated = builder.separated(", ");

    if let Some(name) = payload.name {
        separated.push("name = ");
        separated.push_bind_unseparated(name);
    }

    if let Some(email) = payload.email {
        separated.push("email = ");
        separated.push_bind_unseparated(email);
    }

    if let Some(role) = payload.role {
        separated.push("role = ");
        separated.push_bind_unseparated(role);
    }

    if let Some(is_active) = payload.is_active {
        separated.push("is_active = ");
        separated.push_bind_unseparated(is_active);
    }

    separated.push("updated_at = now()");

    builder.push(" WHERE id = ");
    builder.push_bind(id);

    let result = builder.build().execute(&pool).await.map_err(|e| {
        if e.to_string().contains("unique constraint") || e.to_string().contains("23505") {
            AppError::Conflict("Another user already uses this email".to_string())
        } else {
            tracing::error!("Failed to update user: {:?}", e);
            AppError::InternalServerError(e.to_string())
        }
    })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    Ok(StatusCode::OK)
}

/// Soft-deletes a user by deactivating the account.
/// Admin only. Prevents deactivating self.
pub async fn deactivate_user(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if id == claims.user_id() {
        return Err(AppError::BadRequest(
            "Cannot deactivate yourself".to_string(),
        ));
    }

    let result =
        sqlx::query("UPDATE users SET is_active = FALSE, updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&pool)
            .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    Ok(Json(serde_json::json!({
        "message": "User deactivated successfully"
    })))
}

/// Creates a new simulation.
/// Admin only.
pub async fn create_simulation(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateSimulationRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let modules_json = serde_json::to_value(&payload.modules)?;
    let tags_json = serde_json::to_value(&payload.tags)?;

    let sql = format!(
        "INSERT INTO simulations \
         (title, description, category, level, duration_hours, modules, tags, created_by) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING {SIMULATION_COLUMNS}"
    );
    let simulation = sqlx::query_as::<_, Simulation>(&sql)
        .bind(&payload.title)
        .bind(&payload.description)
        .bind(&payload.category)
        .bind(&payload.level)
        .bind(payload.duration_hours)
        .bind(modules_json)
        .bind(tags_json)
        .bind(claims.user_id())
        .fetch_one(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to create simulation: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    Ok((StatusCode::CREATED, Json(simulation)))
}

#[derive(Debug, Deserialize)]
pub struct AdminSimulationListParams {
    pub search: Option<String>,
    pub category: Option<String>,
    pub level: Option<String>,
    /// 'active' or 'inactive'; anything else means no filter.
    pub status: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Lists simulations including inactive ones.
/// Admin only.
pub async fn list_all_simulations(
    State(pool): State<PgPool>,
    Query(params): Query<AdminSimulationListParams>,
) -> Result<impl IntoResponse, AppError> {
    let (page, limit, offset) = pagination(params.page, params.limit);
    let is_active = match params.status.as_deref() {
        Some("active") => Some(true),
        Some("inactive") => Some(false),
        _ => None,
    };

    let sql = format!(
        r#"
        SELECT {SIMULATION_COLUMNS}
        FROM simulations
        WHERE ($1::TEXT IS NULL
               OR title ILIKE '%' || $1 || '%'
               OR description ILIKE '%' || $1 || '%')
          AND ($2::TEXT IS NULL OR category = $2)
          AND ($3::TEXT IS NULL OR level = $3)
          AND ($4::BOOL IS NULL OR is_active = $4)
        ORDER BY created_at DESC
        LIMIT $5 OFFSET $6
        "#
    );
    let simulations = sqlx::query_as::<_, Simulation>(&sql)
        .bind(&params.search)
        .bind(&params.category)
        .bind(&params.level)
        .bind(is_active)
        .bind(limit)
        .bind(offset)
        .fetch_all(&pool)
        .await?;

    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM simulations
        WHERE ($1::TEXT IS NULL
               OR title ILIKE '%' || $1 || '%'
               OR description ILIKE '%' || $1 || '%')
          AND ($2::TEXT IS NULL OR category = $2)
          AND ($3::TEXT IS NULL OR level = $3)
          AND ($4::BOOL IS NULL OR is_active = $4)
        "#,
    )
    .bind(&params.search)
    .bind(&params.category)
    .bind(&params.level)
    .bind(is_active)
    .fetch_one(&pool)
    .await?;

    Ok(Json(serde_json::json!({
        "simulations": simulations,
        "pagination": pagination_body(page, limit, total),
    })))
}

/// Updates a simulation by ID. Metrics columns are deliberately not
/// reachable from here; they belong to the enrollment side effects.
/// Admin only.
pub async fn update_simulation(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateSimulationRequest>,
) -> Result<impl IntoResponse, AppError> {
    if payload.title.is_none()
        && payload.description.is_none()
        && payload.category.is_none()
        && payload.level.is_none()
        && payload.duration_hours.is_none()
        && payload.modules.is_none()
        && payload.tags.is_none()
        && payload.is_active.is_none()
    {
        return Ok(StatusCode::OK);
    }

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE simulations SET ");
    let mut separated = builder.separated(", ");

    if let Some(title) = payload.title {
        separated.push("title = ");
        separated.push_bind_unseparated(title);
    }

    if let Some(description) = payload.description {
        separated.push("description = ");
        separated.push_bind_unseparated(description);
    }

    if let Some(category) = payload.category {
        separated.push("category = ");
        separated.push_bind_unseparated(category);
    }

    if let Some(level) = payload.level {
        separated.push("level = ");
        separated.push_bind_unseparated(level);
    }

    if let Some(duration_hours) = payload.duration_hours {
        separated.push("duration_hours = ");
        separated.push_bind_unseparated(duration_hours);
    }

    if let Some(modules) = payload.modules {
        separated.push("modules = ");
        separated.push_bind_unseparated(serde_json::to_value(modules).unwrap_or_default());
    }

    if let Some(tags) = payload.tags {
        separated.push("tags = ");
        separated.push_bind_unseparated(serde_json::to_value(tags).unwrap_or_default());
    }

    if let Some(is_active) = payload.is_active {
        separated.push("is_active = ");
        separated.push_bind_unseparated(is_active);
    }

    separated.push("updated_at = now()");

    builder.push(" WHERE id = ");
    builder.push_bind(id);

    let result = builder.build().execute(&pool).await.map_err(|e| {
        tracing::error!("Failed to update simulation: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Simulation not found".to_string()));
    }

    Ok(StatusCode::OK)
}

/// Soft-deletes a simulation by deactivating it. Existing enrollments keep
/// working; new enrollments are refused by the active check.
/// Admin only.
pub async fn deactivate_simulation(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result =
        sqlx::query("UPDATE simulations SET is_active = FALSE, updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&pool)
            .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Simulation not found".to_string()));
    }

    Ok(Json(serde_json::json!({
        "message": "Simulation deactivated successfully"
    })))
}

#[derive(Debug, Deserialize)]
pub struct AdminEnrollmentListParams {
    pub status: Option<String>,
    pub user_id: Option<i64>,
    pub simulation_id: Option<i64>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Lists enrollments across all users with status/user/simulation filters.
/// Admin only.
pub async fn list_enrollments(
    State(pool): State<PgPool>,
    Query(params): Query<AdminEnrollmentListParams>,
) -> Result<impl IntoResponse, AppError> {
    let (page, limit, offset) = pagination(params.page, params.limit);

    let enrollments = sqlx::query_as::<_, AdminEnrollmentRow>(
        r#"
        SELECT
            e.id, e.status, e.enrolled_at, e.completed_at,
            u.id AS user_id, u.name AS user_name, u.email AS user_email,
            s.id AS simulation_id, s.title AS simulation_title, s.category, s.level
        FROM enrollments e
        JOIN users u ON e.user_id = u.id
        JOIN simulations s ON e.simulation_id = s.id
        WHERE ($1::TEXT IS NULL OR e.status = $1)
          AND ($2::BIGINT IS NULL OR e.user_id = $2)
          AND ($3::BIGINT IS NULL OR e.simulation_id = $3)
        ORDER BY e.enrolled_at DESC
        LIMIT $4 OFFSET $5
        "#,
    )
    .bind(&params.status)
    .bind(params.user_id)
    .bind(params.simulation_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(&pool)
    .await?;

    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM enrollments e
        WHERE ($1::TEXT IS NULL OR e.status = $1)
          AND ($2::BIGINT IS NULL OR e.user_id = $2)
          AND ($3::BIGINT IS NULL OR e.simulation_id = $3)
        "#,
    )
    .bind(&params.status)
    .bind(params.user_id)
    .bind(params.simulation_id)
    .fetch_one(&pool)
    .await?;

    Ok(Json(serde_json::json!({
        "enrollments": enrollments,
        "pagination": pagination_body(page, limit, total),
    })))
}
