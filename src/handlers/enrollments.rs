// src/handlers/enrollments.rs

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use sqlx::PgPool;
use validator::Validate;

use crate::{
    error::AppError,
    models::enrollment::{
        self, EnrollRequest, Enrollment, EnrollmentListParams, EnrollmentWithSimulation,
        FeedbackRequest, ProgressUpdateRequest,
    },
    utils::jwt::Claims,
};

const ENROLLMENT_COLUMNS: &str = "id, user_id, simulation_id, status, completed_modules, \
     percentage_complete, time_spent, last_accessed, score, assessments, \
     feedback_rating, feedback_review, feedback_recommend, feedback_date, \
     enrolled_at, started_at, completed_at, updated_at";

async fn fetch_enrollment(pool: &PgPool, id: i64) -> Result<Enrollment, AppError> {
    let sql = format!("SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE id = $1");
    sqlx::query_as::<_, Enrollment>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Enrollment not found".to_string()))
}

/// Writes the whole mutable part of the enrollment document back in one
/// statement. Concurrent writers to the same enrollment resolve as
/// last-write-wins on the row; see the note on `update_progress`.
async fn save_enrollment<'e, E>(executor: E, enrollment: &Enrollment) -> Result<(), AppError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
        UPDATE enrollments SET
            status = $1,
            completed_modules = $2,
            percentage_complete = $3,
            time_spent = $4,
            last_accessed = $5,
            score = $6,
            assessments = $7,
            feedback_rating = $8,
            feedback_review = $9,
            feedback_recommend = $10,
            feedback_date = $11,
            started_at = $12,
            completed_at = $13,
            updated_at = now()
        WHERE id = $14
        "#,
    )
    .bind(enrollment.status)
    .bind(&enrollment.completed_modules)
    .bind(enrollment.percentage_complete)
    .bind(enrollment.time_spent)
    .bind(enrollment.last_accessed)
    .bind(enrollment.score)
    .bind(&enrollment.assessments)
    .bind(enrollment.feedback_rating)
    .bind(&enrollment.feedback_review)
    .bind(enrollment.feedback_recommend)
    .bind(enrollment.feedback_date)
    .bind(enrollment.started_at)
    .bind(enrollment.completed_at)
    .bind(enrollment.id)
    .execute(executor)
    .await?;
    Ok(())
}

fn ensure_owner(enrollment: &Enrollment, claims: &Claims) -> Result<(), AppError> {
    if enrollment.user_id != claims.user_id() {
        return Err(AppError::Forbidden("Access denied".to_string()));
    }
    Ok(())
}

/// Enrolls the current user into an active simulation.
///
/// The uniqueness constraint on (user_id, simulation_id) makes the duplicate
/// check race-free: a concurrent second enroll hits `DO NOTHING` and is
/// reported as already enrolled without double-counting.
pub async fn enroll(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<EnrollRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id();

    let simulation_id: Option<i64> =
        sqlx::query_scalar("SELECT id FROM simulations WHERE id = $1 AND is_active = TRUE")
            .bind(payload.simulation_id)
            .fetch_optional(&pool)
            .await?;
    let simulation_id =
        simulation_id.ok_or_else(|| AppError::NotFound("Simulation not found".to_string()))?;

    let mut tx = pool.begin().await?;

    let sql = format!(
        "INSERT INTO enrollments (user_id, simulation_id) VALUES ($1, $2) \
         ON CONFLICT ON CONSTRAINT uq_enrollments_user_simulation DO NOTHING \
         RETURNING {ENROLLMENT_COLUMNS}"
    );
    let inserted = sqlx::query_as::<_, Enrollment>(&sql)
        .bind(user_id)
        .bind(simulation_id)
        .fetch_optional(&mut *tx)
        .await?;

    let Some(enrollment) = inserted else {
        return Err(AppError::AlreadyEnrolled(
            "You are already enrolled in this simulation".to_string(),
        ));
    };

    // Atomic increment: concurrent enrollments into the same simulation must
    // not lose counts, so this is never a read-modify-write.
    sqlx::query(
        "UPDATE simulations SET metrics_enrollments = metrics_enrollments + 1, \
         updated_at = now() WHERE id = $1",
    )
    .bind(simulation_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!("User {} enrolled in simulation {}", user_id, simulation_id);

    Ok((StatusCode::CREATED, Json(enrollment)))
}

/// Lists the current user's enrollments with an optional status filter,
/// newest first, joined with a simulation summary.
pub async fn list_my_enrollments(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<EnrollmentListParams>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id();
    let page = params.page.unwrap_or(1).max(1);
    let limit = params.limit.unwrap_or(10).clamp(1, 100);
    let offset = (page - 1) * limit;

    let enrollments = sqlx::query_as::<_, EnrollmentWithSimulation>(
        r#"
        SELECT
            e.id, e.simulation_id, e.status, e.percentage_complete,
            e.time_spent, e.score, e.enrolled_at, e.completed_at,
            s.title, s.category, s.level, s.duration_hours
        FROM enrollments e
        JOIN simulations s ON e.simulation_id = s.id
        WHERE e.user_id = $1
          AND ($2::TEXT IS NULL OR e.status = $2)
        ORDER BY e.enrolled_at DESC
        LIMIT $3 OFFSET $4
        "#,
    )
    .bind(user_id)
    .bind(params.status)
    .bind(limit)
    .bind(offset)
    .fetch_all(&pool)
    .await?;

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM enrollments WHERE user_id = $1 AND ($2::TEXT IS NULL OR status = $2)",
    )
    .bind(user_id)
    .bind(params.status)
    .fetch_one(&pool)
    .await?;

    Ok(Json(serde_json::json!({
        "enrollments": enrollments,
        "pagination": {
            "current_page": page,
            "total_pages": (total + limit - 1) / limit,
            "total_items": total,
            "items_per_page": limit,
        }
    })))
}

/// Fetches one enrollment. Owner or admin only.
pub async fn get_enrollment(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let enrollment = fetch_enrollment(&pool, id).await?;

    if enrollment.user_id != claims.user_id() && !claims.is_admin() {
        return Err(AppError::Forbidden("Access denied".to_string()));
    }

    Ok(Json(enrollment))
}

/// Applies a progress update to an enrollment the caller owns.
///
/// The read-back and write of the enrollment row are not guarded by a version
/// check: two simultaneous updates to the same enrollment resolve as
/// last-write-wins on the whole row. A single learner drives their own
/// enrollment, so the window is tolerated rather than locked.
pub async fn update_progress(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<ProgressUpdateRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let mut enrollment = fetch_enrollment(&pool, id).await?;
    ensure_owner(&enrollment, &claims)?;

    enrollment.record_progress(
        &payload.module_id,
        payload.is_completed,
        payload.time_spent,
        payload.score,
        Utc::now(),
    )?;

    save_enrollment(&pool, &enrollment).await?;

    Ok(Json(enrollment))
}

/// Marks an enrollment completed and bumps the completion counters, exactly
/// once per enrollment no matter how often the route is called.
pub async fn complete_enrollment(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut enrollment = fetch_enrollment(&pool, id).await?;
    ensure_owner(&enrollment, &claims)?;

    let bump_counters = enrollment.complete(Utc::now())?;

    let mut tx = pool.begin().await?;
    save_enrollment(&mut *tx, &enrollment).await?;

    if bump_counters {
        sqlx::query(
            "UPDATE simulations SET metrics_completions = metrics_completions + 1, \
             updated_at = now() WHERE id = $1",
        )
        .bind(enrollment.simulation_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE users SET simulations_completed = simulations_completed + 1, \
             updated_at = now() WHERE id = $1",
        )
        .bind(enrollment.user_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok(Json(enrollment))
}

/// Records the post-completion review and recomputes the simulation's rating
/// rollup from scratch.
pub async fn submit_feedback(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<FeedbackRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let mut enrollment = fetch_enrollment(&pool, id).await?;
    ensure_owner(&enrollment, &claims)?;

    enrollment.submit_feedback(
        payload.rating,
        payload.review,
        payload.would_recommend,
        Utc::now(),
    )?;

    let mut tx = pool.begin().await?;
    save_enrollment(&mut *tx, &enrollment).await?;

    // Full scan over every rated enrollment of this simulation, inside the
    // same transaction as the feedback write.
    let ratings: Vec<i32> = sqlx::query_scalar(
        "SELECT feedback_rating FROM enrollments \
         WHERE simulation_id = $1 AND feedback_rating IS NOT NULL",
    )
    .bind(enrollment.simulation_id)
    .fetch_all(&mut *tx)
    .await?;

    let average = enrollment::average_rating(&ratings);
    sqlx::query(
        "UPDATE simulations SET metrics_average_rating = $1, metrics_total_reviews = $2, \
         updated_at = now() WHERE id = $3",
    )
    .bind(average)
    .bind(ratings.len() as i64)
    .bind(enrollment.simulation_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Json(enrollment))
}

/// Withdraws from a simulation. The record is kept with status 'dropped';
/// nothing is physically deleted.
pub async fn withdraw(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut enrollment = fetch_enrollment(&pool, id).await?;
    ensure_owner(&enrollment, &claims)?;

    enrollment.withdraw(Utc::now())?;

    let mut tx = pool.begin().await?;
    save_enrollment(&mut *tx, &enrollment).await?;

    // Undo of the enroll-time increment, clamped at zero. Hitting the clamp
    // means the bookkeeping already lost a count somewhere; log it instead of
    // storing a negative.
    let clamped: bool = sqlx::query_scalar(
        r#"
        WITH prev AS (SELECT metrics_enrollments FROM simulations WHERE id = $1)
        UPDATE simulations
        SET metrics_enrollments = GREATEST(0, metrics_enrollments - 1), updated_at = now()
        WHERE id = $1
        RETURNING (SELECT metrics_enrollments FROM prev) = 0
        "#,
    )
    .bind(enrollment.simulation_id)
    .fetch_one(&mut *tx)
    .await?;

    if clamped {
        tracing::warn!(
            "Enrollment counter for simulation {} was already zero while withdrawing enrollment {}",
            enrollment.simulation_id,
            enrollment.id
        );
    }

    tx.commit().await?;

    Ok(Json(serde_json::json!({
        "message": "Successfully withdrawn from simulation"
    })))
}
