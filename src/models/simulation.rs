// src/models/simulation.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use validator::{Validate, ValidationError};

/// One learning unit inside a simulation's content plan.
/// Stored in the JSONB `modules` column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentModule {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Estimated minutes to finish the module.
    #[serde(default)]
    pub estimated_time: Option<i64>,
    #[serde(default)]
    pub resources: Vec<String>,
}

/// Represents the 'simulations' table in the database.
///
/// The `metrics_*` columns form the rollup block: they are mutated only as
/// side effects of enrollment operations, never by direct client writes.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Simulation {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub category: String,
    /// 'beginner', 'intermediate' or 'advanced'.
    pub level: String,
    pub duration_hours: i32,
    pub modules: Json<Vec<ContentModule>>,
    pub tags: Json<Vec<String>>,
    pub metrics_enrollments: i64,
    pub metrics_completions: i64,
    pub metrics_average_rating: f64,
    pub metrics_total_reviews: i64,
    pub metrics_average_score: f64,
    pub is_active: bool,
    pub created_by: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Query params for public simulation listings.
#[derive(Debug, Deserialize)]
pub struct SimulationListParams {
    pub category: Option<String>,
    pub level: Option<String>,
    /// Case-insensitive substring match on title and description.
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

fn validate_level(level: &str) -> Result<(), ValidationError> {
    match level {
        "beginner" | "intermediate" | "advanced" => Ok(()),
        _ => Err(ValidationError::new("invalid_level")),
    }
}

/// DTO for creating a simulation. Admin only.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateSimulationRequest {
    #[validate(length(min = 1, max = 100, message = "Title cannot exceed 100 characters."))]
    pub title: String,
    #[validate(length(
        min = 1,
        max = 1000,
        message = "Description cannot exceed 1000 characters."
    ))]
    pub description: String,
    #[validate(length(min = 1, max = 50))]
    pub category: String,
    #[validate(custom(function = "validate_level"))]
    pub level: String,
    #[validate(range(min = 1, max = 100, message = "Duration must be between 1 and 100 hours."))]
    pub duration_hours: i32,
    #[serde(default)]
    pub modules: Vec<ContentModule>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// DTO for partially updating a simulation. Fields are optional. Admin only.
#[derive(Debug, Deserialize)]
pub struct UpdateSimulationRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub level: Option<String>,
    pub duration_hours: Option<i32>,
    pub modules: Option<Vec<ContentModule>>,
    pub tags: Option<Vec<String>>,
    pub is_active: Option<bool>,
}
