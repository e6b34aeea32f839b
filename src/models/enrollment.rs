// src/models/enrollment.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use validator::Validate;

use crate::error::AppError;

/// Closed set of enrollment states.
///
/// `enrolled -> in-progress -> completed`, with `dropped` reachable from the
/// two non-completed states. `completed` and `dropped` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(rename_all = "kebab-case")]
pub enum EnrollmentStatus {
    Enrolled,
    InProgress,
    Completed,
    Dropped,
}

impl EnrollmentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Dropped)
    }

    /// Legality table for the state machine. Every status change goes through
    /// [`Enrollment::transition`], which consults this table; call sites never
    /// compare status strings themselves.
    pub fn can_become(self, next: EnrollmentStatus) -> bool {
        use EnrollmentStatus::*;
        matches!(
            (self, next),
            (Enrolled, InProgress)
                | (Enrolled, Completed)
                | (Enrolled, Dropped)
                | (InProgress, Completed)
                | (InProgress, Dropped)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enrolled => "enrolled",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Dropped => "dropped",
        }
    }
}

/// One scored module attempt, stored inside the enrollment's JSONB
/// `assessments` column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    pub module_id: String,
    pub score: i32,
    pub max_score: i32,
    pub completed_at: DateTime<Utc>,
    /// Minutes reported alongside the scored attempt.
    pub time_spent: i64,
}

/// Represents the 'enrollments' table: the join entity between one user and
/// one simulation, unique per (user, simulation) pair.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Enrollment {
    pub id: i64,
    pub user_id: i64,
    pub simulation_id: i64,
    pub status: EnrollmentStatus,

    /// Completed module IDs with set semantics; re-submitting a module is a
    /// no-op for this list.
    pub completed_modules: Json<Vec<String>>,
    /// Forced to 100 only when the enrollment completes.
    pub percentage_complete: i32,
    /// Accumulated minutes across all progress updates.
    pub time_spent: i64,
    pub last_accessed: Option<DateTime<Utc>>,

    /// Rounded arithmetic mean of all assessment scores, absent until the
    /// first scored attempt.
    pub score: Option<i32>,
    pub assessments: Json<Vec<Assessment>>,

    pub feedback_rating: Option<i32>,
    pub feedback_review: Option<String>,
    pub feedback_recommend: Option<bool>,
    pub feedback_date: Option<DateTime<Utc>>,

    pub enrolled_at: DateTime<Utc>,
    /// Stamped at most once, on the first transition into in-progress.
    pub started_at: Option<DateTime<Utc>>,
    /// Stamped at most once, on the first transition into completed.
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Enrollment {
    /// The single transition function: validates legality against the state
    /// table, then stamps the fields that belong to the target state.
    pub fn transition(
        &mut self,
        next: EnrollmentStatus,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_become(next) {
            return Err(AppError::InvalidTransition(format!(
                "Cannot move enrollment from '{}' to '{}'",
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.status = next;
        match next {
            EnrollmentStatus::InProgress => {
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                }
            }
            EnrollmentStatus::Completed => {
                if self.completed_at.is_none() {
                    self.completed_at = Some(now);
                }
                self.percentage_complete = 100;
            }
            _ => {}
        }
        Ok(())
    }

    /// Applies one progress update: set-semantics module list, optional time
    /// accumulation, optional scored assessment with a running mean.
    pub fn record_progress(
        &mut self,
        module_id: &str,
        is_completed: bool,
        time_spent: Option<i64>,
        score: Option<i32>,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if is_completed && !self.completed_modules.iter().any(|m| m == module_id) {
            self.completed_modules.push(module_id.to_string());
        }

        // The first completed module moves a fresh enrollment into
        // in-progress. One-way: later calls never touch the status again.
        if self.status == EnrollmentStatus::Enrolled && !self.completed_modules.is_empty() {
            self.transition(EnrollmentStatus::InProgress, now)?;
        }

        if let Some(minutes) = time_spent {
            self.time_spent += minutes;
        }

        if let Some(score) = score {
            self.assessments.push(Assessment {
                module_id: module_id.to_string(),
                score,
                max_score: 100,
                completed_at: now,
                time_spent: time_spent.unwrap_or(0),
            });
            let total: i64 = self.assessments.iter().map(|a| i64::from(a.score)).sum();
            self.score = Some((total as f64 / self.assessments.len() as f64).round() as i32);
        }

        self.last_accessed = Some(now);
        Ok(())
    }

    /// Marks the enrollment completed. Returns `true` when the caller must
    /// bump the completion counters, i.e. the enrollment was not already
    /// completed; a repeated call is a counter no-op.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<bool, AppError> {
        if self.status == EnrollmentStatus::Completed {
            return Ok(false);
        }
        self.transition(EnrollmentStatus::Completed, now)?;
        Ok(true)
    }

    /// Records feedback, replacing any previous review (last write wins).
    /// Only legal on a completed enrollment.
    pub fn submit_feedback(
        &mut self,
        rating: i32,
        review: Option<String>,
        would_recommend: Option<bool>,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if self.status != EnrollmentStatus::Completed {
            return Err(AppError::InvalidTransition(
                "Only completed simulations can be reviewed".to_string(),
            ));
        }
        self.feedback_rating = Some(rating);
        self.feedback_review = review;
        self.feedback_recommend = would_recommend;
        self.feedback_date = Some(now);
        Ok(())
    }

    /// Withdraws from the simulation. Completed enrollments cannot be
    /// withdrawn, and a second withdrawal is rejected rather than silently
    /// decrementing the simulation counter again.
    pub fn withdraw(&mut self, now: DateTime<Utc>) -> Result<(), AppError> {
        if self.status == EnrollmentStatus::Dropped {
            return Err(AppError::InvalidTransition(
                "Enrollment is already dropped".to_string(),
            ));
        }
        self.transition(EnrollmentStatus::Dropped, now)
    }
}

/// Mean rating rounded to one decimal place; 0.0 when nothing is rated yet.
///
/// Feedback submission recomputes the simulation rollup from every rated
/// enrollment through this function. A running average would drift when an
/// existing review is overwritten, so the full recompute is deliberate.
pub fn average_rating(ratings: &[i32]) -> f64 {
    if ratings.is_empty() {
        return 0.0;
    }
    let sum: i64 = ratings.iter().map(|&r| i64::from(r)).sum();
    ((sum as f64 / ratings.len() as f64) * 10.0).round() / 10.0
}

/// DTO for enrolling into a simulation.
#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub simulation_id: i64,
}

fn default_true() -> bool {
    true
}

/// DTO for a progress update on one module.
#[derive(Debug, Deserialize, Validate)]
pub struct ProgressUpdateRequest {
    #[validate(length(min = 1, max = 100))]
    pub module_id: String,
    #[serde(default = "default_true")]
    pub is_completed: bool,
    /// Minutes spent since the last update.
    #[validate(range(min = 0))]
    pub time_spent: Option<i64>,
    #[validate(range(min = 0, max = 100))]
    pub score: Option<i32>,
}

/// DTO for the post-completion review.
#[derive(Debug, Deserialize, Validate)]
pub struct FeedbackRequest {
    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5."))]
    pub rating: i32,
    #[validate(length(max = 2000))]
    pub review: Option<String>,
    pub would_recommend: Option<bool>,
}

/// Query params for enrollment listings.
#[derive(Debug, Deserialize)]
pub struct EnrollmentListParams {
    pub status: Option<EnrollmentStatus>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Enrollment row joined with a summary of its simulation, for listings.
#[derive(Debug, Serialize, FromRow)]
pub struct EnrollmentWithSimulation {
    pub id: i64,
    pub simulation_id: i64,
    pub status: EnrollmentStatus,
    pub percentage_complete: i32,
    pub time_spent: i64,
    pub score: Option<i32>,
    pub enrolled_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub title: String,
    pub category: String,
    pub level: String,
    pub duration_hours: i32,
}

/// Admin listing row: enrollment with user and simulation summaries.
#[derive(Debug, Serialize, FromRow)]
pub struct AdminEnrollmentRow {
    pub id: i64,
    pub status: EnrollmentStatus,
    pub enrolled_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub user_id: i64,
    pub user_name: String,
    pub user_email: String,
    pub simulation_id: i64,
    pub simulation_title: String,
    pub category: String,
    pub level: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_enrollment() -> Enrollment {
        let now = Utc::now();
        Enrollment {
            id: 1,
            user_id: 10,
            simulation_id: 20,
            status: EnrollmentStatus::Enrolled,
            completed_modules: Json(Vec::new()),
            percentage_complete: 0,
            time_spent: 0,
            last_accessed: None,
            score: None,
            assessments: Json(Vec::new()),
            feedback_rating: None,
            feedback_review: None,
            feedback_recommend: None,
            feedback_date: None,
            enrolled_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    #[test]
    fn first_completed_module_moves_to_in_progress() {
        let mut e = fresh_enrollment();
        e.record_progress("m1", true, None, None, Utc::now()).unwrap();

        assert_eq!(e.status, EnrollmentStatus::InProgress);
        assert!(e.started_at.is_some());
        assert!(e.last_accessed.is_some());
    }

    #[test]
    fn progress_without_completed_module_keeps_status() {
        let mut e = fresh_enrollment();
        e.record_progress("m1", false, Some(15), None, Utc::now())
            .unwrap();

        assert_eq!(e.status, EnrollmentStatus::Enrolled);
        assert!(e.completed_modules.is_empty());
        assert_eq!(e.time_spent, 15);
        assert!(e.last_accessed.is_some());
    }

    #[test]
    fn duplicate_modules_have_set_semantics() {
        let mut e = fresh_enrollment();
        for module in ["m1", "m2", "m1", "m3", "m2"] {
            e.record_progress(module, true, Some(5), None, Utc::now())
                .unwrap();
        }

        assert_eq!(e.completed_modules.len(), 3);
        // Duplicates still accumulate time.
        assert_eq!(e.time_spent, 25);
    }

    #[test]
    fn started_at_is_stamped_only_once() {
        let mut e = fresh_enrollment();
        e.record_progress("m1", true, None, None, Utc::now()).unwrap();
        let first_started = e.started_at;

        e.record_progress("m2", true, None, None, Utc::now()).unwrap();
        assert_eq!(e.started_at, first_started);
        assert_eq!(e.status, EnrollmentStatus::InProgress);
    }

    #[test]
    fn assessment_score_is_rounded_mean() {
        let mut e = fresh_enrollment();
        for (module, score) in [("m1", 80), ("m2", 90), ("m3", 100)] {
            e.record_progress(module, true, None, Some(score), Utc::now())
                .unwrap();
        }

        assert_eq!(e.assessments.len(), 3);
        assert_eq!(e.score, Some(90));
        assert!(e.assessments.iter().all(|a| a.max_score == 100));
    }

    #[test]
    fn complete_reports_counter_bump_only_once() {
        let mut e = fresh_enrollment();
        assert!(e.complete(Utc::now()).unwrap());
        let stamped = e.completed_at;

        assert!(!e.complete(Utc::now()).unwrap());
        assert_eq!(e.completed_at, stamped);
        assert_eq!(e.percentage_complete, 100);
    }

    #[test]
    fn complete_after_withdrawal_is_rejected() {
        let mut e = fresh_enrollment();
        e.withdraw(Utc::now()).unwrap();

        assert!(matches!(
            e.complete(Utc::now()),
            Err(AppError::InvalidTransition(_))
        ));
    }

    #[test]
    fn feedback_requires_completion() {
        let mut e = fresh_enrollment();
        e.record_progress("m1", true, None, None, Utc::now()).unwrap();

        let result = e.submit_feedback(4, None, None, Utc::now());
        assert!(matches!(result, Err(AppError::InvalidTransition(_))));
        assert_eq!(e.feedback_rating, None);
    }

    #[test]
    fn feedback_last_write_wins() {
        let mut e = fresh_enrollment();
        e.complete(Utc::now()).unwrap();

        e.submit_feedback(2, Some("meh".to_string()), Some(false), Utc::now())
            .unwrap();
        e.submit_feedback(5, Some("grew on me".to_string()), Some(true), Utc::now())
            .unwrap();

        assert_eq!(e.feedback_rating, Some(5));
        assert_eq!(e.feedback_review.as_deref(), Some("grew on me"));
        assert_eq!(e.feedback_recommend, Some(true));
    }

    #[test]
    fn withdraw_from_completed_is_rejected() {
        let mut e = fresh_enrollment();
        e.complete(Utc::now()).unwrap();

        assert!(matches!(
            e.withdraw(Utc::now()),
            Err(AppError::InvalidTransition(_))
        ));
        assert_eq!(e.status, EnrollmentStatus::Completed);
    }

    #[test]
    fn double_withdrawal_is_rejected() {
        let mut e = fresh_enrollment();
        e.withdraw(Utc::now()).unwrap();
        assert_eq!(e.status, EnrollmentStatus::Dropped);

        assert!(matches!(
            e.withdraw(Utc::now()),
            Err(AppError::InvalidTransition(_))
        ));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        use EnrollmentStatus::*;
        for next in [Enrolled, InProgress, Completed, Dropped] {
            assert!(!Completed.can_become(next));
            assert!(!Dropped.can_become(next));
        }
        assert!(Completed.is_terminal());
        assert!(Dropped.is_terminal());
        assert!(!Enrolled.is_terminal());
    }

    #[test]
    fn rating_average_rounds_to_one_decimal() {
        assert_eq!(average_rating(&[]), 0.0);
        assert_eq!(average_rating(&[5]), 5.0);
        assert_eq!(average_rating(&[5, 3]), 4.0);
        assert_eq!(average_rating(&[5, 4]), 4.5);
        assert_eq!(average_rating(&[4, 4, 5]), 4.3);
    }
}
