pub mod enrollment;
pub mod simulation;
pub mod user;
