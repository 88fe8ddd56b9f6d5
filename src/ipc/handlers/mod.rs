pub mod attendance;
pub mod auth;
pub mod backup;
pub mod classes;
pub mod core;
pub mod data;
pub mod reports;
pub mod setup;
pub mod stats;
pub mod students;
pub mod teachers;
