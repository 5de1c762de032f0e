pub mod bulletins;
pub mod classes;
pub mod core;
pub mod evaluations;
pub mod grades;
pub mod setup;
pub mod students;
pub mod workspace_backup;
