pub mod core;
pub mod import;
pub mod notifications;
pub mod roster;
pub mod students;
