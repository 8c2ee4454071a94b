pub mod migration_result;
pub mod runner;
pub mod status;
