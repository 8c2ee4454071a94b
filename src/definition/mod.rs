pub mod builder;
pub mod catalog;
pub mod loader;
pub mod migration;
pub mod operation;
