pub mod constraints;
pub mod errors;
pub mod helpers;
pub mod schema;
