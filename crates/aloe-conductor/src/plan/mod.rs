pub mod baseline;
pub mod decision;
pub mod engine;
pub mod parser;
pub mod schema;
