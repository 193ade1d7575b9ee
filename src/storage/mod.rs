#[cfg(test)]
pub mod fixtures;
pub mod migrations;
pub mod schema;
pub mod store;
