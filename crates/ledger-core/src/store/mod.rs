pub mod database;
pub mod dedup;
pub mod master;
pub mod reconcile;
pub mod schema;
