pub mod credentials;
pub mod database;
pub mod registry;
