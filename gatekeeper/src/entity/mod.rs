pub mod accounts;
pub mod sessions;
