pub mod identity_logs;
pub mod metadata;
