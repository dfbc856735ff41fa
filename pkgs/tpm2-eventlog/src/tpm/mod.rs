pub mod eventlog;
pub mod yaml;
