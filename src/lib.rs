pub mod audit;
pub mod auth;
pub mod codes;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod mailer;
pub mod models;
pub mod notifications;
pub mod policy;
pub mod reminders;
pub mod routes;
pub mod schema;
pub mod state;
pub mod storage;
pub mod utils;
pub mod workers;
pub mod workflow;

pub use workers::{default_handlers, JobExecution, JobHandler, Worker};
