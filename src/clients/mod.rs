use thiserror::Error;

pub mod alerts;
pub mod notifier;
pub mod users;

pub use alerts::{AlertClient, AlertSeverity};
pub use notifier::{HttpNotifier, NoopNotifier, Notifier};
pub use users::{HttpUserDirectory, User, UserDirectory};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Unexpected(String),
}
