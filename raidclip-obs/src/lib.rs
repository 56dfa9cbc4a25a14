pub mod backoff;
pub mod client;
pub mod error;
pub mod link;
pub mod models;
pub mod session;

pub use backoff::Backoff;
pub use client::ObwsConnector;
pub use error::{LinkError, Result};
pub use link::{LinkTimings, ObsLink};
pub use models::*;
pub use session::{ObsConnector, ObsSession};
