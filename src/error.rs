//! Contains the error type for this library.

#![allow(clippy::default_trait_access)]

use snafu::Snafu;
use std::time::Duration;

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for this library.
#[derive(Debug, Snafu)]
#[snafu(visibility = "pub(crate)")]
#[non_exhaustive]
pub enum Error {
    // A required call argument was absent or empty; caught before anything
    // goes on the wire
    #[snafu(display(
        "Required argument `{}` missing or empty for {}",
        option,
        operation
    ))]
    MissingArgument {
        option: String,
        operation: &'static str,
    },

    // An action was invoked with no bound decode strategy; this is a
    // programming defect, not a runtime condition
    #[snafu(display("No decode strategy registered for action `{}`", action))]
    UnregisteredAction { action: String },

    // Forwarded unchanged from the transport collaborator
    #[snafu(display("Transport error: {}", source))]
    Transport {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    // Raised only by the consistency poller when its deadline elapses
    #[snafu(display(
        "Resource {} not visible after {} seconds",
        resource_id,
        waited.as_secs()
    ))]
    Timeout {
        resource_id: String,
        waited: Duration,
    },

    // A response did not carry the shape the bound strategy promised
    #[snafu(display("Unexpected `{}` response, expected {}", action, expected))]
    UnexpectedResponse {
        action: String,
        expected: &'static str,
    },

    #[snafu(display("Failed to decode {} record: {}", kind, source))]
    Decode {
        kind: &'static str,
        source: serde_json::Error,
    },

    #[snafu(display("Poll task failed: {}", source))]
    PollTask { source: tokio::task::JoinError },
}
