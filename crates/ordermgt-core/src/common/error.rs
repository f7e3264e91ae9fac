//! Error types for the order management service.
//!
//! This module defines the central `Error` enum, which captures every
//! reportable failure of a single call. It implements `From<Error>` for
//! `tonic::Status` so handlers can propagate errors to clients with `?`.
//!
//! ## Error Cases
//! - `NotFound`: A lookup referenced an order that is not stored.
//! - `UnknownOrder`: A consolidation stream referenced an unknown order.
//! - `IdGeneration`: A fresh order identifier could not be produced.
//! - `InvalidRequest`: The client sent a malformed message.
//! - `InvalidState`: A stream state machine was driven out of order.
//! - `StreamAborted`: The inbound stream failed before end of input.
//! - `ChannelError`: The response channel closed (client went away).
//! - `RequestCancelled`: The call was cancelled or timed out.
//! - `ServiceShutdown`: The service is draining and refuses work.

use tonic::{Code, Status};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the order management service.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// No order is stored under `id`.
    #[error("Order {id} does not exist")]
    NotFound { id: String },

    /// A consolidation stream referenced an order that is not stored.
    #[error("Order {id} cannot be shipped: no such order")]
    UnknownOrder { id: String },

    /// Generating a fresh order identifier failed.
    #[error("ID generation error: {reason}")]
    IdGeneration { reason: String },

    /// The client message was malformed.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// A state machine operation was invoked from a state that forbids it.
    #[error("Invalid state: cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// The inbound stream reported an error other than end of input.
    #[error("Stream aborted ({code:?}): {message}")]
    StreamAborted { code: Code, message: String },

    /// Internal channel send failure (typically a disconnected client).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The call was cancelled by the client or its deadline expired.
    #[error("Request cancelled by client")]
    RequestCancelled,

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    /// Captures an inbound transport error so it can be stored, cloned and
    /// replayed to the caller.
    pub fn aborted(status: &Status) -> Self {
        Self::StreamAborted {
            code: status.code(),
            message: status.message().to_string(),
        }
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound { id } => Status::not_found(format!("Order {id} does not exist")),
            Error::UnknownOrder { id } => {
                Status::not_found(format!("Order {id} does not exist; stream aborted"))
            }
            Error::IdGeneration { reason } => {
                Status::internal(format!("Error while generating order ID: {reason}"))
            }
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            e @ Error::InvalidState { .. } => Status::internal(e.to_string()),
            Error::StreamAborted { code, message } => Status::new(code, message),
            Error::ChannelError { context } => {
                Status::internal(format!("Channel error: {context}"))
            }
            Error::RequestCancelled => Status::cancelled("Request was cancelled"),
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_lookup_failures_to_not_found() {
        let status: Status = Error::NotFound {
            id: "nonexistent".into(),
        }
        .into();
        assert_eq!(status.code(), Code::NotFound);
        assert!(status.message().contains("nonexistent"));

        let status: Status = Error::UnknownOrder { id: "999".into() }.into();
        assert_eq!(status.code(), Code::NotFound);
    }

    #[test]
    fn replays_inbound_status_unchanged() {
        let inbound = Status::data_loss("connection reset");
        let status: Status = Error::aborted(&inbound).into();
        assert_eq!(status.code(), Code::DataLoss);
        assert_eq!(status.message(), "connection reset");
    }

    #[test]
    fn maps_generation_and_shutdown() {
        let status: Status = Error::IdGeneration {
            reason: "entropy".into(),
        }
        .into();
        assert_eq!(status.code(), Code::Internal);

        let status: Status = Error::ServiceShutdown.into();
        assert_eq!(status.code(), Code::Unavailable);
    }
}
