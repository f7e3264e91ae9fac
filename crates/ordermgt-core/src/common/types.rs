//! # Shared Constants
//!
//! Values that both sides of the order management contract rely on when
//! building or interpreting messages.
//!
//! - [`DEFAULT_BATCH_SIZE`] - identifiers consolidated per shipment flush
//! - [`SHIPMENT_ID_PREFIX`] / [`shipment_id`] - how shipment ids are derived
//! - [`SHIPMENT_STATUS`] - status label stamped on every emitted shipment
//! - [`REQUEST_ID_HEADER`] - metadata key carrying the per-call request id

/// Number of processed order identifiers after which `ProcessOrders` flushes
/// its accumulated shipments.
pub const DEFAULT_BATCH_SIZE: usize = 3;

/// Prefix of every combined shipment identifier.
pub const SHIPMENT_ID_PREFIX: &str = "cmb-";

/// Status label attached to every emitted combined shipment.
pub const SHIPMENT_STATUS: &str = "Processed!";

/// Metadata key used to correlate a call across client and server logs.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Derives the combined shipment identifier for a destination.
///
/// ```
/// assert_eq!(ordermgt_core::shipment_id("San Jose, CA"), "cmb-San Jose, CA");
/// ```
pub fn shipment_id(destination: &str) -> String {
    format!("{SHIPMENT_ID_PREFIX}{destination}")
}
