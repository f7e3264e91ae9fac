//! Stream handlers behind the three streaming RPCs.
//!
//! Each handler is written against a plain [`futures::Stream`] of inbound
//! messages and a [`sink::ResponseSink`], so the tonic service only wires
//! transport types into them.
//!
//! - [`aggregator`] - per-stream shipment consolidation state machine.
//! - [`coordinator`] - `ProcessOrders` loop driving the aggregator.
//! - [`search`] - `SearchOrders` snapshot scan.
//! - [`sink`] - response channel that yields to shutdown.
//! - [`update`] - `UpdateOrders` upsert and acknowledgement.

pub mod aggregator;
pub mod coordinator;
pub mod search;
pub mod sink;
pub mod update;
