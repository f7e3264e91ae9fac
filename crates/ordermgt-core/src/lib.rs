//! # `ordermgt-core`
//!
//! Shared contract for the order management gRPC service: the generated
//! protobuf bindings, the service-wide [`Error`] type and the constants both
//! the server and clients agree on.

mod common;
pub use common::*;

/// gRPC service and message definitions generated from `proto/ordermgt.proto`.
///
/// ## Service
///
/// - `OrderManagement` with `AddOrder`, `GetOrder`, `SearchOrders`,
///   `UpdateOrders` and `ProcessOrders`.
///
/// ## Messages
///
/// - [`Order`](proto::Order) - a purchase record.
/// - [`OrderId`](proto::OrderId) - wrapper around an order identifier.
/// - [`SearchRequest`](proto::SearchRequest) - item substring query.
/// - [`UpdateOrdersResponse`](proto::UpdateOrdersResponse) - terminal
///   acknowledgement of an update stream.
/// - [`CombinedShipment`](proto::CombinedShipment) - orders bound for one
///   destination within a single batch.
pub mod proto {
    tonic::include_proto!("ordermgt");

    /// Encoded descriptor set for the reflection service.
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("ordermgt_descriptor");
}
