use crate::server::{store::OrderStore, telemetry::increment_orders_upserted};
use futures::{Stream, StreamExt};
use ordermgt_core::{
    Error,
    proto::{Order, UpdateOrdersResponse},
};
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// Running summary of an `UpdateOrders` stream.
#[derive(Debug, Default)]
pub struct UpdateSummary {
    order_ids: Vec<String>,
}

impl UpdateSummary {
    pub fn record(&mut self, order_id: String) {
        self.order_ids.push(order_id);
    }

    pub fn len(&self) -> usize {
        self.order_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order_ids.is_empty()
    }

    /// Builds the single acknowledgement sent once the client half-closes.
    pub fn into_ack(self) -> UpdateOrdersResponse {
        let summary = format!("Updated Order IDs: {}", self.order_ids.join(", "));
        UpdateOrdersResponse {
            order_ids: self.order_ids,
            summary,
        }
    }
}

/// Upserts every order received on `inbound` and acknowledges at end of input.
///
/// Each order fully replaces any stored order with the same identifier as
/// soon as it is received. Upserts that happened before a failure are kept.
///
/// # Errors
///
/// - [`Error::StreamAborted`] when the inbound stream fails before end of
///   input. No acknowledgement is produced.
/// - [`Error::InvalidRequest`] for an order without an identifier.
/// - [`Error::ServiceShutdown`] if `cancel` fires while waiting for input.
pub async fn apply_updates<S>(
    store: &OrderStore,
    mut inbound: S,
    cancel: CancellationToken,
) -> ordermgt_core::Result<UpdateOrdersResponse>
where
    S: Stream<Item = Result<Order, Status>> + Unpin,
{
    let mut summary = UpdateSummary::default();

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::ServiceShutdown),
            next = inbound.next() => next,
        };

        match next {
            Some(Ok(order)) => {
                if order.id.is_empty() {
                    return Err(Error::InvalidRequest {
                        reason: format!(
                            "Order #{} in the update stream has no ID",
                            summary.len() + 1
                        ),
                    });
                }
                let order_id = order.id.clone();
                let replaced = store.put(order).is_some();
                increment_orders_upserted(1);
                tracing::debug!(%order_id, replaced, "Order updated");
                summary.record(order_id);
            }
            Some(Err(status)) => {
                tracing::warn!(
                    applied = summary.len(),
                    "UpdateOrders aborted: {}",
                    status.message()
                );
                return Err(Error::aborted(&status));
            }
            None => {
                if summary.is_empty() {
                    tracing::info!("Update stream closed without orders");
                } else {
                    tracing::info!(updated = summary.len(), "Update stream complete");
                }
                return Ok(summary.into_ack());
            }
        }
    }
}
