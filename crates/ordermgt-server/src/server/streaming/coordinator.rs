use super::{aggregator::ShipmentAggregator, sink::ResponseSink};
use crate::server::telemetry::increment_shipments_emitted;
use futures::{Stream, StreamExt};
use ordermgt_core::{
    Error,
    proto::{CombinedShipment, OrderId},
};
use tonic::Status;

/// Drives one `ProcessOrders` stream to completion.
///
/// Reads order identifiers one at a time, feeds them to the
/// [`ShipmentAggregator`] and forwards every flushed batch to `sink` before
/// the next identifier is read. At end of input the remaining buckets are
/// drained and sent, after which the stream closes.
///
/// # Arguments
///
/// - `aggregator`: Fresh per-stream state machine.
/// - `inbound`: Identifiers sent by the client.
/// - `sink`: Response stream, carrying the service shutdown token.
///
/// # Behavior
///
/// - An inbound error, an unknown identifier, shutdown, or a closed response
///   channel aborts the aggregator; unflushed buckets are dropped.
/// - Shutdown interrupts the stream even while it waits on a client that has
///   stopped reading.
/// - On abort the error is forwarded to the client on a best effort basis and
///   nothing else is sent.
///
/// Returns the number of shipments sent. On failure the count is still
/// available from [`ResponseSink::sent`].
pub async fn feed_shipments<S>(
    mut aggregator: ShipmentAggregator,
    mut inbound: S,
    sink: ResponseSink<CombinedShipment>,
) -> ordermgt_core::Result<usize>
where
    S: Stream<Item = Result<OrderId, Status>> + Unpin,
{
    match run(&mut aggregator, &mut inbound, &sink).await {
        Ok(()) => Ok(sink.sent()),
        Err(e) => {
            tracing::warn!(
                pending = aggregator.pending(),
                sent = sink.sent(),
                "ProcessOrders aborted: {e}"
            );
            aggregator.abort();
            // The client may already be gone, in which case there is nobody
            // left to tell.
            if !matches!(e, Error::ChannelError { .. }) {
                sink.fail(e.clone().into()).await;
            }
            Err(e)
        }
    }
}

async fn run<S>(
    aggregator: &mut ShipmentAggregator,
    inbound: &mut S,
    sink: &ResponseSink<CombinedShipment>,
) -> ordermgt_core::Result<()>
where
    S: Stream<Item = Result<OrderId, Status>> + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            () = sink.cancelled() => return Err(Error::ServiceShutdown),
            () = sink.closed() => return Err(Error::ChannelError {
                context: "response stream closed by client".to_string(),
            }),
            next = inbound.next() => next,
        };

        match next {
            Some(Ok(order_id)) => {
                tracing::debug!(order_id = %order_id.value, "Reading order");
                if let Some(flush) = aggregator.accept(&order_id.value)? {
                    forward(flush, sink).await?;
                    aggregator.finish_flush()?;
                }
            }
            Some(Err(status)) => return Err(Error::aborted(&status)),
            None => {
                tracing::debug!(pending = aggregator.pending(), "End of input, draining");
                let remainder = aggregator.drain()?;
                forward(remainder, sink).await?;
                aggregator.close()?;
                return Ok(());
            }
        }
    }
}

async fn forward(
    shipments: Vec<CombinedShipment>,
    sink: &ResponseSink<CombinedShipment>,
) -> ordermgt_core::Result<()> {
    for shipment in shipments {
        tracing::debug!(
            shipment = %shipment.id,
            orders = shipment.orders_list.len(),
            "Shipping"
        );
        sink.send(shipment).await?;
        increment_shipments_emitted(1);
    }
    Ok(())
}
