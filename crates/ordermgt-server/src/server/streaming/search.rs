use super::sink::ResponseSink;
use crate::server::store::OrderStore;
use ordermgt_core::{Error, proto::Order};

/// Returns the first item of `order` that contains `query`, case-sensitively.
pub fn first_match<'a>(order: &'a Order, query: &str) -> Option<&'a str> {
    order
        .items
        .iter()
        .map(String::as_str)
        .find(|item| item.contains(query))
}

/// Streams every stored order with an item matching `query` to `sink`.
///
/// Works on a snapshot taken when the call starts, so concurrent updates do
/// not affect which orders are visited. Each matching order is sent once,
/// even when several of its items match.
///
/// Stops early, without error, if the client has gone away; stops with
/// [`Error::ServiceShutdown`] if shutdown begins mid-scan, including while
/// waiting on a client that has stopped reading.
///
/// Returns the number of orders sent.
pub async fn stream_matches(
    store: &OrderStore,
    query: &str,
    sink: ResponseSink<Order>,
) -> ordermgt_core::Result<usize> {
    for order in store.scan() {
        if sink.is_cancelled() {
            sink.fail(Error::ServiceShutdown.into()).await;
            return Err(Error::ServiceShutdown);
        }

        if sink.is_closed() {
            tracing::debug!(sent = sink.sent(), "Search client disconnected");
            break;
        }

        let Some(item) = first_match(&order, query) else {
            continue;
        };

        tracing::debug!(order_id = %order.id, item, "Matching order found");
        match sink.send(Order::clone(&order)).await {
            Ok(()) => {}
            Err(Error::ChannelError { context }) => {
                tracing::debug!("{context}");
                break;
            }
            Err(e) => {
                sink.fail(e.clone().into()).await;
                return Err(e);
            }
        }
    }

    Ok(sink.sent())
}
