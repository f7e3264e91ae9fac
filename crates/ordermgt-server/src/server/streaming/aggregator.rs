//! Per-stream shipment consolidation state machine.
//!
//! A [`ShipmentAggregator`] lives for exactly one `ProcessOrders` call. It
//! groups the orders behind the received identifiers by destination and hands
//! back complete batches of [`CombinedShipment`]s whenever `batch_size`
//! identifiers have been processed, plus a final batch at end of input.
//!
//! ```text
//! Collecting --accept x batch_size--> Flushing --finish_flush--> Collecting
//! Collecting --drain--> Draining --close--> Closed
//! any non-Closed --abort--> Aborted
//! ```
//!
//! Buckets are emitted in the order their destination was first touched
//! within the batch.

use crate::server::store::OrderStore;
use core::num::NonZeroUsize;
use ordermgt_core::{
    Error, Result, SHIPMENT_STATUS,
    proto::{CombinedShipment, Order},
    shipment_id,
};
use std::{collections::HashMap, sync::Arc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    Collecting,
    Flushing,
    Draining,
    Closed,
    Aborted,
}

impl AggregatorState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Collecting => "collecting",
            Self::Flushing => "flushing",
            Self::Draining => "draining",
            Self::Closed => "closed",
            Self::Aborted => "aborted",
        }
    }
}

/// Orders bound for one destination within the current batch.
struct Bucket {
    destination: String,
    orders: Vec<Arc<Order>>,
}

impl Bucket {
    fn into_shipment(self) -> CombinedShipment {
        CombinedShipment {
            id: shipment_id(&self.destination),
            status: SHIPMENT_STATUS.to_string(),
            orders_list: self.orders.iter().map(|order| Order::clone(order)).collect(),
        }
    }
}

/// Accumulated buckets plus the number of orders processed since the last
/// flush.
#[derive(Default)]
struct BatchState {
    processed: usize,
    buckets: Vec<Bucket>,
    by_destination: HashMap<String, usize>,
}

impl BatchState {
    fn push(&mut self, order: Arc<Order>) {
        let idx = match self.by_destination.get(&order.destination) {
            Some(&idx) => idx,
            None => {
                let idx = self.buckets.len();
                self.by_destination.insert(order.destination.clone(), idx);
                self.buckets.push(Bucket {
                    destination: order.destination.clone(),
                    orders: Vec::new(),
                });
                idx
            }
        };
        self.buckets[idx].orders.push(order);
        self.processed += 1;
    }

    fn take(&mut self) -> Vec<CombinedShipment> {
        let batch = core::mem::take(self);
        batch
            .buckets
            .into_iter()
            .filter(|bucket| !bucket.orders.is_empty())
            .map(Bucket::into_shipment)
            .collect()
    }
}

/// Stateful consolidation of one `ProcessOrders` stream.
pub struct ShipmentAggregator {
    store: OrderStore,
    batch_size: NonZeroUsize,
    state: AggregatorState,
    batch: BatchState,
}

impl ShipmentAggregator {
    pub fn new(store: OrderStore, batch_size: NonZeroUsize) -> Self {
        Self {
            store,
            batch_size,
            state: AggregatorState::Collecting,
            batch: BatchState::default(),
        }
    }

    #[cfg(test)]
    pub const fn state(&self) -> AggregatorState {
        self.state
    }

    /// Orders accepted since the last flush.
    pub const fn pending(&self) -> usize {
        self.batch.processed
    }

    /// Resolves `order_id` and files it under its destination.
    ///
    /// Returns the shipments to send when this identifier completes a batch.
    /// The aggregator then stays in [`AggregatorState::Flushing`] until
    /// [`finish_flush`](Self::finish_flush) is called.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownOrder`] if the identifier does not resolve. The
    ///   caller is expected to [`abort`](Self::abort).
    /// - [`Error::InvalidState`] outside of [`AggregatorState::Collecting`].
    pub fn accept(&mut self, order_id: &str) -> Result<Option<Vec<CombinedShipment>>> {
        self.expect(AggregatorState::Collecting, "accept")?;

        let order = self.store.get(order_id).ok_or_else(|| Error::UnknownOrder {
            id: order_id.to_string(),
        })?;
        self.batch.push(order);

        if self.batch.processed < self.batch_size.get() {
            return Ok(None);
        }

        self.state = AggregatorState::Flushing;
        Ok(Some(self.batch.take()))
    }

    /// Marks the current flush as fully sent and resumes collecting.
    pub fn finish_flush(&mut self) -> Result<()> {
        self.expect(AggregatorState::Flushing, "finish a flush")?;
        self.state = AggregatorState::Collecting;
        Ok(())
    }

    /// Handles end of input: returns every remaining non-empty bucket.
    pub fn drain(&mut self) -> Result<Vec<CombinedShipment>> {
        self.expect(AggregatorState::Collecting, "drain")?;
        self.state = AggregatorState::Draining;
        Ok(self.batch.take())
    }

    /// Completes a successful stream after the drained shipments were sent.
    pub fn close(&mut self) -> Result<()> {
        self.expect(AggregatorState::Draining, "close")?;
        self.state = AggregatorState::Closed;
        Ok(())
    }

    /// Discards all unflushed buckets. No-op once closed.
    pub fn abort(&mut self) {
        if self.state == AggregatorState::Closed {
            return;
        }
        self.batch = BatchState::default();
        self.state = AggregatorState::Aborted;
    }

    fn expect(&self, state: AggregatorState, operation: &'static str) -> Result<()> {
        if self.state == state {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation,
                state: self.state.as_str(),
            })
        }
    }
}
