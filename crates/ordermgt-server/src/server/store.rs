//! In-memory order store shared by every call on a service instance.
//!
//! Orders are held behind `Arc` so that readers (search snapshots, shipment
//! buckets) keep referencing the exact record they observed while writers
//! replace entries wholesale. A single reader/writer lock guards the map;
//! scans are far more frequent than writes in the expected workload.

use ordermgt_core::proto::Order;
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};

/// Concurrency-safe keyed store of [`Order`] records.
///
/// Cloning is cheap and yields a handle to the same underlying map.
#[derive(Clone, Default)]
pub struct OrderStore {
    orders: Arc<RwLock<HashMap<String, Arc<Order>>>>,
}

impl OrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with the reference sample orders `102`-`106`.
    pub fn with_sample_data() -> Self {
        let store = Self::new();
        for order in sample_orders() {
            store.put(order);
        }
        store
    }

    /// Returns the order stored under `id`, if any.
    pub fn get(&self, id: &str) -> Option<Arc<Order>> {
        self.orders.read().get(id).cloned()
    }

    /// Inserts `order`, replacing any previous order with the same identifier.
    ///
    /// Returns the replaced order.
    pub fn put(&self, order: Order) -> Option<Arc<Order>> {
        let id = order.id.clone();
        self.orders.write().insert(id, Arc::new(order))
    }

    /// Snapshot of every stored order, sorted by identifier.
    ///
    /// The snapshot is taken under one read lock; later writes are not
    /// reflected in it.
    pub fn scan(&self) -> Vec<Arc<Order>> {
        let mut snapshot: Vec<_> = self.orders.read().values().cloned().collect();
        snapshot.sort_unstable_by(|a, b| a.id.cmp(&b.id));
        snapshot
    }

    pub fn len(&self) -> usize {
        self.orders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.read().is_empty()
    }
}

fn order(id: &str, items: &[&str], destination: &str, price: f32) -> Order {
    Order {
        id: id.to_string(),
        items: items.iter().map(|item| item.to_string()).collect(),
        description: String::new(),
        price,
        destination: destination.to_string(),
    }
}

/// The five orders the service is demonstrated with.
pub fn sample_orders() -> Vec<Order> {
    vec![
        order(
            "102",
            &["Google Pixel 3A", "Mac Book Pro"],
            "Mountain View, CA",
            1800.00,
        ),
        order("103", &["Apple Watch S4"], "San Jose, CA", 400.00),
        order(
            "104",
            &["Google Home Mini", "Google Nest Hub"],
            "Mountain View, CA",
            400.00,
        ),
        order("105", &["Amazon Echo"], "San Jose, CA", 30.00),
        order(
            "106",
            &["Amazon Echo", "Apple iPhone XS"],
            "Mountain View, CA",
            300.00,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_overwrites_by_identifier() {
        let store = OrderStore::new();
        assert!(store.put(order("1", &["Pen"], "Paris", 1.0)).is_none());
        let previous = store.put(order("1", &["Ink"], "Lyon", 2.0)).unwrap();

        assert_eq!(previous.destination, "Paris");
        assert_eq!(store.len(), 1);
        let current = store.get("1").unwrap();
        assert_eq!(current.items, vec!["Ink".to_string()]);
        assert_eq!(current.destination, "Lyon");
    }

    #[test]
    fn get_is_idempotent() {
        let store = OrderStore::with_sample_data();
        let first = store.get("102").unwrap();
        let second = store.get("102").unwrap();
        assert_eq!(first, second);
        assert!(store.get("nonexistent").is_none());
    }

    #[test]
    fn scan_is_a_sorted_snapshot() {
        let store = OrderStore::with_sample_data();
        let snapshot = store.scan();
        store.put(order("999", &["Late"], "Nowhere", 0.0));

        let ids: Vec<_> = snapshot.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, ["102", "103", "104", "105", "106"]);
        assert_eq!(store.len(), 6);
    }

    #[test]
    fn held_references_survive_overwrites() {
        let store = OrderStore::with_sample_data();
        let held = store.get("105").unwrap();
        store.put(order("105", &["Amazon Echo"], "Mountain View, CA", 30.0));

        assert_eq!(held.destination, "San Jose, CA");
        assert_eq!(store.get("105").unwrap().destination, "Mountain View, CA");
    }

    #[test]
    fn concurrent_writers_keep_keys_unique() {
        let store = OrderStore::new();
        std::thread::scope(|scope| {
            for worker in 0..8 {
                let store = store.clone();
                scope.spawn(move || {
                    for i in 0..100 {
                        let id = format!("{}", i % 50);
                        store.put(order(&id, &["Item"], &format!("dest-{worker}"), 1.0));
                        let _ = store.scan();
                    }
                });
            }
        });
        assert_eq!(store.len(), 50);
    }
}
