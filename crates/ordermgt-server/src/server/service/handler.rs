//! gRPC service implementation for order management.
//!
//! This module defines [`OrderService`], the concrete implementation of the
//! [`OrderManagement`] gRPC service. Unary calls are answered inline; the
//! server-streaming and bidirectional calls each run on their own tokio task
//! that feeds a bounded response channel, while the client-streaming call is
//! consumed inline.
//!
//! ## Responsibilities
//!
//! - Own the [`OrderStore`] and share it with every call.
//! - Run the [`HookChain`] around every call.
//! - Refuse calls once shutdown has begun and cancel stragglers.
//! - Enforce caller deadlines on long-running streams.

use super::idgen::{OrderIdGenerator, UuidGenerator};
use crate::server::{
    config::ServerConfig,
    lifecycle::{CallGuard, CallTracker},
    middleware::{CallContext, CallOutcome, HookChain, Method},
    store::OrderStore,
    streaming::{
        aggregator::ShipmentAggregator, coordinator::feed_shipments, search::stream_matches,
        sink::ResponseSink, update::apply_updates,
    },
    telemetry::increment_orders_upserted,
};
use core::{future::Future, pin::Pin};
use ordermgt_core::{
    Error, REQUEST_ID_HEADER,
    proto::{
        CombinedShipment, Order, OrderId, SearchRequest, UpdateOrdersResponse,
        order_management_server::OrderManagement,
    },
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::{Stream, wrappers::ReceiverStream};
use tonic::{Request, Response, Status, Streaming, metadata::MetadataValue};
use tracing::Instrument;

type ResponseStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

/// Order management service backed by an in-memory [`OrderStore`].
///
/// Cloning yields another handle to the same store, hooks and shutdown
/// state.
#[derive(Clone)]
pub struct OrderService {
    config: ServerConfig,
    store: OrderStore,
    hooks: HookChain,
    ids: Arc<dyn OrderIdGenerator>,
    tracker: Arc<CallTracker>,
}

impl OrderService {
    /// Creates a service with the standard hooks and UUID order ids, seeding
    /// the sample orders when configured to.
    pub fn new(config: ServerConfig) -> Self {
        let store = if config.seed_sample_data {
            OrderStore::with_sample_data()
        } else {
            OrderStore::new()
        };
        if store.is_empty() {
            tracing::info!("Starting with an empty order store");
        } else {
            tracing::info!(orders = store.len(), "Order store seeded");
        }
        let tracker = Arc::new(CallTracker::new(config.shutdown_timeout));

        Self {
            config,
            store,
            hooks: HookChain::standard(),
            ids: Arc::new(UuidGenerator),
            tracker,
        }
    }

    #[cfg(test)]
    pub fn with_store(mut self, store: OrderStore) -> Self {
        self.store = store;
        self
    }

    #[cfg(test)]
    pub fn with_hooks(mut self, hooks: HookChain) -> Self {
        self.hooks = hooks;
        self
    }

    #[cfg(test)]
    pub fn with_id_generator(mut self, ids: impl OrderIdGenerator + 'static) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    #[cfg(test)]
    pub fn store(&self) -> &OrderStore {
        &self.store
    }

    /// Stops admitting calls, lets in-flight calls drain and cancels the rest.
    pub async fn shutdown(&self) {
        self.tracker.shutdown().await;
    }

    fn begin<T>(
        &self,
        method: Method,
        req: &Request<T>,
    ) -> Result<(CallContext, CallGuard), Status> {
        let guard = self.tracker.admit().inspect_err(|_| {
            tracing::debug!(method = method.name(), "Call refused during shutdown");
        })?;
        let ctx = self.hooks.start(method, req.metadata())?;
        Ok((ctx, guard))
    }

    /// Response channel for a streaming call, tied to the shutdown token.
    fn open_stream<T: Send>(&self) -> (ResponseSink<T>, ReceiverStream<Result<T, Status>>) {
        let (resp_tx, resp_rx) = mpsc::channel(self.config.stream_buffer_size);
        let sink = ResponseSink::new(resp_tx, self.tracker.token());
        (sink, ReceiverStream::new(resp_rx))
    }

    fn add(&self, mut order: Order) -> Result<OrderId, Error> {
        if order.id.is_empty() {
            order.id = self.ids.next_id()?;
        }
        let order_id = order.id.clone();
        let replaced = self.store.put(order).is_some();
        increment_orders_upserted(1);
        tracing::info!(%order_id, replaced, "Order added");
        Ok(OrderId { value: order_id })
    }

    fn get(&self, order_id: OrderId) -> Result<Order, Error> {
        self.store
            .get(&order_id.value)
            .map(|order| Order::clone(&order))
            .ok_or(Error::NotFound { id: order_id.value })
    }

    /// Runs a streaming call body on its own task.
    ///
    /// The task owns the call guard, enforces the caller deadline and reports
    /// the outcome to the hook chain once the stream has ended. On deadline
    /// expiry the body is dropped, discarding any per-stream state, and the
    /// client receives `DEADLINE_EXCEEDED`.
    fn spawn_stream<T, F>(&self, ctx: CallContext, guard: CallGuard, sink: ResponseSink<T>, body: F)
    where
        T: Send + 'static,
        F: Future<Output = ordermgt_core::Result<usize>> + Send + 'static,
    {
        let hooks = self.hooks.clone();
        let span = ctx.span();

        let fut = async move {
            let _guard = guard;
            let result = match ctx.timeout {
                Some(limit) => match tokio::time::timeout(limit, body).await {
                    Ok(result) => result.map_err(Status::from),
                    Err(_) => {
                        tracing::warn!(sent = sink.sent(), "Stream deadline exceeded");
                        let status = Status::deadline_exceeded("Deadline exceeded");
                        sink.fail(status.clone()).await;
                        Err(status)
                    }
                },
                None => body.await.map_err(Status::from),
            };

            let outcome = match &result {
                Ok(sent) => CallOutcome::ok(&ctx, *sent),
                Err(status) => CallOutcome::failed(&ctx, status, sink.sent()),
            };
            hooks.finish(&ctx, &outcome);
        };

        tokio::spawn(fut.instrument(span));
    }
}

/// Wraps `body` in a response carrying the call's request id.
fn respond<T>(ctx: &CallContext, body: T) -> Response<T> {
    let mut response = Response::new(body);
    if let Ok(value) = MetadataValue::try_from(ctx.request_id.as_str()) {
        response.metadata_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

#[tonic::async_trait]
impl OrderManagement for OrderService {
    type SearchOrdersStream = ResponseStream<Order>;
    type ProcessOrdersStream = ResponseStream<CombinedShipment>;

    async fn add_order(&self, req: Request<Order>) -> Result<Response<OrderId>, Status> {
        let (ctx, _guard) = self.begin(Method::AddOrder, &req)?;
        let result = ctx
            .span()
            .in_scope(|| self.add(req.into_inner()))
            .map_err(Status::from);
        self.hooks.finish(&ctx, &CallOutcome::from_result(&ctx, &result));
        result.map(|order_id| respond(&ctx, order_id))
    }

    async fn get_order(&self, req: Request<OrderId>) -> Result<Response<Order>, Status> {
        let (ctx, _guard) = self.begin(Method::GetOrder, &req)?;
        let result = self.get(req.into_inner()).map_err(Status::from);
        self.hooks.finish(&ctx, &CallOutcome::from_result(&ctx, &result));
        result.map(|order| respond(&ctx, order))
    }

    async fn search_orders(
        &self,
        req: Request<SearchRequest>,
    ) -> Result<Response<Self::SearchOrdersStream>, Status> {
        let (ctx, guard) = self.begin(Method::SearchOrders, &req)?;
        let query = req.into_inner().query;

        let (sink, outbound) = self.open_stream();
        let store = self.store.clone();
        let body = {
            let sink = sink.clone();
            async move { stream_matches(&store, &query, sink).await }
        };

        let response = respond(&ctx, Box::pin(outbound) as Self::SearchOrdersStream);
        self.spawn_stream(ctx, guard, sink, body);
        Ok(response)
    }

    async fn update_orders(
        &self,
        req: Request<Streaming<Order>>,
    ) -> Result<Response<UpdateOrdersResponse>, Status> {
        let (ctx, _guard) = self.begin(Method::UpdateOrders, &req)?;
        let cancel = self.tracker.token();

        let consume = apply_updates(&self.store, req.into_inner(), cancel).instrument(ctx.span());
        let result = match ctx.timeout {
            Some(limit) => match tokio::time::timeout(limit, consume).await {
                Ok(result) => result.map_err(Status::from),
                Err(_) => Err(Status::deadline_exceeded("Deadline exceeded")),
            },
            None => consume.await.map_err(Status::from),
        };

        self.hooks.finish(&ctx, &CallOutcome::from_result(&ctx, &result));
        result.map(|ack| respond(&ctx, ack))
    }

    async fn process_orders(
        &self,
        req: Request<Streaming<OrderId>>,
    ) -> Result<Response<Self::ProcessOrdersStream>, Status> {
        let (ctx, guard) = self.begin(Method::ProcessOrders, &req)?;
        let inbound = req.into_inner();

        let (sink, outbound) = self.open_stream();
        let aggregator = ShipmentAggregator::new(self.store.clone(), self.config.batch_size);
        let body = feed_shipments(aggregator, inbound, sink.clone());

        let response = respond(&ctx, Box::pin(outbound) as Self::ProcessOrdersStream);
        self.spawn_stream(ctx, guard, sink, body);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::middleware::{CallHook, tests::RecordingHook};
    use core::time::Duration;
    use futures::{StreamExt, stream};
    use ordermgt_core::proto::{
        order_management_client::OrderManagementClient,
        order_management_server::OrderManagementServer,
    };
    use parking_lot::Mutex;
    use tokio::net::TcpListener;
    use tokio_stream::wrappers::TcpListenerStream;
    use tonic::{Code, transport::Channel, transport::Server};

    async fn serve_with(
        server: OrderManagementServer<OrderService>,
    ) -> OrderManagementClient<Channel> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            Server::builder()
                .add_service(server)
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await
                .unwrap();
        });
        OrderManagementClient::connect(format!("http://{addr}"))
            .await
            .unwrap()
    }

    async fn serve(service: OrderService) -> OrderManagementClient<Channel> {
        serve_with(OrderManagementServer::new(service)).await
    }

    fn sample_service() -> OrderService {
        OrderService::new(ServerConfig::default())
    }

    fn order_id(value: &str) -> OrderId {
        OrderId {
            value: value.to_string(),
        }
    }

    fn new_order(id: &str, destination: &str) -> Order {
        Order {
            id: id.to_string(),
            items: vec!["Google Pixel Book".to_string()],
            description: "Laptop".to_string(),
            price: 1100.0,
            destination: destination.to_string(),
        }
    }

    struct FailingIds;

    impl OrderIdGenerator for FailingIds {
        fn next_id(&self) -> ordermgt_core::Result<String> {
            Err(Error::IdGeneration {
                reason: "generator exhausted".into(),
            })
        }
    }

    /// Records `(code, messages_sent)` for every finished call.
    #[derive(Clone, Default)]
    struct OutcomeLog(Arc<Mutex<Vec<(Code, usize)>>>);

    impl CallHook for OutcomeLog {
        fn before(&self, _ctx: &CallContext) -> Result<(), Status> {
            Ok(())
        }

        fn after(&self, _ctx: &CallContext, outcome: &CallOutcome) {
            self.0.lock().push((outcome.code, outcome.messages_sent));
        }
    }

    impl OutcomeLog {
        /// A failed stream reports to the client before its task wraps up.
        async fn first(&self) -> (Code, usize) {
            for _ in 0..100 {
                if let Some(outcome) = self.0.lock().first().copied() {
                    return outcome;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("no call finished");
        }
    }

    async fn drain_shipments(
        shipments: &mut Streaming<CombinedShipment>,
    ) -> Vec<(String, Vec<String>)> {
        let mut received = Vec::new();
        while let Some(shipment) = shipments.message().await.unwrap() {
            let ids = shipment.orders_list.into_iter().map(|o| o.id).collect();
            received.push((shipment.id, ids));
        }
        received
    }

    fn shipment(id: &str, order_ids: &[&str]) -> (String, Vec<String>) {
        let order_ids = order_ids.iter().map(|id| id.to_string()).collect();
        (id.to_string(), order_ids)
    }

    #[tokio::test]
    async fn process_orders_flushes_per_batch_and_at_end_of_input() {
        let mut client = serve(sample_service()).await;
        let ids: Vec<_> = ["102", "103", "104", "105", "106"]
            .into_iter()
            .map(order_id)
            .collect();

        let mut shipments = client
            .process_orders(stream::iter(ids))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(
            drain_shipments(&mut shipments).await,
            [
                shipment("cmb-Mountain View, CA", &["102", "104"]),
                shipment("cmb-San Jose, CA", &["103"]),
                shipment("cmb-San Jose, CA", &["105"]),
                shipment("cmb-Mountain View, CA", &["106"]),
            ]
        );
    }

    #[tokio::test]
    async fn concurrent_process_orders_streams_keep_separate_batches() {
        let client = serve(sample_service()).await;
        let (first_tx, first_rx) = mpsc::channel(4);
        let (second_tx, second_rx) = mpsc::channel(4);

        let mut first = client
            .clone()
            .process_orders(ReceiverStream::new(first_rx))
            .await
            .unwrap()
            .into_inner();
        let mut second = client
            .clone()
            .process_orders(ReceiverStream::new(second_rx))
            .await
            .unwrap()
            .into_inner();

        for (tx, id) in [
            (&first_tx, "102"),
            (&second_tx, "103"),
            (&first_tx, "104"),
            (&second_tx, "105"),
            (&first_tx, "106"),
        ] {
            tx.send(order_id(id)).await.unwrap();
        }
        drop(first_tx);
        drop(second_tx);

        assert_eq!(
            drain_shipments(&mut first).await,
            [shipment("cmb-Mountain View, CA", &["102", "104", "106"])]
        );
        assert_eq!(
            drain_shipments(&mut second).await,
            [shipment("cmb-San Jose, CA", &["103", "105"])]
        );
    }

    #[tokio::test]
    async fn process_orders_aborts_on_unknown_order() {
        let mut client = serve(sample_service()).await;
        let ids = vec![order_id("102"), order_id("nonexistent"), order_id("103")];

        let mut shipments = client
            .process_orders(stream::iter(ids))
            .await
            .unwrap()
            .into_inner();

        let status = shipments.message().await.unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
    }

    #[tokio::test]
    async fn aborted_stream_reports_the_shipments_already_sent() {
        let outcomes = OutcomeLog::default();
        let service = sample_service().with_hooks(HookChain::new().with(outcomes.clone()));
        let mut client = serve(service).await;
        let ids: Vec<_> = ["102", "103", "104", "nonexistent"]
            .into_iter()
            .map(order_id)
            .collect();

        let mut shipments = client
            .process_orders(stream::iter(ids))
            .await
            .unwrap()
            .into_inner();

        assert!(shipments.message().await.unwrap().is_some());
        assert!(shipments.message().await.unwrap().is_some());
        let status = shipments.message().await.unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(outcomes.first().await, (Code::NotFound, 2));
    }

    #[tokio::test]
    async fn process_orders_input_failure_discards_the_partial_batch() {
        let outcomes = OutcomeLog::default();
        let service = sample_service().with_hooks(HookChain::new().with(outcomes.clone()));
        // The third id is too large to decode, failing the inbound stream.
        let server = OrderManagementServer::new(service).max_decoding_message_size(64);
        let mut client = serve_with(server).await;
        let ids = vec![order_id("102"), order_id("103"), order_id(&"x".repeat(1024))];

        let mut shipments = client
            .process_orders(stream::iter(ids))
            .await
            .unwrap()
            .into_inner();

        let status = shipments.message().await.unwrap_err();
        assert_ne!(status.code(), Code::Ok);
        assert_ne!(status.code(), Code::NotFound);
        assert_eq!(outcomes.first().await, (status.code(), 0));
    }

    #[tokio::test]
    async fn process_orders_respects_caller_deadline() {
        let mut client = serve(sample_service()).await;
        let ids = stream::iter(vec![order_id("102"), order_id("103")]).chain(stream::pending());
        let mut request = Request::new(ids);
        request.set_timeout(Duration::from_millis(200));

        let mut shipments = client.process_orders(request).await.unwrap().into_inner();
        let status = shipments.message().await.unwrap_err();
        assert_eq!(status.code(), Code::DeadlineExceeded);
    }

    #[tokio::test]
    async fn search_orders_streams_matches() {
        let mut client = serve(sample_service()).await;
        let mut results = client
            .search_orders(SearchRequest {
                query: "Echo".into(),
            })
            .await
            .unwrap()
            .into_inner();

        let mut ids = Vec::new();
        while let Some(order) = results.message().await.unwrap() {
            ids.push(order.id);
        }
        assert_eq!(ids, ["105", "106"]);
    }

    #[tokio::test]
    async fn update_orders_acknowledges_once() {
        let service = sample_service();
        let store = service.store().clone();
        let mut client = serve(service).await;

        let updates = vec![
            new_order("102", "San Jose, CA"),
            new_order("200", "Austin, TX"),
        ];
        let ack = client
            .update_orders(stream::iter(updates))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(ack.order_ids, ["102", "200"]);
        assert_eq!(ack.summary, "Updated Order IDs: 102, 200");
        assert_eq!(store.get("102").unwrap().destination, "San Jose, CA");
        assert_eq!(store.get("200").unwrap().description, "Laptop");

        let fetched = client
            .get_order(order_id("200"))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(fetched, new_order("200", "Austin, TX"));
    }

    #[tokio::test]
    async fn get_order_reports_not_found() {
        let mut client = serve(sample_service()).await;
        let status = client
            .get_order(order_id("nonexistent"))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);

        let first = client.get_order(order_id("103")).await.unwrap().into_inner();
        let second = client.get_order(order_id("103")).await.unwrap().into_inner();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn add_order_keeps_or_generates_ids() {
        let mut client = serve(sample_service()).await;

        let kept = client
            .add_order(new_order("300", "Austin, TX"))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(kept.value, "300");

        let generated = client
            .add_order(new_order("", "Austin, TX"))
            .await
            .unwrap()
            .into_inner();
        assert!(uuid::Uuid::parse_str(&generated.value).is_ok());

        let stored = client.get_order(generated.clone()).await.unwrap().into_inner();
        assert_eq!(stored.id, generated.value);
    }

    #[tokio::test]
    async fn add_order_generation_failure_is_internal_and_leaves_store_alone() {
        let service = sample_service().with_id_generator(FailingIds);
        let store = service.store().clone();
        let mut client = serve(service).await;

        let status = client
            .add_order(new_order("", "Austin, TX"))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(store.len(), 5);
    }

    #[tokio::test]
    async fn hooks_wrap_calls_and_can_reject_them() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let service = OrderService::new(ServerConfig::default())
            .with_store(OrderStore::new())
            .with_hooks(HookChain::new().with(RecordingHook {
                name: "gate",
                log: log.clone(),
                reject: true,
            }));
        let store = service.store().clone();
        let mut client = serve(service).await;

        let status = client
            .add_order(new_order("1", "Austin, TX"))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Unauthenticated);
        assert!(store.is_empty());
        assert_eq!(*log.lock(), ["gate:before:AddOrder"]);
    }

    #[tokio::test]
    async fn stream_hooks_run_after_the_stream_ends() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let service = sample_service().with_hooks(HookChain::new().with(RecordingHook {
            name: "rec",
            log: log.clone(),
            reject: false,
        }));
        let mut client = serve(service).await;

        let mut results = client
            .search_orders(SearchRequest {
                query: "Apple".into(),
            })
            .await
            .unwrap()
            .into_inner();
        while results.message().await.unwrap().is_some() {}

        assert_eq!(*log.lock(), ["rec:before:SearchOrders", "rec:after:Ok"]);
    }

    #[tokio::test]
    async fn request_id_is_echoed() {
        let mut client = serve(sample_service()).await;
        let mut request = Request::new(order_id("102"));
        request
            .metadata_mut()
            .insert(REQUEST_ID_HEADER, MetadataValue::from_static("trace-7"));

        let response = client.get_order(request).await.unwrap();
        let echoed = response.metadata().get(REQUEST_ID_HEADER).unwrap();
        assert_eq!(echoed.to_str().unwrap(), "trace-7");
    }

    #[tokio::test]
    async fn calls_are_refused_after_shutdown() {
        let service = sample_service();
        service.shutdown().await;
        let mut client = serve(service).await;

        let status = client.get_order(order_id("102")).await.unwrap_err();
        assert_eq!(status.code(), Code::Unavailable);
    }
}
