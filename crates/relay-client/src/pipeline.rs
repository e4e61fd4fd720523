//! The client pipeline: connection → dedup → executor → batcher → sender.
//!
//! [`RelayClient::run`] attaches to a session, executes every new tool
//! request exactly once, and delivers responses in batches until the
//! shutdown token fires. When the stream transport gives up and fallback
//! is enabled, the pipeline switches to polling and carries the duplicate
//! tracker across the switch. Stream heartbeats are acknowledged so the
//! server's idle clock sees a live client.

use std::sync::Arc;

use relay_core::{ConnectionError, RateLimiter, StreamEvent, ToolRequest, ToolResponse};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::api::RelayApi;
use crate::batch::{BatchSink, BatchStats, ResponseBatchProcessor};
use crate::config::ClientConfig;
use crate::connection::ConnectionManager;
use crate::dedup::RequestDeduplicator;
use crate::delivery::ResponseSender;
use crate::errors::ClientError;
use crate::executor::ToolExecutor;
use crate::status::{ConnectionState, ConnectionStatus, TransportKind};
use crate::transport::{PollTransport, SseTransport, Transport};

/// Builds the transport for a kind.
pub type TransportFactory = Arc<dyn Fn(TransportKind) -> Arc<dyn Transport> + Send + Sync>;

enum Signal {
    Event(StreamEvent),
    Status(ConnectionStatus),
}

/// Executes a session's tool requests and delivers the responses.
pub struct RelayClient {
    config: ClientConfig,
    api: RelayApi,
    executor: Arc<dyn ToolExecutor>,
    transports: TransportFactory,
    batcher: ResponseBatchProcessor,
}

impl RelayClient {
    /// Client over HTTP: SSE or polling in, batched POSTs out.
    pub fn new(config: ClientConfig, executor: Arc<dyn ToolExecutor>) -> Self {
        let api = RelayApi::new(config.base_url.clone());
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let sender = Arc::new(ResponseSender::new(
            api.clone(),
            config.session_code.clone(),
            limiter,
            config.delivery_retry.clone(),
        ));

        let transport_api = api.clone();
        let code = config.session_code.clone();
        let interval = config.connection.poll_interval;
        let transports: TransportFactory = Arc::new(move |kind: TransportKind| -> Arc<dyn Transport> {
            match kind {
                TransportKind::Stream => Arc::new(SseTransport::new(transport_api.clone(), code.clone())),
                TransportKind::Poll => {
                    Arc::new(PollTransport::new(transport_api.clone(), code.clone(), interval))
                }
            }
        });

        Self::with_parts(config, api, executor, transports, sender)
    }

    /// Client with explicit transports and response sink.
    pub fn with_parts(
        config: ClientConfig,
        api: RelayApi,
        executor: Arc<dyn ToolExecutor>,
        transports: TransportFactory,
        sink: Arc<dyn BatchSink>,
    ) -> Self {
        let batcher = ResponseBatchProcessor::new(config.batch.clone(), sink);
        Self {
            config,
            api,
            executor,
            transports,
            batcher,
        }
    }

    /// Resolved configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// HTTP client for direct API calls.
    pub fn api(&self) -> &RelayApi {
        &self.api
    }

    /// Batching counters.
    pub fn batch_stats(&self) -> BatchStats {
        self.batcher.stats()
    }

    /// Run until `shutdown` fires or the connection gives up for good.
    ///
    /// On shutdown the connection is closed, in-flight executions finish,
    /// and pending responses are flushed.
    #[instrument(skip_all, fields(session_code = %self.config.session_code))]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), ClientError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut dedup = RequestDeduplicator::new(self.config.dedup.clone());
        let mut manager = self.attach(self.config.transport, &tx);
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut outcome = Ok(());

        if let Err(err) = manager.connect().await {
            warn!(error = %err, "initial connect failed");
        }

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("shutdown requested");
                    break;
                }
                Some(signal) = rx.recv() => match signal {
                    Signal::Event(StreamEvent::ToolRequest(request)) => {
                        self.dispatch(&dedup, &mut tasks, request);
                    }
                    Signal::Event(StreamEvent::Connected { connection_id, .. }) => {
                        debug!(%connection_id, "attached");
                        self.publish_manifest(&mut tasks);
                    }
                    Signal::Event(StreamEvent::Heartbeat { .. })
                        if manager.transport_kind() == TransportKind::Stream =>
                    {
                        self.acknowledge(&mut tasks);
                    }
                    Signal::Event(_) => {}
                    Signal::Status(status) => {
                        if status.state != ConnectionState::Error || !manager.has_given_up() {
                            continue;
                        }
                        let err = status
                            .error
                            .unwrap_or_else(|| ConnectionError::network("connection gave up"));
                        if manager.transport_kind() == TransportKind::Stream && self.config.fallback_to_poll {
                            warn!(error = %err, "stream transport gave up, falling back to polling");
                            manager.disconnect();
                            let carried = dedup.export_state();
                            dedup = RequestDeduplicator::new(self.config.dedup.clone());
                            dedup.import_state(carried);
                            manager = self.attach(TransportKind::Poll, &tx);
                            if let Err(err) = manager.connect().await {
                                warn!(error = %err, "poll transport connect failed");
                            }
                        } else {
                            outcome = Err(ClientError::Connection(err));
                            break;
                        }
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(err) = joined {
                        warn!(error = %err, "tool task failed");
                    }
                }
            }
        }

        manager.disconnect();
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "tool task failed");
            }
        }
        if let Err(err) = self.batcher.flush().await {
            warn!(error = %err, "final flush failed");
        }
        let _ = self.batcher.dispose();
        outcome
    }

    fn attach(&self, kind: TransportKind, tx: &mpsc::UnboundedSender<Signal>) -> ConnectionManager {
        let manager = ConnectionManager::new(self.config.connection.clone(), (self.transports)(kind));
        let events = tx.clone();
        let _ = manager.on_message(Arc::new(move |event: &StreamEvent| {
            let _ = events.send(Signal::Event(event.clone()));
        }));
        let statuses = tx.clone();
        let _ = manager.on_status_change(Arc::new(move |status: &ConnectionStatus| {
            let _ = statuses.send(Signal::Status(status.clone()));
        }));
        info!(transport = %kind, "transport attached");
        manager
    }

    fn dispatch(&self, dedup: &RequestDeduplicator, tasks: &mut JoinSet<()>, request: ToolRequest) {
        if !dedup.check_and_mark(&request.id) {
            return;
        }
        let executor = Arc::clone(&self.executor);
        let batcher = self.batcher.clone();
        let _ = tasks.spawn(async move {
            debug!(request_id = %request.id, tool = %request.tool_name, "executing");
            let result = executor.execute(&request).await;
            if let Err(err) = &result {
                debug!(request_id = %request.id, error = %err, "tool failed");
            }
            let response = ToolResponse::from_result(request.id.clone(), result);
            if let Err(err) = batcher.add_response(response).await {
                warn!(error = %err, "dropping undelivered batch");
            }
        });
    }

    /// The server times out streams from client activity alone; a heartbeat
    /// answered with an ack keeps a healthy idle stream open.
    fn acknowledge(&self, tasks: &mut JoinSet<()>) {
        let api = self.api.clone();
        let code = self.config.session_code.clone();
        let _ = tasks.spawn(async move {
            if let Err(err) = api.ack(&code).await {
                debug!(error = %err, "heartbeat ack failed");
            }
        });
    }

    fn publish_manifest(&self, tasks: &mut JoinSet<()>) {
        let api = self.api.clone();
        let code = self.config.session_code.clone();
        let manifest = self.executor.manifest();
        let _ = tasks.spawn(async move {
            match api.publish_tools(&code, &manifest).await {
                Ok(()) => debug!(tools = manifest.tools.len(), "tool manifest published"),
                Err(err) => warn!(error = %err, "tool manifest publish failed"),
            }
        });
    }
}
