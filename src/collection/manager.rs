//! Per-collection query façade

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{AccessPolicy, AccessRights, Authorizer, StaticAuthorizer};
use crate::classifier::{CacheKey, DetectorInput, FastQueryCache, IndexedFieldsDetector, SlowDetector};
use crate::config::QueryConfig;
use crate::observability::{Event, MetricsRegistry};
use crate::query::{
    AggregationRequest, CompiledQuery, JoinSource, NoJoins, QueryBuilder, QueryRequest,
    QueryResult,
};
use crate::realtime::{
    ChangeBus, ChannelDelivery, DocumentStream, PushDelivery, SubscriptionHandle, WaitFor,
    WaitOutcome, WaitReason,
};
use crate::schema::SchemaTable;
use crate::store::{DocumentStore, StoreQuery};

use super::live::{QueryMatcher, QueryPoll};

/// Result of `Collection::explain`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Explain {
    pub collection: String,
    pub text: String,
    pub params: Value,
    pub fast: bool,
    pub unsatisfiable: bool,
    pub sort: Option<String>,
    pub limit: usize,
    /// Operators applied per filter path
    pub operators: BTreeMap<String, BTreeSet<String>>,
}

pub(crate) struct CollectionInner {
    pub(crate) name: String,
    pub(crate) builder: QueryBuilder,
    pub(crate) fast_store: Arc<dyn DocumentStore>,
    pub(crate) slow_store: Arc<dyn DocumentStore>,
    pub(crate) joins: Arc<dyn JoinSource>,
    pub(crate) detector: Arc<dyn SlowDetector>,
    pub(crate) authorizer: Arc<dyn Authorizer>,
    pub(crate) policy: AccessPolicy,
    pub(crate) cache: FastQueryCache,
    pub(crate) bus: ChangeBus,
    pub(crate) metrics: Arc<MetricsRegistry>,
}

/// Builds a `Collection`; every collaborator except the store has a default
pub struct CollectionBuilder {
    schema: Arc<SchemaTable>,
    name: String,
    config: QueryConfig,
    fast_store: Arc<dyn DocumentStore>,
    slow_store: Option<Arc<dyn DocumentStore>>,
    joins: Arc<dyn JoinSource>,
    detector: Arc<dyn SlowDetector>,
    authorizer: Arc<dyn Authorizer>,
    policy: AccessPolicy,
    metrics: Arc<MetricsRegistry>,
}

impl CollectionBuilder {
    pub fn with_config(mut self, config: QueryConfig) -> Self {
        self.config = config;
        self
    }

    /// Connection for queries that need a full scan; defaults to the fast one
    pub fn with_slow_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.slow_store = Some(store);
        self
    }

    /// Documents used to resolve joins for announced documents
    pub fn with_join_source(mut self, joins: Arc<dyn JoinSource>) -> Self {
        self.joins = joins;
        self
    }

    pub fn with_detector(mut self, detector: Arc<dyn SlowDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn with_policy(mut self, policy: AccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> QueryResult<Collection> {
        let cache = FastQueryCache::new(self.config.index_refresh_interval());
        let builder = QueryBuilder::new(self.schema, self.name.clone(), self.config)?;
        let counter = Arc::clone(&self.metrics);
        let bus = ChangeBus::with_hook(Arc::new(move |_: &Value| counter.increment_documents_ingested()));
        Ok(Collection {
            inner: Arc::new(CollectionInner {
                name: self.name,
                builder,
                slow_store: self
                    .slow_store
                    .unwrap_or_else(|| Arc::clone(&self.fast_store)),
                fast_store: self.fast_store,
                joins: self.joins,
                detector: self.detector,
                authorizer: self.authorizer,
                policy: self.policy,
                cache,
                bus,
                metrics: self.metrics,
            }),
        })
    }
}

/// Query surface of one document collection
#[derive(Clone)]
pub struct Collection {
    inner: Arc<CollectionInner>,
}

/// Keeps the in-flight gauge accurate even if the session is dropped
struct SessionGauge(Arc<MetricsRegistry>);

impl SessionGauge {
    fn start(metrics: &Arc<MetricsRegistry>) -> Self {
        metrics.wait_for_started();
        Self(Arc::clone(metrics))
    }
}

impl Drop for SessionGauge {
    fn drop(&mut self) {
        self.0.wait_for_finished();
    }
}

impl Collection {
    pub fn builder(
        schema: Arc<SchemaTable>,
        name: impl Into<String>,
        store: Arc<dyn DocumentStore>,
    ) -> CollectionBuilder {
        CollectionBuilder {
            schema,
            name: name.into(),
            config: QueryConfig::default(),
            fast_store: store,
            slow_store: None,
            joins: Arc::new(NoJoins),
            detector: Arc::new(IndexedFieldsDetector),
            authorizer: Arc::new(StaticAuthorizer::new(AccessRights::unrestricted())),
            policy: AccessPolicy::default(),
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    pub fn new(
        schema: Arc<SchemaTable>,
        name: impl Into<String>,
        config: QueryConfig,
        store: Arc<dyn DocumentStore>,
    ) -> QueryResult<Self> {
        Self::builder(schema, name, store).with_config(config).build()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn schema(&self) -> &Arc<SchemaTable> {
        self.inner.builder.schema()
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.inner.metrics
    }

    pub fn bus(&self) -> &ChangeBus {
        &self.inner.bus
    }

    /// Number of cached fast/slow verdicts
    pub fn cached_verdicts(&self) -> usize {
        self.inner.cache.len()
    }

    /// Runs a query. A positive timeout waits for a match through a
    /// wait-for session that is never closed early.
    pub async fn query(&self, request: &QueryRequest) -> QueryResult<Vec<Value>> {
        let timeout = request
            .timeout_ms
            .unwrap_or(self.inner.builder.config().default_wait_timeout_ms);
        if timeout > 0 {
            return Ok(self.wait_for(request, CancellationToken::new()).await?.rows);
        }
        let compiled = self.inner.compile(request, false).await?;
        if compiled.unsatisfiable {
            self.inner.short_circuit(&compiled.operation_id);
            return Ok(Vec::new());
        }
        let fast = self.inner.classify_query(&compiled).await?;
        self.inner.run_select(&compiled, fast).await
    }

    /// Waits until a document matches, the timeout expires or `close` fires.
    pub async fn wait_for(
        &self,
        request: &QueryRequest,
        close: CancellationToken,
    ) -> QueryResult<WaitOutcome> {
        let inner = &self.inner;
        let compiled = inner.compile(request, false).await?;
        if compiled.unsatisfiable {
            inner.short_circuit(&compiled.operation_id);
            return Ok(WaitOutcome::empty(WaitReason::Query));
        }
        let fast = inner.classify_query(&compiled).await?;
        let query = Arc::new(compiled);

        let _gauge = SessionGauge::start(&inner.metrics);
        info!(
            event = %Event::WaitForStarted,
            collection = %inner.name,
            operation_id = %query.operation_id,
            timeout_ms = query.timeout_ms,
        );
        let session = WaitFor::new(
            Arc::new(QueryPoll {
                inner: Arc::clone(inner),
                query: Arc::clone(&query),
                fast,
            }),
            Arc::new(QueryMatcher {
                inner: Arc::clone(inner),
                query: Arc::clone(&query),
            }),
            inner.bus.clone(),
        )
        .with_retry_delay(inner.builder.config().poll_retry_delay())
        .with_timeout(Duration::from_millis(query.timeout_ms))
        .with_close(close)
        .with_operation_id(query.operation_id.clone());

        let result = session.run().await;
        match &result {
            Ok(outcome) => {
                inner.metrics.record_resolution(outcome.reason);
                info!(
                    event = %Event::WaitForResolved,
                    collection = %inner.name,
                    operation_id = %query.operation_id,
                    reason = %outcome.reason,
                    rows = outcome.rows.len(),
                );
            }
            Err(e) => warn!(
                event = %Event::QueryFailed,
                collection = %inner.name,
                operation_id = %query.operation_id,
                error = %e,
            ),
        }
        result
    }

    /// Computes the requested aggregates over the filtered documents.
    pub async fn aggregate(&self, request: &AggregationRequest) -> QueryResult<Vec<Value>> {
        let inner = &self.inner;
        let rights = inner
            .authorizer
            .access_rights(request.access_key.as_deref())
            .await?;
        let compiled = inner
            .builder
            .compile_aggregate(request, &rights, &inner.policy)?;
        debug!(event = %Event::QueryCompiled, collection = %inner.name, text = %compiled.text);
        if compiled.unsatisfiable {
            inner.short_circuit("aggregate");
            return Ok(compiled.empty_result());
        }

        let mut fast = compiled.probes.is_some();
        for probe in compiled.probes.iter().flatten() {
            if !inner
                .is_fast(
                    &compiled.scan_text,
                    &compiled.filter,
                    probe.sort_text.as_deref(),
                    &probe.sort_fields,
                )
                .await?
            {
                fast = false;
                break;
            }
        }

        let rows = inner
            .execute(
                &StoreQuery {
                    text: &compiled.text,
                    params: &compiled.params,
                    program: &compiled.program,
                },
                fast,
                "aggregate",
            )
            .await?;
        compiled.render(rows)
    }

    /// Pushes every future matching document to `delivery`.
    pub async fn subscribe(
        &self,
        request: &QueryRequest,
        delivery: Arc<dyn PushDelivery>,
    ) -> QueryResult<SubscriptionHandle> {
        let inner = &self.inner;
        let compiled = Arc::new(inner.compile(request, false).await?);
        let listener = inner.bus.listen();
        inner.metrics.subscription_started();
        info!(
            event = %Event::SubscriptionStarted,
            collection = %inner.name,
            operation_id = %compiled.operation_id,
        );

        let metrics = Arc::clone(&inner.metrics);
        let name = inner.name.clone();
        let operation_id = compiled.operation_id.clone();
        Ok(SubscriptionHandle::spawn(
            listener,
            Arc::new(QueryMatcher {
                inner: Arc::clone(inner),
                query: compiled,
            }),
            delivery,
            move || {
                metrics.subscription_stopped();
                info!(
                    event = %Event::SubscriptionStopped,
                    collection = %name,
                    operation_id = %operation_id,
                );
            },
        ))
    }

    /// `subscribe` delivering into a stream.
    pub async fn subscribe_stream(
        &self,
        request: &QueryRequest,
    ) -> QueryResult<(SubscriptionHandle, DocumentStream)> {
        let (delivery, stream) = ChannelDelivery::new();
        let handle = self.subscribe(request, Arc::new(delivery)).await?;
        Ok((handle, stream))
    }

    /// Compiles a request and reports how it would run.
    pub async fn explain(&self, request: &QueryRequest) -> QueryResult<Explain> {
        let compiled = self.inner.compile(request, true).await?;
        let fast = if compiled.unsatisfiable {
            false
        } else {
            self.inner.classify_query(&compiled).await?
        };
        Ok(Explain {
            collection: compiled.collection.clone(),
            params: compiled.params.to_json(),
            fast,
            unsatisfiable: compiled.unsatisfiable,
            sort: compiled.sort_text.clone(),
            limit: compiled.limit,
            operators: compiled.params.explanation().cloned().unwrap_or_default(),
            text: compiled.text,
        })
    }

    /// Re-reads the store's index list now. Returns whether it changed, in
    /// which case every cached verdict was dropped.
    pub async fn refresh_index_info(&self) -> QueryResult<bool> {
        self.inner.refresh_index_info().await
    }

    /// Fast/slow verdict for a query text and sort, served from the cache
    /// when possible.
    pub async fn is_fast_query(
        &self,
        text: &str,
        filter: &Value,
        sort: Option<&str>,
        sort_fields: &[String],
    ) -> QueryResult<bool> {
        self.inner.is_fast(text, filter, sort, sort_fields).await
    }

    /// Announces an inserted or updated document to live queries and
    /// subscriptions. Returns the number of listeners reached.
    pub fn ingest(&self, doc: Value) -> usize {
        let listeners = self.inner.bus.publish(doc);
        debug!(event = %Event::DocumentIngested, collection = %self.inner.name, listeners);
        listeners
    }
}

impl CollectionInner {
    pub(crate) async fn compile(
        &self,
        request: &QueryRequest,
        explain: bool,
    ) -> QueryResult<CompiledQuery> {
        let rights = self
            .authorizer
            .access_rights(request.access_key.as_deref())
            .await?;
        let compiled = self.builder.compile(request, &rights, &self.policy, explain)?;
        debug!(
            event = %Event::QueryCompiled,
            collection = %self.name,
            operation_id = %compiled.operation_id,
            text = %compiled.text,
            params = compiled.params.len(),
        );
        Ok(compiled)
    }

    fn short_circuit(&self, operation_id: &str) {
        self.metrics.increment_short_circuited();
        debug!(
            event = %Event::QueryShortCircuited,
            collection = %self.name,
            operation_id = %operation_id,
        );
    }

    async fn classify_query(&self, query: &CompiledQuery) -> QueryResult<bool> {
        self.is_fast(
            &query.text,
            &query.filter,
            query.sort_text.as_deref(),
            &query.sort_fields,
        )
        .await
    }

    /// Executes a select on its routed connection and renders the rows.
    pub(crate) async fn run_select(
        &self,
        query: &CompiledQuery,
        fast: bool,
    ) -> QueryResult<Vec<Value>> {
        let rows = self
            .execute(
                &StoreQuery {
                    text: &query.text,
                    params: &query.params,
                    program: &query.program,
                },
                fast,
                &query.operation_id,
            )
            .await?;
        query.render_rows(self.builder.schema(), rows)
    }

    async fn execute(
        &self,
        query: &StoreQuery<'_>,
        fast: bool,
        operation_id: &str,
    ) -> QueryResult<Vec<Value>> {
        let store = if fast {
            &self.fast_store
        } else {
            &self.slow_store
        };
        self.metrics.record_route(fast);
        match store.query(query).await {
            Ok(rows) => {
                self.metrics.increment_queries_executed();
                debug!(
                    event = %Event::QueryExecuted,
                    collection = %self.name,
                    operation_id = %operation_id,
                    fast,
                    rows = rows.len(),
                );
                Ok(rows)
            }
            Err(e) => {
                self.metrics.increment_queries_failed();
                warn!(
                    event = %Event::QueryFailed,
                    collection = %self.name,
                    operation_id = %operation_id,
                    code = e.code(),
                    error = %e,
                );
                Err(e.into())
            }
        }
    }

    async fn refresh_index_info(&self) -> QueryResult<bool> {
        let indexes = self.fast_store.indexes(&self.name).await?;
        let count = indexes.len();
        let changed = self.cache.apply_indexes(indexes, Instant::now());
        self.metrics.increment_index_refreshes();
        debug!(event = %Event::IndexInfoRefreshed, collection = %self.name, indexes = count, changed);
        if changed {
            self.metrics.increment_cache_evictions();
            info!(event = %Event::ClassifierCacheEvicted, collection = %self.name, indexes = count);
        }
        Ok(changed)
    }

    pub(crate) async fn is_fast(
        &self,
        text: &str,
        filter: &Value,
        sort: Option<&str>,
        sort_fields: &[String],
    ) -> QueryResult<bool> {
        if self.cache.needs_refresh(Instant::now()) {
            if let Err(e) = self.refresh_index_info().await {
                warn!(collection = %self.name, error = %e, "index refresh failed, keeping known indexes");
            }
        }

        let key = CacheKey::new(text, sort);
        if let Some(fast) = self.cache.lookup(&key) {
            self.metrics.increment_cache_hits();
            debug!(event = %Event::ClassifierCacheHit, collection = %self.name, fast);
            return Ok(fast);
        }

        let indexes = self.cache.indexes();
        let fast = self.detector.is_fast(&DetectorInput {
            collection: &self.name,
            text,
            filter,
            sort_fields,
            indexes: &indexes,
        });
        self.cache.insert(key, fast);
        self.metrics.increment_cache_misses();
        debug!(event = %Event::ClassifierCacheMiss, collection = %self.name, fast);
        Ok(fast)
    }
}
