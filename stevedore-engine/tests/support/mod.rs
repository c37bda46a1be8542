//! Test doubles shared by the integration tests: a scripted in-memory
//! transport and a mutable metadata provider.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use stevedore_core::{OperationResult, PartitionKey, RangeId, StatusCode, SubStatus};
use stevedore_engine::codec;
use stevedore_engine::routing::effective_hash;
use stevedore_engine::{
    BatchRequest, BatchTransport, CancelToken, EngineResult, MetadataProvider,
    PartitionKeyDefinition, ResponseMessage, RoutingMap, TransportError,
};

/// Installs a test subscriber so engine traces show up with
/// `cargo test -- --nocapture`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// One recorded transport call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub range_id: RangeId,
    pub item_ids: Vec<String>,
}

/// Scripted per-item failure, served a fixed number of times.
#[derive(Debug, Clone, Copy)]
pub struct ScriptedFailure {
    pub status: StatusCode,
    pub sub_status: SubStatus,
    pub retry_after: Option<Duration>,
}

impl ScriptedFailure {
    pub fn throttled(retry_after: Duration) -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            sub_status: SubStatus::NONE,
            retry_after: Some(retry_after),
        }
    }

    pub fn range_gone() -> Self {
        Self {
            status: StatusCode::GONE,
            sub_status: SubStatus::PARTITION_KEY_RANGE_GONE,
            retry_after: None,
        }
    }
}

/// In-memory transport answering from a per-item failure script; everything
/// else succeeds with 201 Created.
pub struct ScriptedTransport {
    calls: Mutex<Vec<RecordedCall>>,
    failures: Mutex<HashMap<String, (ScriptedFailure, u32)>>,
    batch_failures: Mutex<Option<(ScriptedFailure, u32)>>,
    connection_failures: AtomicU64,
    latency: Duration,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// Simulates backend latency: every call takes `latency` of (virtual)
    /// time, which drives the congestion controller's backend clock.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            batch_failures: Mutex::new(None),
            connection_failures: AtomicU64::new(0),
            latency,
        }
    }

    /// Serves `failure` for `item_id` on its next `times` appearances.
    pub fn fail_item(&self, item_id: &str, failure: ScriptedFailure, times: u32) {
        self.failures
            .lock()
            .unwrap()
            .insert(item_id.to_string(), (failure, times));
    }

    /// Fails the next `times` whole requests with a connection error.
    pub fn fail_connections(&self, times: u64) {
        self.connection_failures.store(times, Ordering::SeqCst);
    }

    /// Answers the next `times` requests with a batch-level failure and an
    /// empty per-operation result list.
    pub fn fail_batches(&self, failure: ScriptedFailure, times: u32) {
        *self.batch_failures.lock().unwrap() = Some((failure, times));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|call| call.item_ids.len())
            .collect()
    }
}

#[async_trait]
impl BatchTransport for ScriptedTransport {
    async fn execute(
        &self,
        request: BatchRequest,
        cancel: CancelToken,
    ) -> Result<ResponseMessage, TransportError> {
        if !self.latency.is_zero() {
            tokio::select! {
                () = tokio::time::sleep(self.latency) => {}
                () = cancel.cancelled() => return Err(TransportError::Cancelled),
            }
        }
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        if self
            .connection_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::Connection {
                message: "connection reset".to_string(),
            });
        }

        let ops = codec::decode_batch_body(request.body.clone()).expect("malformed request body");
        self.calls.lock().unwrap().push(RecordedCall {
            range_id: request.range_id,
            item_ids: ops.iter().map(|op| op.item_id.clone()).collect(),
        });

        {
            let mut batch_failures = self.batch_failures.lock().unwrap();
            if let Some((failure, remaining)) = batch_failures.as_mut() {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Ok(ResponseMessage {
                        status: failure.status,
                        sub_status: failure.sub_status,
                        retry_after: failure.retry_after,
                        request_charge: 0.0,
                        body: codec::encode_batch_results(&[]),
                    });
                }
            }
        }

        let results: Vec<OperationResult> = ops
            .iter()
            .map(|op| {
                let mut failures = self.failures.lock().unwrap();
                if let Some((failure, remaining)) = failures.get_mut(&op.item_id) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        let mut result = OperationResult::with_status(failure.status)
                            .with_sub_status(failure.sub_status);
                        result.retry_after = failure.retry_after;
                        return result;
                    }
                }
                OperationResult {
                    status: StatusCode::CREATED,
                    sub_status: SubStatus::NONE,
                    etag: Some(format!("\"{}-v1\"", op.item_id)),
                    body: op.body.clone(),
                    retry_after: None,
                    request_charge: 1.0,
                }
            })
            .collect();

        Ok(ResponseMessage {
            status: StatusCode::OK,
            sub_status: SubStatus::NONE,
            retry_after: None,
            request_charge: results.iter().map(|r| r.request_charge).sum(),
            body: codec::encode_batch_results(&results),
        })
    }
}

/// Metadata provider backed by a swappable routing map.
pub struct TestMetadata {
    definition: PartitionKeyDefinition,
    map: Mutex<Arc<RoutingMap>>,
    staged: Mutex<Option<Arc<RoutingMap>>>,
    refreshes: AtomicU64,
}

impl TestMetadata {
    pub fn new(map: RoutingMap) -> Self {
        Self {
            definition: PartitionKeyDefinition::default(),
            map: Mutex::new(Arc::new(map)),
            staged: Mutex::new(None),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Stages a map to install on the next forced refresh, the way a
    /// split becomes visible only after the routing cache is invalidated.
    pub fn stage_refresh(&self, map: RoutingMap) {
        *self.staged.lock().unwrap() = Some(Arc::new(map));
    }

    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn definition(&self) -> PartitionKeyDefinition {
        self.definition.clone()
    }

    pub fn current_map(&self) -> Arc<RoutingMap> {
        Arc::clone(&self.map.lock().unwrap())
    }
}

#[async_trait]
impl MetadataProvider for TestMetadata {
    async fn partition_key_definition(
        &self,
        _cancel: &CancelToken,
    ) -> EngineResult<PartitionKeyDefinition> {
        Ok(self.definition.clone())
    }

    async fn routing_map(&self, _cancel: &CancelToken) -> EngineResult<Arc<RoutingMap>> {
        Ok(self.current_map())
    }

    async fn refresh_routing_map(&self, _cancel: &CancelToken) -> EngineResult<Arc<RoutingMap>> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if let Some(staged) = self.staged.lock().unwrap().take() {
            *self.map.lock().unwrap() = staged;
        }
        Ok(self.current_map())
    }

    async fn none_partition_key(&self, _cancel: &CancelToken) -> EngineResult<PartitionKey> {
        Ok(PartitionKey::None)
    }
}

/// Finds a text partition key routed to `target` under `map`.
pub fn key_for_range(
    map: &RoutingMap,
    definition: &PartitionKeyDefinition,
    target: RangeId,
) -> PartitionKey {
    for i in 0..100_000 {
        let key = PartitionKey::Text(format!("probe-{i}"));
        if map.range_of(effective_hash(&key, definition)) == Some(target) {
            return key;
        }
    }
    panic!("no key found for {target}");
}
