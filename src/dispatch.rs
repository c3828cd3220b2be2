//! Dispatch cycle engine.
//!
//! Every interval the engine sweeps a fixed list of entities. For each one
//! it fetches the pending sub-items, fetches the detail records of every
//! sub-item, and applies a remote update per detail, chaining a follow-up
//! enqueue when the update echoes data back. A failure is contained to the
//! smallest unit it touches: an entity, a sub-item, or a single detail.
//! After the sweep a secondary pass moves one batch of pending records.
//!
//! The dispatcher is the source of truth and is idempotent per sub-item,
//! so nothing is rolled back and nothing is retried within a cycle.

use opentelemetry::KeyValue;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug};
use uuid::Uuid;

use crate::remote::{DispatcherReply, RemoteCall};
use crate::sink::EventLog;
use crate::telemetry::metrics;
use crate::telemetry::spans::{record_cycle_entities, start_cycle_span};

/// Dispatcher method names used by the cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchMethods {
    /// `{empresa_id}` -> sub-item ids in `data`.
    pub fetch_sub_items: String,
    /// sub-item id -> detail records in `response`.
    pub fetch_details: String,
    /// `{parada_id, link_rastreio_pedido}` -> echoed fields in `data`.
    pub apply_update: String,
    /// Echoed update fields -> follow-up notification enqueued.
    pub follow_up: String,
    /// `{}` -> pending records in `data`.
    pub fetch_batch: String,
    /// `{itens: [...]}`.
    pub submit_batch: String,
}

impl Default for DispatchMethods {
    fn default() -> Self {
        Self {
            fetch_sub_items: "fetchSolicitacoesSemRastreio".to_string(),
            fetch_details: "fetchLinksFromAPI".to_string(),
            apply_update: "updateParadas".to_string(),
            follow_up: "enqueueNotificacaoRastreio".to_string(),
            fetch_batch: "fetchNpsPendentes".to_string(),
            submit_batch: "enviarNpsLote".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub entities: Vec<String>,
    pub interval: Duration,
    pub methods: DispatchMethods,
}

impl DispatchConfig {
    pub fn new(entities: Vec<String>, interval: Duration) -> Self {
        Self {
            entities,
            interval,
            methods: DispatchMethods::default(),
        }
    }
}

/// What happened to one entity during a cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityReport {
    pub entity: String,
    /// False when the sub-item fetch itself failed.
    pub fetched: bool,
    pub sub_items: usize,
    pub sub_item_failures: usize,
    pub updated: usize,
    pub update_failures: usize,
    /// Details without an id, never sent.
    pub skipped_details: usize,
    pub follow_ups: usize,
    pub follow_up_failures: usize,
}

/// Result of the secondary batch pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    FetchFailed,
    Empty,
    Submitted(usize),
    SubmitFailed(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub entities: Vec<EntityReport>,
    pub batch: BatchOutcome,
}

pub struct DispatchEngine {
    dispatcher: Arc<dyn RemoteCall>,
    config: DispatchConfig,
    log: EventLog,
}

/// Entity ids go out as numbers when they look like numbers.
fn entity_value(entity: &str) -> Value {
    entity
        .parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(entity.to_string()))
}

impl DispatchEngine {
    pub fn new(dispatcher: Arc<dyn RemoteCall>, config: DispatchConfig, log: EventLog) -> Self {
        Self {
            dispatcher,
            config,
            log,
        }
    }

    /// Run cycles until `shutdown` fires. A started cycle always completes.
    pub async fn run(&self, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            self.run_cycle().await;

            self.log.info(format!(
                "waiting {}s for the next dispatch cycle...",
                self.config.interval.as_secs()
            ));
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
        self.log.info("dispatch engine stopped");
    }

    /// One full sweep plus the batch pass.
    pub async fn run_cycle(&self) -> CycleReport {
        let cycle_id = Uuid::new_v4();
        let span = start_cycle_span(&cycle_id);
        record_cycle_entities(&span, self.config.entities.len());

        async {
            self.log.info("starting new dispatch cycle");

            let mut entities = Vec::with_capacity(self.config.entities.len());
            for entity in &self.config.entities {
                entities.push(self.process_entity(entity).await);
            }
            let batch = self.run_batch_pass().await;

            CycleReport {
                cycle_id,
                entities,
                batch,
            }
        }
        .instrument(span)
        .await
    }

    /// Fetch sub-items, then details, then apply one update per detail.
    pub async fn process_entity(&self, entity: &str) -> EntityReport {
        let methods = &self.config.methods;
        let mut report = EntityReport {
            entity: entity.to_string(),
            ..Default::default()
        };
        self.log.info(format!("processing entity {entity}"));

        let result = self
            .dispatcher
            .call(&methods.fetch_sub_items, &json!({ "empresa_id": entity_value(entity) }))
            .await;
        let Some(reply) = DispatcherReply::accepted(&result) else {
            self.log
                .warn(format!("failed to fetch sub-items for entity {entity}"));
            return report;
        };
        report.fetched = true;
        report.sub_items = reply.items().len();

        for sub_item in reply.items() {
            self.log.info(format!("fetching details for sub-item {sub_item}"));
            let result = self.dispatcher.call(&methods.fetch_details, sub_item).await;
            // Details only ever come back in `response`; `data` may carry
            // unrelated fields alongside it.
            let details = DispatcherReply::accepted(&result)
                .and(result.body())
                .and_then(|body| body.get("response"))
                .and_then(Value::as_array)
                .cloned();
            let Some(details) = details else {
                self.log
                    .warn(format!("failed to fetch details for sub-item {sub_item}"));
                report.sub_item_failures += 1;
                continue;
            };

            for detail in &details {
                self.apply_detail(entity, detail, &mut report).await;
            }
        }

        self.log
            .info(format!("finished processing entity {entity}"));
        report
    }

    async fn apply_detail(&self, entity: &str, detail: &Value, report: &mut EntityReport) {
        let methods = &self.config.methods;
        let Some(detail_id) = detail.get("parada_id").filter(|id| !id.is_null()) else {
            self.log
                .warn(format!("skipping detail without parada_id: {detail}"));
            report.skipped_details += 1;
            return;
        };
        let link = detail.get("link_rastreio").cloned().unwrap_or(Value::Null);

        self.log.info(format!("updating detail {detail_id}"));
        let result = self
            .dispatcher
            .call(
                &methods.apply_update,
                &json!({ "parada_id": detail_id, "link_rastreio_pedido": link }),
            )
            .await;

        let Some(reply) = DispatcherReply::accepted(&result) else {
            self.log.error(format!("failed to update detail {detail_id}"));
            report.update_failures += 1;
            self.count_update(entity, "failed");
            return;
        };
        self.log
            .info(format!("detail {detail_id} updated successfully"));
        report.updated += 1;
        self.count_update(entity, "updated");

        // Only echoed fields drive the follow-up; with none there is
        // nothing to enqueue.
        let echoed = reply
            .data
            .as_object()
            .filter(|fields| !fields.is_empty());
        let Some(echoed) = echoed else {
            debug!(%detail_id, "update echoed no data, no follow-up");
            return;
        };

        let result = self
            .dispatcher
            .call(&methods.follow_up, &Value::Object(echoed.clone()))
            .await;
        if DispatcherReply::accepted(&result).is_some() {
            report.follow_ups += 1;
            self.log
                .info(format!("follow-up enqueued for detail {detail_id}"));
        } else {
            report.follow_up_failures += 1;
            self.log
                .warn(format!("follow-up failed for detail {detail_id}"));
        }
    }

    fn count_update(&self, entity: &str, outcome: &'static str) {
        metrics::dispatch_updates().add(
            1,
            &[
                KeyValue::new("entity", entity.to_string()),
                KeyValue::new("outcome", outcome),
            ],
        );
    }

    /// Fetch pending records and submit them in one call.
    pub async fn run_batch_pass(&self) -> BatchOutcome {
        let methods = &self.config.methods;
        let result = self.dispatcher.call(&methods.fetch_batch, &json!({})).await;
        let Some(reply) = DispatcherReply::accepted(&result) else {
            self.log.warn("failed to fetch pending batch");
            return BatchOutcome::FetchFailed;
        };

        let items = reply.items();
        if items.is_empty() {
            debug!("no pending batch records");
            return BatchOutcome::Empty;
        }

        let count = items.len();
        let result = self
            .dispatcher
            .call(&methods.submit_batch, &json!({ "itens": items }))
            .await;
        if DispatcherReply::accepted(&result).is_some() {
            self.log
                .info(format!("batch of {count} records submitted"));
            BatchOutcome::Submitted(count)
        } else {
            self.log
                .error(format!("failed to submit batch of {count} records"));
            BatchOutcome::SubmitFailed(count)
        }
    }
}
