//! Shared fixtures for integration tests.
//!
//! `FakeGateway` scripts provider behavior per CNJ and per subscription and
//! counts every call, so tests can assert retry budgets and idempotency.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use jurisync::cnj::Cnj;
use jurisync::config::{OnboardingConfig, ProviderConfig};
use jurisync::db::{CaseRecord, CaseStore, CreateCaseParams, Database, MemoryBackend};
use jurisync::error::ProviderError;
use jurisync::lifecycle::{CaseMetadata, CaseStatus};
use jurisync::onboarding::Orchestrator;
use jurisync::provider::{
    Attachment, AttachmentOptions, FetchOptions, MonitoringFrequency, Movement, MovementPage,
    ProcessLookup, ProcessSnapshot, ProviderGateway, Summary, UpdateRequest,
};

pub const SAMPLE_CNJ: &str = "1234567-12.2023.8.09.0001";
pub const WORKSPACE: &str = "ws-test";

pub fn movement(id: &str, occurred_at: DateTime<Utc>) -> Movement {
    Movement {
        id: id.to_string(),
        occurred_at,
        content: format!("movement {id}"),
        kind: None,
    }
}

#[derive(Default)]
pub struct FakeGateway {
    /// Errors returned by `fetch_process`, front first, before succeeding.
    process_failures: Mutex<VecDeque<ProviderError>>,
    /// Every `fetch_process` fails with this error when set.
    process_error: Mutex<Option<ProviderError>>,
    /// `fetch_process` answers `Pending` this many times before the data is ready.
    pending_polls: AtomicUsize,
    movements: Mutex<Vec<Movement>>,
    movement_delay: Mutex<Duration>,
    /// Best-effort enrichment calls fail with these errors when set.
    attachments_error: Mutex<Option<ProviderError>>,
    summary_error: Mutex<Option<ProviderError>>,
    monitoring_error: Mutex<Option<ProviderError>>,
    /// Scripted failures per provider subscription id.
    tracking_failures: Mutex<HashMap<String, usize>>,
    tracking_movements: Mutex<HashMap<String, Vec<Movement>>>,
    /// How long each tracking call stays in flight.
    tracking_delay: Mutex<Duration>,
    /// Every tracking call fails transiently while set.
    outage: AtomicBool,
    tracking_in_flight: AtomicUsize,
    pub max_tracking_in_flight: AtomicUsize,
    pub process_calls: AtomicUsize,
    pub update_requests: AtomicUsize,
    pub monitoring_configured: AtomicUsize,
    tracking_calls: Mutex<HashMap<String, usize>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_movements(self, movements: Vec<Movement>) -> Self {
        if let Ok(mut m) = self.movements.lock() {
            *m = movements;
        }
        self
    }

    /// Delay every movement page, to make enrichment outlive short timeouts.
    pub fn slow_movements(&self, delay: Duration) {
        *self.movement_delay.lock().expect("lock") = delay;
    }

    pub fn fail_process_always(&self, error: ProviderError) {
        *self.process_error.lock().expect("lock") = Some(error);
    }

    pub fn fail_process_times(&self, times: usize, error: ProviderError) {
        let mut failures = self.process_failures.lock().expect("lock");
        for _ in 0..times {
            failures.push_back(error.clone());
        }
    }

    pub fn fail_attachments(&self, error: ProviderError) {
        *self.attachments_error.lock().expect("lock") = Some(error);
    }

    pub fn fail_summary(&self, error: ProviderError) {
        *self.summary_error.lock().expect("lock") = Some(error);
    }

    pub fn fail_monitoring(&self, error: ProviderError) {
        *self.monitoring_error.lock().expect("lock") = Some(error);
    }

    pub fn slow_tracking(&self, delay: Duration) {
        *self.tracking_delay.lock().expect("lock") = delay;
    }

    pub fn pending_for(&self, polls: usize) {
        self.pending_polls.store(polls, Ordering::SeqCst);
    }

    pub fn fail_tracking_times(&self, subscription_id: &str, times: usize) {
        self.tracking_failures
            .lock()
            .expect("lock")
            .insert(subscription_id.to_string(), times);
    }

    pub fn tracking_returns(&self, subscription_id: &str, movements: Vec<Movement>) {
        self.tracking_movements
            .lock()
            .expect("lock")
            .insert(subscription_id.to_string(), movements);
    }

    pub fn set_outage(&self, outage: bool) {
        self.outage.store(outage, Ordering::SeqCst);
    }

    pub fn tracking_calls(&self, subscription_id: &str) -> usize {
        self.tracking_calls
            .lock()
            .expect("lock")
            .get(subscription_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_tracking_calls(&self) -> usize {
        self.tracking_calls.lock().expect("lock").values().sum()
    }

    fn tracking_result(&self, subscription_id: &str) -> Result<Vec<Movement>, ProviderError> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(ProviderError::transient("provider outage"));
        }
        {
            let mut failures = self.tracking_failures.lock().expect("lock");
            if let Some(remaining) = failures.get_mut(subscription_id)
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(ProviderError::transient("503 Service Unavailable"));
            }
        }
        Ok(self
            .tracking_movements
            .lock()
            .expect("lock")
            .get(subscription_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ProviderGateway for FakeGateway {
    fn name(&self) -> &str {
        "fake"
    }

    async fn fetch_process(
        &self,
        cnj: &Cnj,
        _options: &FetchOptions,
    ) -> Result<ProcessLookup, ProviderError> {
        self.process_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.process_error.lock().expect("lock").clone() {
            return Err(err);
        }
        if let Some(err) = self.process_failures.lock().expect("lock").pop_front() {
            return Err(err);
        }
        if self
            .pending_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Ok(ProcessLookup::Pending);
        }
        Ok(ProcessLookup::Found(ProcessSnapshot {
            cnj: cnj.clone(),
            payload: json!({ "numero_cnj": cnj.as_str(), "tribunal": "TJGO" }),
        }))
    }

    async fn fetch_movements(
        &self,
        _cnj: &Cnj,
        _cursor: Option<&str>,
    ) -> Result<MovementPage, ProviderError> {
        let delay = *self.movement_delay.lock().expect("lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(MovementPage {
            items: self.movements.lock().expect("lock").clone(),
            next_cursor: None,
        })
    }

    async fn fetch_attachments(
        &self,
        _cnj: &Cnj,
        _options: &AttachmentOptions,
    ) -> Result<Vec<Attachment>, ProviderError> {
        if let Some(err) = self.attachments_error.lock().expect("lock").clone() {
            return Err(err);
        }
        Ok(vec![Attachment {
            id: "doc-1".to_string(),
            name: "peticao_inicial.pdf".to_string(),
            url: None,
            movement_id: None,
            pages: Some(3),
        }])
    }

    async fn request_update(
        &self,
        cnj: &Cnj,
        _options: &FetchOptions,
    ) -> Result<UpdateRequest, ProviderError> {
        self.update_requests.fetch_add(1, Ordering::SeqCst);
        Ok(UpdateRequest {
            request_id: format!("upd-{}", cnj.digits()),
        })
    }

    async fn request_summary(&self, _cnj: &Cnj) -> Result<(), ProviderError> {
        match self.summary_error.lock().expect("lock").clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn fetch_summary(&self, _cnj: &Cnj) -> Result<Option<Summary>, ProviderError> {
        Ok(Some(Summary {
            content: "Ação de cobrança em fase de instrução.".to_string(),
            generated_at: Utc::now(),
        }))
    }

    async fn configure_monitoring(
        &self,
        cnj: &Cnj,
        _frequency: MonitoringFrequency,
    ) -> Result<String, ProviderError> {
        self.monitoring_configured.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.monitoring_error.lock().expect("lock").clone() {
            return Err(err);
        }
        Ok(format!("mon-{}", cnj.digits()))
    }

    async fn fetch_tracking_updates(
        &self,
        subscription_id: &str,
        _since: DateTime<Utc>,
    ) -> Result<Vec<Movement>, ProviderError> {
        *self
            .tracking_calls
            .lock()
            .expect("lock")
            .entry(subscription_id.to_string())
            .or_default() += 1;

        let in_flight = self.tracking_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_tracking_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);
        let delay = *self.tracking_delay.lock().expect("lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let result = self.tracking_result(subscription_id);
        self.tracking_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub struct Harness {
    pub db: Arc<dyn Database>,
    pub gateway: Arc<FakeGateway>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub fn new(gateway: FakeGateway) -> Self {
        let db: Arc<dyn Database> = Arc::new(MemoryBackend::new());
        let gateway = Arc::new(gateway);
        let dyn_gateway: Arc<dyn ProviderGateway> = gateway.clone();
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&db),
            dyn_gateway,
            ProviderConfig::immediate("http://provider.invalid/"),
            OnboardingConfig::default(),
        ));
        Self {
            db,
            gateway,
            orchestrator,
        }
    }

    pub fn dyn_gateway(&self) -> Arc<dyn ProviderGateway> {
        self.gateway.clone()
    }

    pub async fn case(&self, status: CaseStatus, metadata: CaseMetadata) -> CaseRecord {
        self.case_tracking(status, Some(SAMPLE_CNJ), metadata).await
    }

    /// A case whose detected CNJ may still be unknown.
    pub async fn case_tracking(
        &self,
        status: CaseStatus,
        detected_cnj: Option<&str>,
        metadata: CaseMetadata,
    ) -> CaseRecord {
        self.db
            .create_case(&CreateCaseParams {
                workspace_id: WORKSPACE.to_string(),
                number: "Ação de cobrança".to_string(),
                detected_cnj: detected_cnj.map(str::to_string),
                status,
                metadata,
            })
            .await
            .expect("create case")
    }

    pub async fn reload(&self, case: &CaseRecord) -> CaseRecord {
        self.db
            .get_case(case.id)
            .await
            .expect("get case")
            .expect("case exists")
    }
}
