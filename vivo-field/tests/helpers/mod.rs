//! Shared fixtures for vivo-field integration tests
//!
//! The field client talks to a real vivo-server store through an in-process
//! transport, so pushes and pulls run the server's reconciliation and
//! snapshot code without HTTP.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use uuid::Uuid;
use vivo_common::models::{CssOperator, Experiment, Subject};
use vivo_common::wire::{Mutation, MutationEnvelope, MutationOutcome, ObservationInput, Snapshot};
use vivo_field::error::{Result, SyncError};
use vivo_field::{store, ConnectivityState, FieldClient, SyncTransport};
use vivo_server::db::experiments::{self, NewExperiment};
use vivo_server::db::subjects::{self, NewSubject};

/// Date the in-process server treats as today for pull windows
pub const SERVER_TODAY: (i32, u32, u32) = (2024, 2, 10);

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn ts(y: i32, m: u32, d: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, hour, 0, 0).unwrap()
}

pub fn observation(subject_id: i64, on: NaiveDate, weight: Option<f64>) -> ObservationInput {
    ObservationInput {
        subject_id,
        observation_date: on,
        weight,
        stool_score: None,
        behavior_score: None,
        notes: None,
    }
}

/// vivo-server reached by direct function calls
pub struct InProcessTransport {
    pub server: SqlitePool,
    pub fail_push: AtomicBool,
    pub fail_pull: AtomicBool,
    /// Report results under ids the client never sent
    pub foreign_ids: AtomicBool,
    pub pushes: AtomicUsize,
    /// When set, push signals the first Notify and waits on the second
    hold: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
}

impl InProcessTransport {
    pub fn new(server: SqlitePool) -> Self {
        Self {
            server,
            fail_push: AtomicBool::new(false),
            fail_pull: AtomicBool::new(false),
            foreign_ids: AtomicBool::new(false),
            pushes: AtomicUsize::new(0),
            hold: Mutex::new(None),
        }
    }

    /// Make the next pushes block; returns (entered, release)
    pub fn hold_pushes(&self) -> (Arc<Notify>, Arc<Notify>) {
        let pair = (Arc::new(Notify::new()), Arc::new(Notify::new()));
        *self.hold.lock().unwrap() = Some(pair.clone());
        pair
    }

    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncTransport for InProcessTransport {
    async fn push(&self, mutations: &[MutationEnvelope]) -> Result<Vec<MutationOutcome>> {
        self.pushes.fetch_add(1, Ordering::SeqCst);

        let hold = self.hold.lock().unwrap().clone();
        if let Some((entered, release)) = hold {
            entered.notify_one();
            release.notified().await;
        }

        if self.fail_push.load(Ordering::SeqCst) {
            return Err(SyncError::Network("connection refused".to_string()));
        }
        let mut outcomes = vivo_server::reconcile::push(&self.server, mutations).await?;
        if self.foreign_ids.load(Ordering::SeqCst) {
            for outcome in &mut outcomes {
                outcome.id = Uuid::new_v4();
            }
        }
        Ok(outcomes)
    }

    async fn pull(&self, experiment_id: i64) -> Result<Snapshot> {
        if self.fail_pull.load(Ordering::SeqCst) {
            return Err(SyncError::Status {
                status: 503,
                message: "maintenance".to_string(),
            });
        }
        let (y, m, d) = SERVER_TODAY;
        Ok(vivo_server::snapshot::load_snapshot(&self.server, experiment_id, date(y, m, d), 30).await?)
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

/// Server with one experiment and one subject, and a field client whose
/// cache holds that experiment
pub struct Harness {
    pub server: SqlitePool,
    pub transport: Arc<InProcessTransport>,
    pub connectivity: Arc<ConnectivityState>,
    pub client: FieldClient,
    pub experiment: Experiment,
    pub subject: Subject,
}

impl Harness {
    pub async fn new(online: bool) -> Self {
        let server = vivo_server::db::init_memory_pool().await.unwrap();
        let (experiment, subject) = {
            let mut conn = server.acquire().await.unwrap();
            let experiment = experiments::insert(
                &mut conn,
                &NewExperiment {
                    name: "DSS colitis".to_string(),
                    start_date: date(2024, 1, 1),
                    baseline_day_offset: 0,
                    weight_loss_endpoint_pct: Some(20.0),
                    css_endpoint_threshold: Some(7),
                    css_endpoint_operator: CssOperator::AtLeast,
                },
                Utc::now(),
            )
            .await
            .unwrap();
            let subject = subjects::insert(
                &mut conn,
                experiment.id,
                &NewSubject {
                    label: "M-07".to_string(),
                    treatment_group_id: None,
                },
            )
            .await
            .unwrap();
            (experiment, subject)
        };

        // Baseline weight of 20 on day 0
        let baseline = Mutation::CreateObservation(observation(subject.id, date(2024, 1, 1), Some(20.0)));
        let envelope = MutationEnvelope::new(Uuid::new_v4(), &baseline, ts(2024, 1, 1, 9)).unwrap();
        let results = vivo_server::reconcile::push(&server, &[envelope]).await.unwrap();
        assert!(results[0].success);

        let transport = Arc::new(InProcessTransport::new(server.clone()));
        let connectivity = Arc::new(ConnectivityState::new(true));
        let pool = store::open_in_memory().await.unwrap();
        let client = FieldClient::new(pool, transport.clone(), connectivity.clone());

        client.refresh_experiment(experiment.id).await.unwrap();
        connectivity.set_online(online);

        Self {
            server,
            transport,
            connectivity,
            client,
            experiment,
            subject,
        }
    }

    pub async fn server_subject(&self) -> Subject {
        let mut conn = self.server.acquire().await.unwrap();
        subjects::require(&mut conn, self.subject.id).await.unwrap()
    }

    pub async fn server_observation(&self, on: NaiveDate) -> Option<vivo_common::models::Observation> {
        let mut conn = self.server.acquire().await.unwrap();
        vivo_server::db::observations::find_by_natural_key(&mut conn, self.subject.id, on)
            .await
            .unwrap()
    }
}
