//! Durable queue and local cache tests

mod helpers;

use helpers::*;
use vivo_common::wire::{Mutation, ObservationInput, SampleInput, SamplesBatch};
use vivo_field::queue::QueuedMutation;
use vivo_field::{store, LocalCache, MutationQueue, SubmitOutcome, SyncTransport};

#[tokio::test]
async fn test_queue_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("device.db");

    let mutation = Mutation::CreateObservation(observation(7, date(2024, 2, 1), Some(18.0)));
    let item = {
        let pool = store::open(&path).await.unwrap();
        let item = MutationQueue::new(pool.clone()).enqueue(&mutation, 3).await.unwrap();
        pool.close().await;
        item
    };

    let pool = store::open(&path).await.unwrap();
    let pending = MutationQueue::new(pool).drain().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, item.id);
    assert_eq!(pending[0].experiment_id, 3);
    assert_eq!(pending[0].client_timestamp, item.client_timestamp);
    assert_eq!(pending[0].mutation().unwrap(), mutation);
}

#[tokio::test]
async fn test_drain_orders_by_client_timestamp() {
    let pool = store::open_in_memory().await.unwrap();
    let queue = MutationQueue::new(pool);

    let later = QueuedMutation::with_identity(
        uuid::Uuid::new_v4(),
        ts(2024, 2, 1, 15),
        &Mutation::CreateObservation(observation(7, date(2024, 2, 1), Some(18.0))),
        1,
    )
    .unwrap();
    let earlier = QueuedMutation::with_identity(
        uuid::Uuid::new_v4(),
        ts(2024, 2, 1, 9),
        &Mutation::CreateObservation(observation(8, date(2024, 2, 1), Some(21.0))),
        1,
    )
    .unwrap();

    queue.insert(&later).await.unwrap();
    queue.insert(&earlier).await.unwrap();
    // Re-inserting an id is a no-op
    queue.insert(&earlier).await.unwrap();

    let ids: Vec<_> = queue.drain().await.unwrap().into_iter().map(|q| q.id).collect();
    assert_eq!(ids, vec![earlier.id, later.id]);

    assert_eq!(queue.remove(&[earlier.id]).await.unwrap(), 1);
    assert_eq!(queue.len().await.unwrap(), 1);
}

#[tokio::test]
async fn test_enqueue_rejects_invalid_mutation() {
    let pool = store::open_in_memory().await.unwrap();
    let queue = MutationQueue::new(pool);

    let empty = Mutation::CreateSamplesBatch(SamplesBatch { samples: vec![] });
    assert!(queue.enqueue(&empty, 1).await.is_err());
    assert!(queue.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_offline_write_is_all_or_nothing() {
    let h = Harness::new(true).await;
    let snapshot = h.transport.pull(h.experiment.id).await.unwrap();

    let pool = store::open_in_memory().await.unwrap();
    let cache = LocalCache::new(pool.clone());
    let queue = MutationQueue::new(pool.clone());
    cache.replace_snapshot(&snapshot).await.unwrap();

    sqlx::query("DROP TABLE observations").execute(&pool).await.unwrap();

    let item = QueuedMutation::new(
        &Mutation::CreateObservation(observation(h.subject.id, date(2024, 2, 1), Some(18.0))),
        h.experiment.id,
    )
    .unwrap();
    assert!(queue.record_offline_write(&item).await.is_err());
    assert!(queue.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_pull_keeps_pending_writes_visible() {
    let h = Harness::new(false).await;

    h.client
        .submit(Mutation::CreateObservation(observation(h.subject.id, date(2024, 2, 6), Some(19.0))))
        .await
        .unwrap();
    h.client
        .submit(Mutation::CreateSamplesBatch(SamplesBatch {
            samples: vec![SampleInput {
                subject_id: h.subject.id,
                sample_type: "colon".to_string(),
                collection_date: date(2024, 2, 6),
                storage_location: Some("freezer B".to_string()),
                notes: None,
            }],
        }))
        .await
        .unwrap();

    h.client.refresh_experiment(h.experiment.id).await.unwrap();

    let observations = h.client.cache().observations_for_subject(h.subject.id).await.unwrap();
    let pending = observations
        .iter()
        .find(|o| o.observation_date == date(2024, 2, 6))
        .unwrap();
    assert!(pending.id < 0);
    assert_eq!(pending.derived.day_of_study, 36);
    assert_eq!(pending.derived.weight_pct_change, Some(-5.0));

    let samples = h.client.cache().samples(h.experiment.id).await.unwrap();
    assert_eq!(samples.len(), 1);
    assert!(samples[0].id < 0);
    assert_eq!(samples[0].day_of_study, 36);

    assert_eq!(h.client.queue().len().await.unwrap(), 2);
}

#[tokio::test]
async fn test_offline_baseline_rederives_earlier_entries() {
    let h = Harness::new(true).await;
    let subject = {
        let mut conn = h.server.acquire().await.unwrap();
        vivo_server::db::subjects::insert(
            &mut conn,
            h.experiment.id,
            &vivo_server::db::subjects::NewSubject {
                label: "M-08".to_string(),
                treatment_group_id: None,
            },
        )
        .await
        .unwrap()
    };
    h.client.refresh_experiment(h.experiment.id).await.unwrap();
    h.connectivity.set_online(false);

    // Day 4 is entered before the baseline day
    let day4 = ObservationInput {
        stool_score: Some(2),
        behavior_score: Some(1),
        ..observation(subject.id, date(2024, 1, 5), Some(17.0))
    };
    h.client.submit(Mutation::CreateObservation(day4)).await.unwrap();

    let cached = h.client.cache().observations_for_subject(subject.id).await.unwrap();
    assert_eq!(cached[0].derived.weight_pct_change, None);
    assert_eq!(cached[0].derived.total_css, None);

    h.client
        .submit(Mutation::CreateObservation(observation(subject.id, date(2024, 1, 1), Some(20.0))))
        .await
        .unwrap();

    let cached_subject = h.client.cache().subject(subject.id).await.unwrap().unwrap();
    assert_eq!(cached_subject.baseline_weight, Some(20.0));

    let cached = h.client.cache().observations_for_subject(subject.id).await.unwrap();
    let day4 = cached.iter().find(|o| o.observation_date == date(2024, 1, 5)).unwrap();
    assert_eq!(day4.derived.day_of_study, 4);
    assert_eq!(day4.derived.weight_pct_change, Some(-15.0));
    assert_eq!(day4.derived.weight_score, Some(4));
    assert_eq!(day4.derived.total_css, Some(7));
    assert_eq!(h.client.queue().len().await.unwrap(), 2);
}

#[tokio::test]
async fn test_discard_removes_only_queued_items() {
    let h = Harness::new(false).await;

    let id = match h
        .client
        .submit(Mutation::CreateObservation(observation(h.subject.id, date(2024, 2, 6), Some(19.0))))
        .await
        .unwrap()
    {
        SubmitOutcome::Queued(id) => id,
        other => panic!("expected queued, got {:?}", other),
    };

    assert!(h.client.discard(id).await.unwrap());
    assert!(!h.client.discard(id).await.unwrap());
    assert!(h.client.queue().is_empty().await.unwrap());
}

#[tokio::test]
async fn test_cache_reads_snapshot_collections() {
    let h = Harness::new(true).await;

    let experiment = h.client.cache().experiment(h.experiment.id).await.unwrap().unwrap();
    assert_eq!(experiment, h.experiment);
    assert_eq!(h.client.cache().experiments().await.unwrap().len(), 1);

    let subjects = h.client.cache().subjects(h.experiment.id).await.unwrap();
    assert_eq!(subjects.len(), 1);
    assert_eq!(subjects[0].baseline_weight, Some(20.0));
    assert!(h.client.cache().treatment_groups(h.experiment.id).await.unwrap().is_empty());

    // The day-0 observation is older than the pull window
    assert!(h
        .client
        .cache()
        .observations_for_experiment(h.experiment.id)
        .await
        .unwrap()
        .is_empty());

    let status = h.client.status().await.unwrap();
    assert_eq!(status.experiments.len(), 1);
    assert_eq!(status.pending, 0);
    assert_eq!(status.conflicts_logged, 0);
}
