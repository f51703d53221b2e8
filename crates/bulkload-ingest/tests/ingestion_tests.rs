//! End-to-end ingestion runs against the in-memory store
//!
//! Covers:
//! 1. Ordering: records resolve rows committed by the same run
//! 2. Uniqueness within a batch, against the store, and across concurrent runs
//! 3. Atomicity of the records batch
//! 4. Isolation of dataset-level failures, including a panicking pipeline
//! 5. A run abandoned by its caller still completes in order

mod helpers;

use std::sync::Arc;
use std::time::{Duration, Instant};

use bulkload_ingest::model::{CatalogItem, DatasetKind, Entity};
use bulkload_ingest::{
    CoordinatorError, DuplicateGuard, IngestionCoordinator, InputFile, MemoryStore, Report, Store, UploadSet,
};
use helpers::{coordinator, init_tracing, uploads, Faults, FaultyStore};

const ENTITIES: &str = "id,name,email\nu1,Ann,a@x.com\nu2,Bob,b@x.com\n";
const ITEMS: &str = "id,name,price\np1,Pen,1.50\np2,Cup,4\n";
const RECORDS: &str = "id,entity_ref,item_ref,quantity\nr1,u1,p1,2\nr2,u2,p2,1\nr3,u1,p2,5\n";

#[tokio::test]
async fn test_failure_scenario_report() {
    init_tracing();
    let store = MemoryStore::new();

    let report = coordinator(Arc::new(store.clone()))
        .run(uploads(
            "id,name,email\nu1,Ann,a@x.com\nu1,Bob,b@x.com\n",
            "id,name,price\np1,Pen,-1\n",
            "id,entityRef,itemRef,quantity\nr1,u1,p1,2\n",
        ))
        .await
        .unwrap();

    assert_eq!(report.entities_created, 1);
    assert_eq!(report.entities_errors, vec!["skipping duplicate id u1".to_string()]);
    assert_eq!(store.entity("u1").unwrap().name, "Ann");

    assert_eq!(report.items_created, 0);
    assert_eq!(report.items_errors.len(), 1);
    assert!(report.items_errors[0].contains("p1"));
    assert!(report.items_errors[0].contains("price"));

    assert_eq!(report.records_created, 0);
    assert_eq!(report.records_errors, vec!["record r1: item p1 does not exist".to_string()]);
}

#[tokio::test]
async fn test_records_see_rows_from_the_same_run() {
    init_tracing();
    let store = MemoryStore::new();

    let report = coordinator(Arc::new(store.clone()))
        .run(uploads(ENTITIES, ITEMS, RECORDS))
        .await
        .unwrap();

    assert_eq!(report.total_errors(), 0, "{report:?}");
    assert_eq!((report.entities_created, report.items_created, report.records_created), (2, 2, 3));

    let counts = store.counts().await.unwrap();
    assert_eq!((counts.entities, counts.items, counts.records), (2, 2, 3));
    assert_eq!(store.record("r3").unwrap().item_ref, "p2");
}

#[tokio::test]
async fn test_rerun_rejects_every_row_as_duplicate() {
    let store = MemoryStore::new();
    let coordinator = coordinator(Arc::new(store.clone()));

    coordinator.run(uploads(ENTITIES, ITEMS, RECORDS)).await.unwrap();
    let second = coordinator.run(uploads(ENTITIES, ITEMS, RECORDS)).await.unwrap();

    assert_eq!(second.total_created(), 0);
    assert_eq!(second.entities_errors.len(), 2);
    assert_eq!(second.items_errors.len(), 2);
    assert_eq!(
        second.records_errors,
        vec![
            "skipping duplicate id r1".to_string(),
            "skipping duplicate id r2".to_string(),
            "skipping duplicate id r3".to_string(),
        ]
    );
    assert_eq!(store.counts().await.unwrap().records, 3);
}

#[tokio::test]
async fn test_preexisting_rows_are_not_overwritten() {
    let store = MemoryStore::new();
    store
        .insert_batch(
            vec![CatalogItem {
                id: "p1".to_string(),
                name: "Old pen".to_string(),
                price: 0.99,
            }]
            .into(),
        )
        .await
        .unwrap();

    let report = coordinator(Arc::new(store.clone()))
        .run(uploads(ENTITIES, ITEMS, RECORDS))
        .await
        .unwrap();

    assert_eq!(report.items_created, 1);
    assert_eq!(report.items_errors, vec!["skipping duplicate id p1".to_string()]);
    assert_eq!(store.item("p1").unwrap().name, "Old pen");
    // the pre-existing item is a valid reference
    assert_eq!(report.records_created, 3);
}

#[tokio::test]
async fn test_failed_record_insert_commits_nothing() {
    init_tracing();
    let memory = MemoryStore::new();
    let store = FaultyStore::new(
        memory.clone(),
        Faults {
            fail_record_insert: true,
            ..Faults::default()
        },
    );

    let report = coordinator(Arc::new(store))
        .run(uploads(
            ENTITIES,
            ITEMS,
            "id,entity_ref,item_ref,quantity\nr1,u1,p1,2\nr2,u9,p1,1\nr3,u2,p2,1\n",
        ))
        .await
        .unwrap();

    assert_eq!(report.entities_created, 2);
    assert_eq!(report.items_created, 2);
    assert_eq!(report.records_created, 0);
    assert_eq!(report.records_errors.len(), 2);
    assert_eq!(report.records_errors[0], "record r2: entity u9 does not exist");
    assert!(report.records_errors[1].starts_with("transaction blocked or failed: "));

    for id in ["r1", "r2", "r3"] {
        assert!(memory.record(id).is_none(), "{id} was committed");
    }
}

#[tokio::test]
async fn test_panicking_pipeline_is_reported_not_propagated() {
    init_tracing();
    let memory = MemoryStore::new();
    let store = FaultyStore::new(
        memory.clone(),
        Faults {
            panic_on_lookup: Some(DatasetKind::Items),
            ..Faults::default()
        },
    );

    let report = coordinator(Arc::new(store))
        .run(uploads(ENTITIES, ITEMS, RECORDS))
        .await
        .unwrap();

    assert_eq!(report.entities_created, 2);
    assert_eq!(report.items_created, 0);
    assert_eq!(report.items_errors.len(), 1);
    assert!(report.items_errors[0].contains("items pipeline aborted: task panicked"));
    assert!(report.items_errors[0].contains("injected lookup panic"));

    // no item was committed, so every record fails its item lookup
    assert_eq!(report.records_created, 0);
    assert_eq!(report.records_errors.len(), 3);
    assert!(report.records_errors.iter().all(|e| e.contains("does not exist")));
    assert!(memory.contains(DatasetKind::Entities, "u1"));
}

#[tokio::test]
async fn test_dropped_run_still_loads_every_dataset() {
    init_tracing();
    let memory = MemoryStore::new();
    let store = FaultyStore::new(
        memory.clone(),
        Faults {
            insert_delay: Some(Duration::from_millis(200)),
            ..Faults::default()
        },
    );
    let coordinator = coordinator(Arc::new(store));

    let abandoned = tokio::time::timeout(
        Duration::from_millis(100),
        coordinator.run(uploads(ENTITIES, ITEMS, RECORDS)),
    )
    .await;
    assert!(abandoned.is_err(), "run finished before the caller gave up");

    let deadline = Instant::now() + Duration::from_secs(5);
    while memory.counts().await.unwrap().records < 3 {
        assert!(Instant::now() < deadline, "records were never loaded");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let counts = memory.counts().await.unwrap();
    assert_eq!((counts.entities, counts.items, counts.records), (2, 2, 3));
}

#[tokio::test]
async fn test_undecodable_upload_is_isolated() {
    let store = MemoryStore::new();
    let uploads = UploadSet::new(
        InputFile::from_bytes("entities.csv", vec![0xff, 0xfe, b'i', b'd']),
        InputFile::from_bytes("items.csv", ITEMS),
        InputFile::from_bytes("records.csv", RECORDS),
    );

    let report = coordinator(Arc::new(store.clone())).run(uploads).await.unwrap();

    assert_eq!(report.entities_created, 0);
    assert_eq!(report.entities_errors.len(), 1);
    assert!(report.entities_errors[0].starts_with("entities.csv is not valid UTF-8"));
    assert_eq!(report.items_created, 2);
    assert_eq!(report.records_created, 0);
    assert_eq!(report.records_errors.len(), 3);
}

#[tokio::test]
async fn test_empty_upload_fails_its_dataset_only() {
    let store = MemoryStore::new();

    let report = coordinator(Arc::new(store.clone()))
        .run(uploads(ENTITIES, "", RECORDS))
        .await
        .unwrap();

    assert_eq!(report.items_created, 0);
    assert_eq!(report.items_errors, vec!["items.csv has no header row".to_string()]);
    assert_eq!(report.entities_created, 2);
    assert_eq!(report.records_created, 0);
    assert!(report.records_errors.iter().all(|e| e.ends_with("does not exist")));
}

#[tokio::test]
async fn test_byte_order_mark_and_aliases_are_accepted() {
    let store = MemoryStore::new();
    let entities = format!("\u{feff}{ENTITIES}");
    let report = coordinator(Arc::new(store.clone()))
        .run(uploads(
            &entities,
            ITEMS,
            "id,user_id,product_id,quantity\nr1,u1,p1,2\n",
        ))
        .await
        .unwrap();

    assert_eq!(report.total_errors(), 0, "{report:?}");
    assert_eq!(report.records_created, 1);
    assert!(store.contains(DatasetKind::Entities, "u1"));
}

#[tokio::test]
async fn test_missing_upload_fails_before_any_ingestion() {
    let store = MemoryStore::new();
    let uploads = UploadSet {
        entities: Some(InputFile::from_bytes("entities.csv", ENTITIES)),
        items: None,
        records: Some(InputFile::from_bytes("records.csv", RECORDS)),
    };

    let err = coordinator(Arc::new(store.clone())).run(uploads).await.unwrap_err();

    assert_eq!(
        err,
        CoordinatorError::MissingInput {
            missing: vec![DatasetKind::Items]
        }
    );
    assert_eq!(store.counts().await.unwrap().entities, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_runs_never_commit_an_id_twice() {
    init_tracing();
    let store = MemoryStore::new();
    store
        .insert_batch(
            vec![Entity {
                id: "u0".to_string(),
                name: "Seed".to_string(),
                email: "seed@x.com".to_string(),
            }]
            .into(),
        )
        .await
        .unwrap();

    let guard = Arc::new(DuplicateGuard::new());
    let entities: String = std::iter::once("id,name,email\n".to_string())
        .chain((0..200).map(|i| format!("u{i},Name {i},u{i}@x.com\n")))
        .collect();
    let items: String = std::iter::once("id,name,price\n".to_string())
        .chain((0..50).map(|i| format!("p{i},Item {i},{}.25\n", i + 1)))
        .collect();
    let records: String = std::iter::once("id,entity_ref,item_ref,quantity\n".to_string())
        .chain((0..100).map(|i| format!("r{i},u{},p{},1\n", i % 200, i % 50)))
        .collect();

    let runs: Vec<_> = (0..4)
        .map(|_| {
            let coordinator = IngestionCoordinator::with_guard(Arc::new(store.clone()), Arc::clone(&guard));
            let uploads = uploads(&entities, &items, &records);
            tokio::spawn(async move { coordinator.run(uploads).await })
        })
        .collect();

    let mut reports = Vec::new();
    for run in runs {
        reports.push(run.await.unwrap().unwrap());
    }

    // a record may race ahead of another run's commit of its references;
    // a later run picks up whatever is left
    let last = IngestionCoordinator::with_guard(Arc::new(store.clone()), guard)
        .run(uploads(&entities, &items, &records))
        .await
        .unwrap();
    reports.push(last);

    let created = |f: fn(&Report) -> usize| reports.iter().map(f).sum::<usize>();
    assert_eq!(created(|r| r.entities_created), 199);
    assert_eq!(created(|r| r.items_created), 50);
    assert_eq!(created(|r| r.records_created), 100);

    // every rejected row is a duplicate or an unresolved reference, never an
    // insert failure
    for report in &reports {
        for error in report.entities_errors.iter().chain(&report.items_errors) {
            assert!(error.starts_with("skipping duplicate id"), "{error}");
        }
        for error in &report.records_errors {
            assert!(
                error.starts_with("skipping duplicate id") || error.ends_with("does not exist"),
                "{error}"
            );
        }
    }

    let counts = store.counts().await.unwrap();
    assert_eq!((counts.entities, counts.items, counts.records), (200, 50, 100));
}
