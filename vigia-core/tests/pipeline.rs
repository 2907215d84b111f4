//! End-to-end pipeline behavior over the in-memory stores: scan, fold,
//! replay, and the master/slave/part lifecycle.

use std::fs;
use std::sync::Arc;

use tempfile::TempDir;

use vigia_core::store::{
    EventStore, FileStore, MasterStore, MemoryEventStore, MemoryFileStore, MemoryMasterStore,
    MemoryPartStore, PartStore,
};
use vigia_core::{
    EventOrigin, FileSystemEvent, Pipeline, Reconciler, Scanner, TreePath, VigiaConfig,
    standard_chain,
};

struct Rig {
    store: Arc<MemoryEventStore>,
    files: Arc<MemoryFileStore>,
    masters: Arc<MemoryMasterStore>,
    parts: Arc<MemoryPartStore>,
    pipeline: Pipeline,
}

fn rig() -> Rig {
    let store = Arc::new(MemoryEventStore::new());
    let files = Arc::new(MemoryFileStore::new());
    let masters = Arc::new(MemoryMasterStore::new());
    let parts = Arc::new(MemoryPartStore::new());
    let chain = standard_chain(
        files.clone(),
        masters.clone(),
        parts.clone(),
        &VigiaConfig::default(),
    );
    Rig {
        pipeline: Pipeline::new(store.clone(), chain),
        store,
        files,
        masters,
        parts,
    }
}

/// Fresh projection stores folding the same shared log.
fn replay_rig(store: Arc<MemoryEventStore>) -> Rig {
    let files = Arc::new(MemoryFileStore::new());
    let masters = Arc::new(MemoryMasterStore::new());
    let parts = Arc::new(MemoryPartStore::new());
    let chain = standard_chain(
        files.clone(),
        masters.clone(),
        parts.clone(),
        &VigiaConfig::default(),
    );
    Rig {
        pipeline: Pipeline::new(store.clone(), chain),
        store,
        files,
        masters,
        parts,
    }
}

fn path(raw: &str) -> TreePath {
    TreePath::new(raw).unwrap()
}

fn created(raw: &str, hash: &str) -> FileSystemEvent {
    FileSystemEvent::FileCreated {
        path: path(raw),
        origin: EventOrigin::Initial,
        hash: Some(hash.into()),
        modified_at: None,
        size: Some(1),
    }
}

#[tokio::test]
async fn scan_then_watch_lifecycle_builds_all_three_tables() {
    let rig = rig();

    for event in [
        FileSystemEvent::DirectoryCreated {
            path: path("PUMPS"),
            origin: EventOrigin::Initial,
        },
        created("PUMPS/PUMP_rev1.par", "h-master"),
        created("PUMPS/PUMP_rev1.pdf", "h-slave"),
        created("PUMPS/HOUSING_v2.par", "h-housing"),
    ] {
        rig.pipeline.record(event).await.unwrap();
    }

    assert_eq!(rig.files.all().await.unwrap().len(), 4);

    let masters = rig.masters.all().await.unwrap();
    assert_eq!(masters.len(), 1);
    assert_eq!(masters[0].path.as_str(), "PUMPS/PUMP_rev1.par");
    assert_eq!(masters[0].slave_path.as_str(), "PUMPS/PUMP_rev1.pdf");

    let parts = rig.parts.all().await.unwrap();
    assert_eq!(parts.len(), 2);
    let pump = parts
        .iter()
        .find(|row| row.path.as_str() == "PUMPS/PUMP_rev1.par")
        .unwrap();
    assert!(pump.content_as_master);
    let housing = parts
        .iter()
        .find(|row| row.path.as_str() == "PUMPS/HOUSING_v2.par")
        .unwrap();
    assert!(housing.master_path.is_none());
}

#[tokio::test]
async fn replaying_the_full_log_is_idempotent() {
    let rig = rig();

    for event in [
        FileSystemEvent::DirectoryCreated {
            path: path("A"),
            origin: EventOrigin::Initial,
        },
        created("A/PART_rev1.par", "h1"),
        created("A/PART_rev1.pdf", "p1"),
        created("A/OTHER_rev2.par", "h2"),
        FileSystemEvent::FileModified {
            path: path("A/PART_rev1.par"),
            origin: EventOrigin::RealTime,
            hash: Some("h1b".into()),
            modified_at: None,
            size: Some(2),
            previous_hash: Some("h1".into()),
        },
        FileSystemEvent::FileDeleted {
            path: path("A/OTHER_rev2.par"),
            origin: EventOrigin::RealTime,
        },
    ] {
        rig.pipeline.record(event).await.unwrap();
    }

    let live_files = rig.files.all().await.unwrap();
    let live_masters = rig.masters.all().await.unwrap();
    let live_parts = rig.parts.all().await.unwrap();

    // first replay from empty state reproduces the live tables
    let replayed = replay_rig(rig.store.clone());
    let applied = replayed.pipeline.replay_all().await.unwrap();
    assert_eq!(applied, 6);
    assert_eq!(replayed.files.all().await.unwrap(), live_files);
    assert_eq!(replayed.masters.all().await.unwrap(), live_masters);
    assert_eq!(replayed.parts.all().await.unwrap(), live_parts);

    // replaying again over the same state changes nothing
    replayed.pipeline.replay_all().await.unwrap();
    assert_eq!(replayed.files.all().await.unwrap(), live_files);
    assert_eq!(replayed.masters.all().await.unwrap(), live_masters);
    assert_eq!(replayed.parts.all().await.unwrap(), live_parts);
}

#[tokio::test]
async fn directory_deletion_leaves_no_rows_behind() {
    let rig = rig();

    for event in [
        FileSystemEvent::DirectoryCreated {
            path: path("GONE"),
            origin: EventOrigin::Initial,
        },
        created("GONE/PART_rev1.par", "h"),
        created("GONE/PART_rev1.pdf", "p"),
        created("KEPT_rev1.par", "k"),
    ] {
        rig.pipeline.record(event).await.unwrap();
    }

    rig.pipeline
        .record(FileSystemEvent::DirectoryDeleted {
            path: path("GONE"),
            origin: EventOrigin::Reconciled,
        })
        .await
        .unwrap();

    let surviving_files = rig.files.all().await.unwrap();
    assert_eq!(surviving_files.len(), 1);
    assert_eq!(surviving_files[0].path.as_str(), "KEPT_rev1.par");
    assert!(rig.masters.all().await.unwrap().is_empty());
    assert!(
        rig.parts
            .all()
            .await
            .unwrap()
            .iter()
            .all(|row| !row.path.starts_with_dir("GONE"))
    );
}

#[tokio::test]
async fn scan_and_reconcile_converge_on_a_real_tree() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir(tmp.path().join("VALVES")).unwrap();
    fs::write(tmp.path().join("VALVES/VALVE_rev1.par"), b"cad").unwrap();
    fs::write(tmp.path().join("VALVES/VALVE_rev1.pdf"), b"doc").unwrap();

    let rig = rig();
    let stats = Scanner::new(tmp.path())
        .scan(&rig.pipeline, None)
        .await
        .unwrap();
    assert_eq!(stats.directories, 1);
    assert_eq!(stats.files, 2);

    // scan left the tables consistent with the tree
    assert_eq!(rig.masters.all().await.unwrap().len(), 1);

    // nothing drifted, so reconciliation is a no-op
    let report = Reconciler::new(tmp.path())
        .reconcile(&rig.pipeline)
        .await
        .unwrap();
    assert_eq!(report.discrepancies, 0);
    assert_eq!(report.events_created, 0);

    // remove the pdf behind the watcher's back; reconciliation repairs the
    // master table through a corrective deletion event
    fs::remove_file(tmp.path().join("VALVES/VALVE_rev1.pdf")).unwrap();
    let report = Reconciler::new(tmp.path())
        .reconcile(&rig.pipeline)
        .await
        .unwrap();
    assert_eq!(report.discrepancies, 1);
    assert_eq!(report.events_created, 1);
    assert!(rig.masters.all().await.unwrap().is_empty());

    let last = rig.store.latest(1).await.unwrap();
    assert_eq!(last[0].event.type_name(), "file_deleted");
    assert_eq!(last[0].event.origin(), EventOrigin::Reconciled);
}
