//! Row stores, record-log persistence, configuration and the space registry.

use std::fs::OpenOptions;
use std::io::Write;
use std::time::Duration;

use shardspace::{
    config::{MutationWeights, SpaceConfig},
    store::{atomic_write, FileRowStore, MemoryRowStore, RowStore, Storage, StorageConfig},
    DistanceMetric, IndexKind, Reference, SpaceError, SpaceRegistry,
};
use tempfile::TempDir;

// ============================================================
// Memory store
// ============================================================

#[test]
fn test_memory_store_crud() {
    let mut store = MemoryRowStore::new("mem_0", 2);
    store.create(3, &[1.0, 2.0]).unwrap();
    store.create(1, &[0.0, 0.0]).unwrap();
    assert!(matches!(store.create(3, &[5.0, 5.0]), Err(SpaceError::DuplicateKey(3))));
    assert!(matches!(store.create(4, &[5.0]), Err(SpaceError::DimensionMismatch { .. })));

    store.update(3, &[9.0, 9.0]).unwrap();
    assert!(matches!(store.update(8, &[1.0, 1.0]), Err(SpaceError::NotFound(8))));
    assert_eq!(store.get(3).unwrap(), vec![9.0, 9.0]);

    assert!(store.delete(1).unwrap());
    assert!(!store.delete(1).unwrap());
    assert_eq!(store.count(), 1);
    assert!(store.contains(3));
    assert_eq!(store.dump().unwrap(), vec![(3, vec![9.0, 9.0])]);
}

// ============================================================
// File store
// ============================================================

#[test]
fn test_file_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let mut store = FileRowStore::open(dir.path(), "t_0", 3, false).unwrap();
        store.create(1, &[1.0, 2.0, 3.0]).unwrap();
        store.create(2, &[4.0, 5.0, 6.0]).unwrap();
        store.create(3, &[7.0, 8.0, 9.0]).unwrap();
        store.update(2, &[0.5, 0.5, 0.5]).unwrap();
        assert!(store.delete(3).unwrap());
        assert!(store.path().ends_with("t_0.rows"));
    }
    let store = FileRowStore::open(dir.path(), "t_0", 3, false).unwrap();
    assert_eq!(store.count(), 2);
    assert_eq!(store.get(1).unwrap(), vec![1.0, 2.0, 3.0]);
    assert_eq!(store.get(2).unwrap(), vec![0.5, 0.5, 0.5]);
    assert!(matches!(store.get(3), Err(SpaceError::NotFound(3))));
}

#[test]
fn test_file_store_truncates_torn_tail() {
    let dir = TempDir::new().unwrap();
    let path = {
        let mut store = FileRowStore::open(dir.path(), "torn", 2, true).unwrap();
        store.create(1, &[1.0, 1.0]).unwrap();
        store.create(2, &[2.0, 2.0]).unwrap();
        store.path().to_path_buf()
    };
    let clean_len = std::fs::metadata(&path).unwrap().len();

    // A put record cut off inside its key.
    let mut f = OpenOptions::new().append(true).open(&path).unwrap();
    f.write_all(&[1, 7, 0, 0]).unwrap();
    drop(f);

    let mut store = FileRowStore::open(dir.path(), "torn", 2, false).unwrap();
    assert_eq!(store.count(), 2);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), clean_len);

    store.create(3, &[3.0, 3.0]).unwrap();
    drop(store);
    let store = FileRowStore::open(dir.path(), "torn", 2, false).unwrap();
    assert_eq!(store.count(), 3);
    assert_eq!(store.get(3).unwrap(), vec![3.0, 3.0]);
}

#[test]
fn test_file_store_rejects_corrupt_record() {
    let dir = TempDir::new().unwrap();
    let path = {
        let mut store = FileRowStore::open(dir.path(), "bad", 2, false).unwrap();
        store.create(1, &[1.0, 1.0]).unwrap();
        store.path().to_path_buf()
    };
    let mut f = OpenOptions::new().append(true).open(&path).unwrap();
    f.write_all(&[0xee; 32]).unwrap();
    drop(f);

    assert!(matches!(FileRowStore::open(dir.path(), "bad", 2, false), Err(SpaceError::Storage(_))));
}

#[test]
fn test_file_store_dimension_mismatch_on_open() {
    let dir = TempDir::new().unwrap();
    FileRowStore::open(dir.path(), "dims", 4, false).unwrap();
    assert!(matches!(FileRowStore::open(dir.path(), "dims", 3, false), Err(SpaceError::InvalidConfig(_))));
}

#[test]
fn test_file_store_compacts_dead_records() {
    let dir = TempDir::new().unwrap();
    let mut store = FileRowStore::open(dir.path(), "churn", 2, false).unwrap();
    store.create(1, &[0.0, 0.0]).unwrap();
    for i in 0..1500 {
        store.update(1, &[i as f32, 0.0]).unwrap();
    }
    // Header plus one put record of 1 + 8 + 2 * 4 bytes, plus updates since the last compaction.
    let len = std::fs::metadata(store.path()).unwrap().len();
    assert!(len < 12 + 17 * 600, "log not compacted: {len} bytes");
    drop(store);

    let store = FileRowStore::open(dir.path(), "churn", 2, false).unwrap();
    assert_eq!(store.count(), 1);
    assert_eq!(store.get(1).unwrap(), vec![1499.0, 0.0]);
}

#[test]
fn test_file_store_drop_table() {
    let dir = TempDir::new().unwrap();
    let mut store = FileRowStore::open(dir.path(), "gone", 1, false).unwrap();
    store.create(1, &[1.0]).unwrap();
    let path = store.path().to_path_buf();
    store.drop_table().unwrap();
    assert!(!path.exists());
    assert!(matches!(store.create(2, &[2.0]), Err(SpaceError::Destroyed(_))));
    store.drop_table().unwrap();
}

#[test]
fn test_atomic_write_replaces_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("blob.json");
    atomic_write(&path, b"first").unwrap();
    atomic_write(&path, b"second").unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"second");
    assert!(!path.with_extension("tmp").exists());
}

#[test]
fn test_storage_opens_tables() {
    let memory = Storage::open(&StorageConfig::Memory).unwrap();
    assert!(!memory.is_persistent());
    assert_eq!(memory.open_table("m_0", 3).unwrap().dimensions(), 3);

    let dir = TempDir::new().unwrap();
    let root = dir.path().join("root");
    let disk = Storage::open(&StorageConfig::directory(&root)).unwrap();
    assert!(disk.is_persistent());
    let mut table = disk.open_table("d_0", 2).unwrap();
    table.create(1, &[1.0, 2.0]).unwrap();
    assert!(root.join("d_0.rows").exists());
    disk.release("d", "space.json").unwrap();
    assert!(!root.exists());
}

#[test]
fn test_release_leaves_foreign_files() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("shared");
    let disk = Storage::open(&StorageConfig::directory(&root)).unwrap();
    disk.open_table("mine_0", 2).unwrap();
    std::fs::write(root.join("space.json"), b"{}").unwrap();
    std::fs::write(root.join("notes.txt"), b"keep me").unwrap();
    disk.open_table("other_0", 2).unwrap();

    disk.release("mine", "space.json").unwrap();
    assert!(root.join("notes.txt").exists());
    assert!(root.join("other_0.rows").exists());
    assert!(!root.join("mine_0.rows").exists());
    assert!(!root.join("space.json").exists());
}

// ============================================================
// Config
// ============================================================

#[test]
fn test_config_defaults() {
    let cfg = SpaceConfig::new("s", 8);
    assert_eq!(cfg.insertion_latency_budget, Duration::from_millis(75));
    assert_eq!(cfg.rebalance_factor, 0.5);
    assert_eq!(cfg.candidate_divisor, 15);
    assert_eq!(cfg.sync.sync_threshold, 0);
    assert_eq!(cfg.sync.weights, MutationWeights { insert: 1, update: 1, delete: 2 });
    assert_eq!(cfg.index.kind, IndexKind::Forest);
    assert_eq!(cfg.index.metric, DistanceMetric::Angular);
    assert_eq!(cfg.storage, StorageConfig::Memory);
    cfg.validate().unwrap();
}

#[test]
fn test_config_json_roundtrip() {
    let cfg = SpaceConfig::new("docs", 16)
        .with_latency_budget(Duration::from_millis(20))
        .with_sync_threshold(4)
        .with_index_kind(IndexKind::Hnsw)
        .with_metric(DistanceMetric::Dot)
        .with_storage(StorageConfig::directory("/tmp/docs"))
        .with_routing_seed(3);
    let parsed = SpaceConfig::from_json(&cfg.to_json().unwrap()).unwrap();
    assert_eq!(parsed, cfg);
}

#[test]
fn test_config_from_minimal_json() {
    let cfg = SpaceConfig::from_json(r#"{"name": "mini", "dimensions": 3, "storage": {"backend": "memory"}}"#).unwrap();
    assert_eq!(cfg.name, "mini");
    assert_eq!(cfg.insertion_latency_budget, Duration::from_millis(75));
    assert_eq!(cfg.index.kind, IndexKind::Forest);
}

#[test]
fn test_config_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("space.json");
    let cfg = SpaceConfig::new("filed", 5).with_rebalance_factor(0.2);
    std::fs::write(&path, cfg.to_json().unwrap()).unwrap();
    assert_eq!(SpaceConfig::from_file(&path).unwrap(), cfg);
}

#[test]
fn test_config_validation() {
    let bad = [
        SpaceConfig::new("", 3),
        SpaceConfig::new("a/b", 3),
        SpaceConfig::new("zero", 0),
        SpaceConfig::new("factor", 3).with_rebalance_factor(1.0),
        SpaceConfig::new("factor", 3).with_rebalance_factor(-0.5),
        SpaceConfig::new("divisor", 3).with_candidate_divisor(0),
        SpaceConfig::new(".", 3),
        SpaceConfig::new("..", 3),
        SpaceConfig::new("../escape", 3),
        SpaceConfig::new("a\\b", 3),
    ];
    for cfg in bad {
        assert!(matches!(cfg.validate(), Err(SpaceError::InvalidConfig(_))), "{cfg:?}");
    }
    assert!(matches!(SpaceConfig::from_json("{not json"), Err(SpaceError::Serialization(_))));
    SpaceConfig::new("v1.2_docs", 3).validate().unwrap();
}

#[test]
fn test_tree_count_exponent_is_bounded() {
    let mut cfg = SpaceConfig::new("forest", 3);
    cfg.index.forest.tree_count_exponent = 1.0;
    cfg.validate().unwrap();
    for exponent in [3.0, -0.1, f64::NAN, f64::INFINITY] {
        cfg.index.forest.tree_count_exponent = exponent;
        assert!(matches!(cfg.validate(), Err(SpaceError::InvalidConfig(_))), "{exponent}");
    }
}

// ============================================================
// Registry
// ============================================================

#[test]
fn test_registry_lifecycle() {
    let registry = SpaceRegistry::new();
    let space = registry.create_space(SpaceConfig::new("alpha", 2)).unwrap();
    registry.create_space(SpaceConfig::new("beta", 3)).unwrap();
    assert!(matches!(
        registry.create_space(SpaceConfig::new("alpha", 2)),
        Err(SpaceError::SpaceAlreadyExists(_))
    ));
    assert_eq!(registry.list_spaces(), vec!["alpha", "beta"]);

    space.insert(&[1.0, 0.0], None).unwrap();
    let len = registry.with_space("alpha", |s| s.len()).unwrap();
    assert_eq!(len, 1);
    assert_eq!(registry.get("beta").unwrap().dimensions(), 3);
    assert!(matches!(registry.get("gamma"), Err(SpaceError::SpaceNotFound(_))));

    assert!(registry.delete_space("alpha"));
    assert!(!registry.delete_space("alpha"));
    assert!(space.is_destroyed());
    assert!(!registry.has_space("alpha"));

    registry.destroy_all();
    assert!(registry.list_spaces().is_empty());
}

#[test]
fn test_registry_reloads_spaces() {
    let dir = TempDir::new().unwrap();
    {
        let registry = SpaceRegistry::with_path(dir.path()).unwrap();
        let space = registry
            .create_space(SpaceConfig::new("notes", 2).with_metric(DistanceMetric::Euclidean))
            .unwrap();
        space.insert(&[0.0, 0.0], None).unwrap();
        space.insert(&[1.0, 1.0], None).unwrap();
        registry.create_space(SpaceConfig::new("empty", 4)).unwrap();
        assert!(dir.path().join("notes").join("space.json").exists());
    }
    // Stray directories without a manifest are ignored.
    std::fs::create_dir_all(dir.path().join("scratch")).unwrap();

    let registry = SpaceRegistry::with_path(dir.path()).unwrap();
    assert_eq!(registry.list_spaces(), vec!["empty", "notes"]);
    let notes = registry.get("notes").unwrap();
    assert_eq!(notes.len(), 2);
    assert_eq!(notes.config().index.metric, DistanceMetric::Euclidean);
    let results = notes.query(&Reference::ByKey(2), 1, true).unwrap();
    assert_eq!(results[0].key, 2);

    assert!(registry.delete_space("notes"));
    assert!(!dir.path().join("notes").exists());
}

#[test]
fn test_registry_rejects_path_like_names() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("reg");
    let sibling = dir.path().join("sibling.txt");
    std::fs::write(&sibling, b"outside the registry").unwrap();

    let registry = SpaceRegistry::with_path(&root).unwrap();
    for name in ["..", ".", "", "a/b", "../reg2"] {
        assert!(
            matches!(registry.create_space(SpaceConfig::new(name, 2)), Err(SpaceError::InvalidConfig(_))),
            "{name:?}"
        );
        assert!(!registry.delete_space(name));
    }
    assert!(registry.list_spaces().is_empty());
    assert!(sibling.exists());
    assert!(root.exists());
}

#[test]
fn test_registry_delete_keeps_foreign_files() {
    let dir = TempDir::new().unwrap();
    let registry = SpaceRegistry::with_path(dir.path()).unwrap();
    let space = registry.create_space(SpaceConfig::new("kept", 2)).unwrap();
    space.insert(&[1.0, 2.0], None).unwrap();
    let space_dir = dir.path().join("kept");
    std::fs::write(space_dir.join("README"), b"user file").unwrap();

    assert!(registry.delete_space("kept"));
    assert!(space_dir.join("README").exists());
    assert!(!space_dir.join("kept_0.rows").exists());
    assert!(!space_dir.join("space.json").exists());
}
