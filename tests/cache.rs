mod helper;

use tempfile::TempDir;

use helper::row;
use nvidia_align::changelog::ReleaseCache;
use nvidia_align::changelog::types::{Architecture, RawReleaseRow};
use nvidia_align::version::catalog::ReleaseCatalog;

const REPO: &str = "awslabs/amazon-eks-ami";

#[test]
fn replace_rows_creates_new_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let cache = ReleaseCache::new(&db_path, 86_400_000).unwrap();

    let rows = vec![
        row("v20241121", "1.32", "AL2023_x86_64_NVIDIA", "570.124.06", "2024-11-21"),
        row("v20241121", "1.32", "AL2023_ARM_64_NVIDIA", "570.124.06", "2024-11-21"),
    ];
    cache.replace_rows(REPO, &rows).unwrap();

    assert_eq!(cache.get_rows(REPO).unwrap(), rows);
    assert!(!cache.is_stale(REPO).unwrap());
}

#[test]
fn replace_rows_updates_existing_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let cache = ReleaseCache::new(&db_path, 86_400_000).unwrap();

    // Save initial rows
    cache
        .replace_rows(
            REPO,
            &[row("v20241001", "1.31", "AL2_x86_64_GPU", "550.127.05", "2024-10-01")],
        )
        .unwrap();

    // Replace with a newer snapshot
    let new_rows = vec![RawReleaseRow {
        kubelet_version: Some("1.32.3-eks-473151a".to_string()),
        ..row("v20250610", "1.32", "AL2023_x86_64_NVIDIA", "570.148.08", "2025-06-10")
    }];
    cache.replace_rows(REPO, &new_rows).unwrap();

    assert_eq!(cache.get_rows(REPO).unwrap(), new_rows);
}

#[test]
fn snapshot_survives_reopening_database() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let rows = vec![
        row("v20241001", "1.32", "AL2023_ARM_64_NVIDIA", "569.0.0", "2024-10-01"),
        row("v20241121", "1.32", "AL2023_ARM_64_NVIDIA", "570.124.06", "2024-11-21"),
    ];
    {
        let cache = ReleaseCache::new(&db_path, 86_400_000).unwrap();
        cache.replace_rows(REPO, &rows).unwrap();
    }

    let cache = ReleaseCache::new(&db_path, 86_400_000).unwrap();
    let catalog = ReleaseCatalog::build(&cache.get_rows(REPO).unwrap());

    let latest = catalog.latest_for("1.32", Architecture::Arm64).unwrap();
    assert_eq!(latest.release_tag, "v20241121");
}

#[test]
fn zero_refresh_interval_is_always_stale() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let cache = ReleaseCache::new(&db_path, 0).unwrap();

    assert!(cache.is_stale(REPO).unwrap());
    cache.replace_rows(REPO, &[]).unwrap();
    assert!(cache.is_stale(REPO).unwrap());
    assert!(cache.get_rows(REPO).unwrap().is_empty());
}
