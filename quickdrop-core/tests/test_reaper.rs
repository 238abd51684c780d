//! Integration tests for the background expiry loop.
//!
//! The clock is paused, so expiry bounds are checked against virtual time.
use std::sync::Arc;
use std::time::Duration;

use quickdrop_core::{
    spawn_reaper, BlobStore, DownloadError, ReaperConfig, TokenStatus, TransferManager,
};
use tempfile::TempDir;
use tokio::time::Instant;

fn tracing_init() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_line_number(true)
        .with_target(false)
        .with_file(true)
        .try_init();
}

fn new_manager(dir: &TempDir) -> Arc<TransferManager> {
    Arc::new(TransferManager::new(BlobStore::new(dir.path().join("uploads"))))
}

fn blob_count(dir: &TempDir) -> usize {
    std::fs::read_dir(dir.path().join("uploads"))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

/// Let every task that is ready at the current instant run, without moving
/// the clock.
async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

#[test]
fn default_policy_is_one_hour_swept_every_minute() {
    let config = ReaperConfig::default();
    assert_eq!(config.ttl, Duration::from_secs(3600));
    assert_eq!(config.sweep_interval, Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_reaper_expires_abandoned_upload() {
    tracing_init();
    let dir = TempDir::new().unwrap();
    let manager = new_manager(&dir);
    let config = ReaperConfig {
        ttl: Duration::from_secs(60),
        sweep_interval: Duration::from_secs(10),
    };

    let created = Instant::now();
    let token = manager.upload(&mut &b"abandoned"[..], None).await.unwrap();
    let reaper = spawn_reaper(manager.clone(), config.clone());

    // Every sweep so far saw an entry younger than the ttl.
    tokio::time::sleep_until(created + config.ttl - config.sweep_interval / 2).await;
    settle().await;
    assert_eq!(manager.status(&token), TokenStatus::Exists);

    tokio::time::sleep_until(created + config.ttl + config.sweep_interval).await;
    let mut polls = 0;
    while manager.status(&token) == TokenStatus::Exists {
        assert!(polls < 1000, "entry was not expired by T0 + ttl + interval");
        tokio::task::yield_now().await;
        polls += 1;
    }
    assert!(created.elapsed() < config.ttl + config.sweep_interval + Duration::from_secs(1));

    for _ in 0..100 {
        if blob_count(&dir) == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(blob_count(&dir), 0);
    assert!(matches!(
        manager.download(&token).await,
        Err(DownloadError::NotFound)
    ));

    reaper.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_reaper_leaves_fresh_uploads_alone() {
    let dir = TempDir::new().unwrap();
    let manager = new_manager(&dir);
    let reaper = spawn_reaper(manager.clone(), ReaperConfig::default());

    let token = manager.upload(&mut &b"fresh"[..], None).await.unwrap();
    tokio::time::sleep(Duration::from_secs(59 * 60)).await;
    settle().await;

    assert_eq!(manager.status(&token), TokenStatus::Exists);
    assert_eq!(blob_count(&dir), 1);

    let download = manager.download(&token).await.unwrap();
    assert_eq!(download.read_to_end().await.unwrap(), b"fresh");

    reaper.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_sweeping() {
    let dir = TempDir::new().unwrap();
    let manager = new_manager(&dir);
    let reaper = spawn_reaper(
        manager.clone(),
        ReaperConfig {
            ttl: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(1),
        },
    );
    reaper.shutdown().await;

    let token = manager.upload(&mut &b"outlives the reaper"[..], None).await.unwrap();
    tokio::time::sleep(Duration::from_secs(60 * 60)).await;
    settle().await;
    assert_eq!(manager.status(&token), TokenStatus::Exists);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_handle_stops_sweeping() {
    let dir = TempDir::new().unwrap();
    let manager = new_manager(&dir);
    drop(spawn_reaper(
        manager.clone(),
        ReaperConfig {
            ttl: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(1),
        },
    ));

    let token = manager.upload(&mut &b"still here"[..], None).await.unwrap();
    tokio::time::sleep(Duration::from_secs(60 * 60)).await;
    settle().await;
    assert_eq!(manager.status(&token), TokenStatus::Exists);
}
