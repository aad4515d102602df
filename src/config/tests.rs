//! Tests for Settings Module

use super::*;
use crate::watchdog::RestartPolicy;
use std::path::PathBuf;
use tempfile::TempDir;

/// Create a test settings store in a temporary directory
async fn create_test_store() -> (SettingsStore, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let options = SettingsStoreConfig {
        settings_path: temp_dir.path().join("settings.json"),
        backup_dir: temp_dir.path().join("backups"),
        max_backups: 3,
        create_default: true,
    };

    let store = SettingsStore::new(options).await.unwrap();
    (store, temp_dir)
}

#[tokio::test]
async fn test_create_default_settings() {
    let (store, _temp) = create_test_store().await;

    let settings = store.get().await;
    assert_eq!(settings.heartbeat.channel_name, "DocuSyncHeartBeat");
    assert_eq!(settings.restart.policy, RestartPolicy::Prompt);
    assert!(store.settings_path().exists());
}

#[tokio::test]
async fn test_missing_file_without_create_default() {
    let temp_dir = TempDir::new().unwrap();
    let options = SettingsStoreConfig {
        create_default: false,
        ..SettingsStoreConfig::in_dir(temp_dir.path())
    };

    let result = SettingsStore::new(options).await;
    assert!(matches!(result, Err(ConfigError::NotFound(_))));
}

#[tokio::test]
async fn test_update_persists_and_stamps() {
    let (store, _temp) = create_test_store().await;
    let before = store.get().await.last_modified;

    let updated = store
        .update(|settings| {
            settings.heartbeat.timeout_ms = 1500;
            settings.restart.policy = RestartPolicy::Always;
        })
        .await
        .unwrap();

    assert_eq!(updated.heartbeat.timeout_ms, 1500);
    assert!(updated.last_modified >= before);

    // A fresh store sees the same file
    let reopened = SettingsStore::new(SettingsStoreConfig::for_file(store.settings_path()))
        .await
        .unwrap();
    let reloaded = reopened.get().await;
    assert_eq!(reloaded.heartbeat.timeout_ms, 1500);
    assert_eq!(reloaded.restart.policy, RestartPolicy::Always);
}

#[tokio::test]
async fn test_invalid_update_is_rejected_and_not_saved() {
    let (store, _temp) = create_test_store().await;

    let result = store
        .update(|settings| {
            settings.heartbeat.max_hang_count = 0;
        })
        .await;

    assert!(matches!(result, Err(ConfigError::Invalid(_))));
    assert_eq!(store.get().await.heartbeat.max_hang_count, 4);
}

#[tokio::test]
async fn test_partial_file_loads_with_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("settings.json");
    tokio::fs::write(&path, r#"{"child": {"executable": "/opt/docusync/bin/docusync"}}"#)
        .await
        .unwrap();

    let store = SettingsStore::new(SettingsStoreConfig::for_file(&path)).await.unwrap();
    let settings = store.get().await;
    assert_eq!(settings.child.executable, PathBuf::from("/opt/docusync/bin/docusync"));
    assert_eq!(settings.heartbeat.poll_interval_ms, 5000);
}

#[tokio::test]
async fn test_sync_setters() {
    let (store, _temp) = create_test_store().await;

    store.set_excluded_files(vec!["desktop.ini".to_string()]).await.unwrap();
    store.set_excluded_folders(vec!["My Music".to_string()]).await.unwrap();
    let updated = store.set_dry_run(true).await.unwrap();

    assert_eq!(updated.sync.excluded_files, vec!["desktop.ini"]);
    assert_eq!(updated.sync.excluded_folders, vec!["My Music"]);
    assert!(updated.sync.dry_run);
}

#[tokio::test]
async fn test_backup_creation() {
    let (store, _temp) = create_test_store().await;

    for i in 0..5 {
        store
            .update(|settings| {
                settings.heartbeat.poll_interval_ms = 1000 + i;
            })
            .await
            .unwrap();
    }

    let backups = store.list_backups().await.unwrap();
    assert!(!backups.is_empty());
    assert!(backups.len() <= 3);
}

#[tokio::test]
async fn test_export_import() {
    let (store, temp) = create_test_store().await;

    store
        .update(|settings| {
            settings.sync.remote_path = "%USERPROFILE%\\OneDrive".to_string();
            settings.restart.max_restarts = Some(3);
        })
        .await
        .unwrap();

    let export_path = temp.path().join("exported.json");
    store.export(&export_path).await.unwrap();

    store.reset().await.unwrap();
    assert_eq!(store.get().await.restart.max_restarts, None);

    let imported = store.import(&export_path).await.unwrap();
    assert_eq!(imported.restart.max_restarts, Some(3));
    assert_eq!(imported.sync.remote_path, "%USERPROFILE%\\OneDrive");
}

#[tokio::test]
async fn test_reset_settings() {
    let (store, _temp) = create_test_store().await;

    store
        .update(|settings| {
            settings.heartbeat.grace_period_ms = 1;
        })
        .await
        .unwrap();

    let reset = store.reset().await.unwrap();
    assert_eq!(reset.heartbeat.grace_period_ms, 10_000);
}
