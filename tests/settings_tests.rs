//! Settings and saved connections on disk.
//!
//! No MongoDB container needed.

use std::time::Duration;

use documentdb_copy::connection::CountMode;
use documentdb_copy::models::SavedConnection;
use documentdb_copy::state::{AppSettings, ConfigManager, CopySettings};
use documentdb_copy::transfer::{CopyTaskOptions, MIN_KEEP_ALIVE_INTERVAL};
use tempfile::TempDir;

fn manager() -> (TempDir, ConfigManager) {
    let dir = TempDir::new().expect("temp dir");
    let manager = ConfigManager::with_config_dir(dir.path().to_path_buf()).expect("config dir");
    (dir, manager)
}

#[test]
fn default_copy_settings() {
    let settings = CopySettings::default();

    assert_eq!(settings.batch_size, 1000);
    assert!(settings.keep_alive_enabled);
    assert_eq!(settings.keep_alive_interval_ms, 10_000);
    assert_eq!(settings.keep_alive_timeout_ms, 600_000);
    assert_eq!(settings.max_recorded_errors, 100);
    assert_eq!(settings.count_mode, CountMode::Estimated);
}

#[test]
fn task_options_follow_settings() {
    let mut settings = CopySettings { batch_size: 0, ..CopySettings::default() };
    let options = CopyTaskOptions::from(&settings);
    assert_eq!(options.batch_size, 1);
    let keep_alive = options.keep_alive.expect("enabled by default");
    assert_eq!(keep_alive.interval, Duration::from_secs(10));
    assert_eq!(keep_alive.timeout, Duration::from_secs(600));

    settings.keep_alive_interval_ms = 0;
    let keep_alive = CopyTaskOptions::from(&settings).keep_alive.expect("still enabled");
    assert_eq!(keep_alive.interval, MIN_KEEP_ALIVE_INTERVAL);

    settings.keep_alive_enabled = false;
    assert!(CopyTaskOptions::from(&settings).keep_alive.is_none());
}

#[test]
fn settings_survive_a_round_trip() {
    let (_dir, manager) = manager();
    let mut settings = AppSettings::default();
    settings.copy.batch_size = 250;
    settings.copy.count_mode = CountMode::Exact;

    manager.save_settings(&settings).expect("save");

    assert_eq!(manager.load_settings().expect("load"), settings);
}

#[test]
fn older_settings_files_still_load() {
    let (dir, manager) = manager();
    std::fs::write(dir.path().join("settings.json"), r#"{ "copy": { "keep_alive_enabled": false } }"#)
        .expect("write");

    let settings = manager.load_settings().expect("load");

    assert!(!settings.copy.keep_alive_enabled);
    assert_eq!(settings.copy.batch_size, 1000);
}

#[test]
fn corrupt_settings_are_reported() {
    let (dir, manager) = manager();
    std::fs::write(dir.path().join("settings.json"), "{ not json").expect("write");

    let err = manager.load_settings().expect_err("corrupt file");
    assert!(err.to_string().contains("settings.json"));
}

#[test]
fn connections_are_found_by_id_or_name() {
    let (_dir, manager) = manager();
    let prod = SavedConnection::new("prod".into(), "mongodb://prod:27017".into());
    let staging = SavedConnection::new("staging".into(), "mongodb://staging:27017".into());
    manager.save_connections(&[prod.clone(), staging.clone()]).expect("save");

    assert_eq!(manager.find_connection("staging").expect("find"), Some(staging.clone()));
    assert_eq!(manager.find_connection(&prod.id).expect("find"), Some(prod.clone()));
    assert_eq!(manager.find_connection("missing").expect("find"), None);

    manager.remove_connection("prod").expect("remove");
    assert_eq!(manager.load_connections().expect("load"), vec![staging]);
}
