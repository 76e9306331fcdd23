use std::fs;

use boardsync::config::Config;
use boardsync::error::Error;

#[test]
fn load_from_root_defaults_when_missing() {
    let dir = tempfile::tempdir().expect("tempdir");

    let cfg = Config::load_from_root(dir.path()).expect("defaults");
    assert_eq!(cfg.board.daily_category, "daily");
    assert_eq!(cfg.board.recurring_column, "recurring");
    assert_eq!(cfg.sync.base_delay_ms, 1000);
    assert_eq!(cfg.sync.max_delay_ms, 30000);
    assert_eq!(cfg.queue.key, "offline_mutation_queue");
}

#[test]
fn partial_file_keeps_other_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let content = r#"
[board]
daily_category = "today"

[sync]
base_delay_ms = 500
"#;
    fs::write(dir.path().join(".boardsync.toml"), content.trim()).expect("write config");

    let cfg = Config::load_from_root(dir.path()).expect("load");
    assert_eq!(cfg.board.daily_category, "today");
    assert_eq!(cfg.board.marker_tag, "recurring-mirror");
    assert_eq!(cfg.sync.base_delay_ms, 500);
    assert!(cfg.history.enabled);
}

#[test]
fn cap_below_base_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let content = r#"
[sync]
base_delay_ms = 5000
max_delay_ms = 1000
"#;
    fs::write(dir.path().join(".boardsync.toml"), content.trim()).expect("write config");

    let err = Config::load_from_root(dir.path()).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[test]
fn malformed_file_is_a_parse_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join(".boardsync.toml"), "board = 123").expect("write config");

    let err = Config::load_from_root(dir.path()).unwrap_err();
    assert!(matches!(err, Error::TomlParse(_)));
}

#[test]
fn save_then_load() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join(".boardsync.toml");
    let mut cfg = Config::default();
    cfg.board.marker_tag = "mirror".to_string();
    cfg.history.enabled = false;
    cfg.save(&path).expect("save");

    let loaded = Config::load(&path).expect("load");
    assert_eq!(loaded.board.marker_tag, "mirror");
    assert!(!loaded.history.enabled);
}
