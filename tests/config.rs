use std::fs;
use std::time::Duration;

use taskpool::config::Config;
use taskpool::error::Error;
use taskpool::lifecycle::Role;
use taskpool::store::StoreOptions;
use taskpool::sync::DispatcherOptions;

#[test]
fn defaults_when_missing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config::load_from_root(dir.path()).expect("defaults");

    assert_eq!(config.actor.role().expect("role"), Role::Parent);
    assert_eq!(config.store.stale_after(), Duration::from_secs(30));
    assert_eq!(config.store.confirm_timeout(), Duration::from_secs(10));
    assert_eq!(config.store.lock_timeout_ms, 5_000);
    assert!(config.sync.prefetch_on_focus);
    assert!(!config.lifecycle.enforce_due_dates);
    assert_eq!(config.rewards.max_reward_coins, 10_000);
}

#[test]
fn overrides_flow_into_engine_options() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let toml = r#"
[actor]
default = "child"

[store]
stale_after_ms = 500
confirm_timeout_ms = 250

[sync]
prefetch_on_focus = false

[lifecycle]
enforce_due_dates = true

[rewards]
max_reward_coins = 50
"#;
    fs::write(dir.path().join(".taskpool.toml"), toml)?;

    let config = Config::load_from_root(dir.path())?;
    assert!(!config.sync.prefetch_on_focus);

    let store = StoreOptions::from_config(&config);
    assert_eq!(store.stale_after, Duration::from_millis(500));
    assert_eq!(store.confirm_timeout, Duration::from_millis(250));

    let dispatcher = DispatcherOptions::from_config(&config)?;
    assert_eq!(dispatcher.role, Role::Child);
    assert!(dispatcher.lifecycle.enforce_due_dates);
    assert_eq!(dispatcher.max_reward_coins, 50);
    Ok(())
}

#[test]
fn zero_timeout_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(
        dir.path().join(".taskpool.toml"),
        "[store]\nconfirm_timeout_ms = 0\n",
    )
    .expect("write config");

    let err = Config::load_from_root(dir.path()).expect_err("invalid");
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[test]
fn malformed_toml_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join(".taskpool.toml"), "store = 123").expect("write config");

    let err = Config::load_from_root(dir.path()).expect_err("malformed");
    assert!(matches!(err, Error::TomlParse(_)));
}
