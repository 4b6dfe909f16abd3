use std::env;
use std::fs;

use serial_test::serial;

use news_relay::config::{BusBackend, Config, ENV_BROKERS, ENV_CONFIG_PATH, ENV_GROUP_ID, ENV_TZ};
use news_relay::AppError;

const SAMPLE: &str = r#"
[feed]
time_zone = "UTC"
poll_interval_secs = 60

[bus]
backend = "memory"
partitions = 2

[[sources]]
id = 1
name = "Example"
url = "https://example.com/rss"
subscribers = [10, 20]

[[users]]
chat_id = 10
username = "reader"
"#;

fn clear_env() {
    for var in [ENV_CONFIG_PATH, ENV_TZ, ENV_BROKERS, ENV_GROUP_ID] {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn env_path_is_used_when_no_explicit_path() {
    clear_env();
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("relay.toml");
    fs::write(&path, SAMPLE).unwrap();
    env::set_var(ENV_CONFIG_PATH, path.display().to_string());

    let config = Config::load(None).unwrap();
    assert_eq!(config.feed.time_zone, "UTC");
    assert_eq!(config.feed.poll_interval_secs, 60);
    assert_eq!(config.bus.partitions, 2);
    assert_eq!(config.sources[0].subscribers, vec![10, 20]);
    assert!(config.sources[0].active);
    assert!(config.users[0].active);
    // Untouched sections keep their defaults.
    assert_eq!(config.scraper.max_attempts, 3);

    clear_env();
}

#[test]
#[serial]
fn explicit_path_wins_over_env() {
    clear_env();
    let tmp = tempfile::tempdir().unwrap();
    let from_env = tmp.path().join("env.toml");
    let explicit = tmp.path().join("explicit.toml");
    fs::write(&from_env, "[feed]\npoll_interval_secs = 1\n").unwrap();
    fs::write(&explicit, "[feed]\npoll_interval_secs = 2\n").unwrap();
    env::set_var(ENV_CONFIG_PATH, from_env.display().to_string());

    let config = Config::load(Some(&explicit)).unwrap();
    assert_eq!(config.feed.poll_interval_secs, 2);

    clear_env();
}

#[test]
#[serial]
fn missing_env_path_is_an_error() {
    clear_env();
    let tmp = tempfile::tempdir().unwrap();
    env::set_var(
        ENV_CONFIG_PATH,
        tmp.path().join("absent.toml").display().to_string(),
    );

    assert!(matches!(Config::load(None), Err(AppError::Config(_))));

    clear_env();
}

#[test]
#[serial]
fn env_overrides_apply_after_the_file() {
    clear_env();
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("relay.toml");
    fs::write(&path, "[bus]\nbackend = \"kafka\"\nbrokers = [\"file:9092\"]\n").unwrap();
    env::set_var(ENV_TZ, "Asia/Tokyo");
    env::set_var(ENV_BROKERS, "a:9092, b:9092,,");
    env::set_var(ENV_GROUP_ID, "relay-test");

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.feed.time_zone, "Asia/Tokyo");
    assert_eq!(config.bus.backend, BusBackend::Kafka);
    assert_eq!(config.bus.brokers, vec!["a:9092", "b:9092"]);
    assert_eq!(config.bus.group_id, "relay-test");

    clear_env();
}

#[test]
#[serial]
fn invalid_time_zone_is_rejected_on_load() {
    clear_env();
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("relay.toml");
    fs::write(&path, "[feed]\ntime_zone = \"Mars/Olympus\"\n").unwrap();

    assert!(matches!(Config::load(Some(&path)), Err(AppError::Config(_))));

    clear_env();
}

#[test]
#[serial]
fn malformed_toml_is_a_toml_error() {
    clear_env();
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("relay.toml");
    fs::write(&path, "[feed\ntime_zone = ").unwrap();

    assert!(matches!(Config::load(Some(&path)), Err(AppError::Toml(_))));

    clear_env();
}

#[test]
#[serial]
fn zero_intervals_are_rejected_on_load() {
    clear_env();
    let tmp = tempfile::tempdir().unwrap();
    for body in ["[feed]\npoll_interval_secs = 0\n", "[cache]\nsweep_interval_secs = 0\n"] {
        let path = tmp.path().join("relay.toml");
        fs::write(&path, body).unwrap();
        assert!(matches!(Config::load(Some(&path)), Err(AppError::Config(_))), "{body}");
    }

    clear_env();
}
