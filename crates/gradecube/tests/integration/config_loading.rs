use gradecube::{Config, ConfigError, Language, RuntimeTable};

use super::FIXTURES_PATH;

fn load(name: &str) -> Result<Config, ConfigError> {
    Config::from_file(format!("{FIXTURES_PATH}/configs/{name}"))
}

#[test]
fn test_load_valid_config() {
    let config = load("valid_full.toml").expect("Failed to load config");

    assert_eq!(config.max_concurrent_sandboxes, 3);
    assert_eq!(config.grading_workers, 6);
    assert_eq!(config.policy.user, "runner");
    assert_eq!(config.policy.mount_path, "/work");
    assert!(config.policy.tmpfs.is_empty());
    assert_eq!(
        config.configured_languages(),
        vec![Language::Python, Language::Java]
    );

    let java = config.runtime(Language::Java).unwrap();
    let limits = config.language_limits(java);
    assert_eq!(limits.memory_limit_mb, Some(256));
    assert_eq!(limits.timeout_seconds, Some(8));
}

#[test]
fn test_runtime_table_from_fixture() {
    let config = load("valid_full.toml").unwrap();
    let table = RuntimeTable::from_config(&config).unwrap();

    let java = table.get(Language::Java).unwrap();
    assert_eq!(java.image, "java-runner:test");
    assert_eq!(
        java.command,
        vec!["sh", "-c", "javac *.java && java TestRunner test_data.json"]
    );
    assert!(java.aux_files.iter().any(|(name, _)| name == "MiniJson.java"));
    assert!(table.get(Language::JavaScript).is_none());
}

#[test]
fn test_load_minimal_config() {
    let config = load("valid_minimal.toml").expect("Failed to load config");

    assert_eq!(config.configured_languages(), vec![Language::JavaScript]);
    assert_eq!(config.max_concurrent_sandboxes, 5);
    assert_eq!(config.default_limits.timeout_seconds, Some(10));
}

#[test]
fn test_load_invalid_root_user() {
    assert!(matches!(
        load("invalid_root_user.toml"),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_load_invalid_unknown_language() {
    assert!(matches!(
        load("invalid_unknown_language.toml"),
        Err(ConfigError::UnknownLanguage(_))
    ));
}

#[test]
fn test_load_invalid_empty_command() {
    assert!(load("invalid_empty_command.toml").is_err());
}

#[test]
fn test_load_invalid_duplicate_file() {
    assert!(load("invalid_duplicate_file.toml").is_err());
}

#[test]
fn test_load_invalid_zero_sandboxes() {
    assert!(load("invalid_zero_sandboxes.toml").is_err());
}

#[test]
fn test_missing_file() {
    assert!(load("does_not_exist.toml").is_err());
}

#[test]
fn test_example_config_matches_default() {
    let config = Config::parse_toml(gradecube::EXAMPLE_CONFIG).unwrap();
    assert_eq!(
        config.configured_languages(),
        Config::default().configured_languages()
    );
}

#[test]
fn test_load_file_with_env_overlay() {
    let path = format!("{FIXTURES_PATH}/configs/valid_full.toml");
    let config = Config::from_file_with_env(Some(std::path::Path::new(&path)))
        .expect("Failed to load config");

    assert_eq!(config.max_concurrent_sandboxes, 3);
    assert_eq!(
        config.configured_languages(),
        vec![Language::Python, Language::Java]
    );
}

#[test]
fn test_load_env_overlay_without_file() {
    let config = Config::from_file_with_env(None).expect("Failed to load config");
    assert_eq!(
        config.configured_languages(),
        Config::default().configured_languages()
    );
}
