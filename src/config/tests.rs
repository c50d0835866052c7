use super::GatewayConfig;
use std::path::Path;

#[test]
fn test_load_missing_file_uses_defaults() {
    let cfg = GatewayConfig::load(Path::new("/nonexistent/gateway.toml")).unwrap();
    assert_eq!(cfg.server.listen, "0.0.0.0:8080");
    assert_eq!(cfg.secret_prefix, "sk-gw-");
}

#[test]
fn test_load_toml_config() {
    let toml_str = r#"
secret_prefix = "sk-custom-"
cleanup_interval_secs = 120

[server]
listen = "127.0.0.1:9000"
"#;
    let tmp = std::env::temp_dir().join("relay_gateway_test_config.toml");
    std::fs::write(&tmp, toml_str).unwrap();
    let cfg = GatewayConfig::load(&tmp).unwrap();
    assert_eq!(cfg.secret_prefix, "sk-custom-");
    assert_eq!(cfg.cleanup_interval_secs, 120);
    assert_eq!(cfg.server.listen, "127.0.0.1:9000");
    std::fs::remove_file(&tmp).ok();
}

#[test]
fn test_load_json_config() {
    let json = r#"{
        "secret_prefix": "sk-json-",
        "request_timeout_secs": 30
    }"#;
    let tmp = std::env::temp_dir().join("relay_gateway_test_config.json");
    std::fs::write(&tmp, json).unwrap();
    let cfg = GatewayConfig::load(&tmp).unwrap();
    assert_eq!(cfg.secret_prefix, "sk-json-");
    assert_eq!(cfg.request_timeout_secs, 30);
    std::fs::remove_file(&tmp).ok();
}

#[test]
fn test_unsupported_format_errors() {
    let tmp = std::env::temp_dir().join("relay_gateway_test.yml");
    std::fs::write(&tmp, "key: value").unwrap();
    assert!(GatewayConfig::load(&tmp).is_err());
    std::fs::remove_file(&tmp).ok();
}

#[test]
fn test_validate_rejects_empty_prefix() {
    let mut cfg = GatewayConfig::default();
    cfg.secret_prefix = String::new();
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_rejects_zero_cleanup_interval() {
    let mut cfg = GatewayConfig::default();
    cfg.cleanup_interval_secs = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_rejects_bad_listen_address() {
    let mut cfg = GatewayConfig::default();
    cfg.server.listen = "not-an-address".to_string();
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_accepts_defaults() {
    assert!(GatewayConfig::default().validate().is_ok());
}

#[test]
fn test_env_override_precedence() {
    std::env::set_var("GATEWAY_SECRET_PREFIX", "sk-env-");
    let cfg = GatewayConfig::load(Path::new("/nonexistent/gateway.toml")).unwrap();
    assert_eq!(cfg.secret_prefix, "sk-env-");
    std::env::remove_var("GATEWAY_SECRET_PREFIX");
}
