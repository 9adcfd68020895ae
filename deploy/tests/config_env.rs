use deploy::{ConfigError, DeployConfig};
use image_builder::ImageVariant;
use serial_test::serial;

const KEYS: [&str; 4] = [
    "DOCLING_VARIANT",
    "DOCLING_PORT",
    "DOCKER_HUB_USERNAME",
    "DOCLING_HEALTH_ATTEMPTS",
];

fn clear_env() {
    for key in KEYS {
        std::env::remove_var(key);
    }
}

#[test]
#[serial]
fn test_load_reads_process_environment() {
    clear_env();
    std::env::set_var("DOCLING_VARIANT", "cpu");
    std::env::set_var("DOCLING_PORT", "8081");
    std::env::set_var("DOCKER_HUB_USERNAME", "alice");

    let config = DeployConfig::load(None).unwrap();
    clear_env();

    assert_eq!(config.variant, ImageVariant::Cpu);
    assert_eq!(config.port, 8081);
    assert_eq!(config.docker_hub_username.as_deref(), Some("alice"));
    assert_eq!(config.local_image(), "docling-serve-cpu:latest");
}

#[test]
#[serial]
fn test_load_rejects_bad_environment() {
    clear_env();
    std::env::set_var("DOCLING_HEALTH_ATTEMPTS", "many");

    let err = DeployConfig::load(None).unwrap_err();
    clear_env();

    assert!(matches!(
        err,
        ConfigError::InvalidValue {
            field: "DOCLING_HEALTH_ATTEMPTS",
            ..
        }
    ));
}

#[test]
#[serial]
fn test_defaults_without_environment() {
    clear_env();
    let config = DeployConfig::load(None).unwrap();
    assert_eq!(config.variant, ImageVariant::Gpu);
    assert_eq!(config.port, 5001);
    assert!(config.docker_hub_username.is_none());
}
