use std::time::Duration;

use courier_core::Channel;
use courier_executor::RetryStrategy;

use super::*;

#[test]
fn empty_file_uses_defaults() {
    let config: CourierConfig = toml::from_str("").unwrap();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.queue.backend, "memory");
    assert_eq!(config.audit.backend, "memory");
    assert_eq!(config.queue.table_prefix, "courier_");
    assert!(config.functions.is_empty());
    assert!(config.health.enabled);
    assert_eq!(config.health.failure_threshold, 3);
    assert_eq!(config.background.workers, 1);
    assert_eq!(config.background.claim_timeout_seconds, 300);
}

#[test]
fn full_config() {
    let toml = r#"
        [server]
        host = "0.0.0.0"
        port = 9000

        [queue]
        backend = "postgres"
        url = "postgres://localhost/courier"
        schema = "ops"
        table_prefix = "app_"

        [executor]
        max_attempts = 3
        call_timeout_ms = 2500
        claim_batch_size = 50
        default_concurrency = 4

        [executor.channel_concurrency]
        sms = 1

        [executor.backoff]
        base_ms = 500
        max_ms = 60000
        jitter = false

        [[functions]]
        channel = "email"
        url = "https://fn.example.com/send-email"
        token_env = "COURIER_TOKEN"

        [[functions]]
        channel = "sms"
        name = "local-sms"
        kind = "log"

        [health]
        interval_seconds = 15
        failure_threshold = 5

        [background]
        workers = 3
        poll_interval_ms = 250
        claim_timeout_seconds = 120
    "#;
    let config: CourierConfig = toml::from_str(toml).unwrap();
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.queue.schema, "ops");
    assert_eq!(config.queue.url.as_deref(), Some("postgres://localhost/courier"));

    let exec = config
        .executor
        .to_executor_config(config.background.claim_timeout());
    assert_eq!(exec.max_attempts, 3);
    assert_eq!(exec.call_timeout, Duration::from_millis(2500));
    assert_eq!(exec.claim_batch_size, 50);
    assert_eq!(exec.claim_timeout, Duration::from_secs(120));
    assert_eq!(exec.concurrency_for(Channel::Sms), 1);
    assert_eq!(exec.concurrency_for(Channel::Email), 4);
    assert_eq!(
        exec.retry_strategy,
        RetryStrategy::Exponential {
            base: Duration::from_millis(500),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: false,
        }
    );

    assert_eq!(config.functions.len(), 2);
    assert_eq!(config.functions[0].kind, FunctionKind::Http);
    assert_eq!(config.functions[0].function_name(), "send-email");
    assert_eq!(config.functions[1].kind, FunctionKind::Log);
    assert_eq!(config.functions[1].function_name(), "local-sms");

    let prober = config.health.to_prober_config();
    assert_eq!(prober.failure_threshold, 5);
    assert_eq!(prober.timeout, Duration::from_secs(5));
}

#[test]
fn only_the_first_worker_probes_and_reclaims() {
    let background = BackgroundSection {
        workers: 2,
        ..BackgroundSection::default()
    };
    let health = HealthConfig::default();
    let first = background.worker_config(0, &health);
    let second = background.worker_config(1, &health);
    assert!(first.enable_probes && first.enable_reclaim);
    assert!(!second.enable_probes && !second.enable_reclaim);
    assert_eq!(first.dispatch_interval, Duration::from_secs(1));
    assert_eq!(first.probe_interval, Duration::from_secs(60));

    let disabled = HealthConfig {
        enabled: false,
        ..HealthConfig::default()
    };
    assert!(!background.worker_config(0, &disabled).enable_probes);
}

#[test]
fn unknown_channel_is_rejected() {
    let toml = r#"
        [[functions]]
        channel = "fax"
        url = "http://localhost"
    "#;
    assert!(toml::from_str::<CourierConfig>(toml).is_err());
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let (config, found) =
        CourierConfig::load(std::path::Path::new("/nonexistent/courier.toml")).unwrap();
    assert!(!found);
    assert_eq!(config.server.port, 8080);
}

#[test]
fn command_line_overrides_the_bind_address() {
    let config: CourierConfig = toml::from_str("[server]\nport = 9000").unwrap();
    assert_eq!(config.server.bind_addr(None, None), "127.0.0.1:9000");
    assert_eq!(
        config.server.bind_addr(Some("0.0.0.0"), Some(7000)),
        "0.0.0.0:7000"
    );
}
