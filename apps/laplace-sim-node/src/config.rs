use config::{Config, ConfigError, Environment, File};
use laplace_transport_zmq::ZmqReplyAdapterConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::simulation::SimulationSettings;

pub const ENV_PREFIX: &str = "LAPLACE";

#[derive(Debug, Deserialize, Clone)]
pub struct SimNodeConfig {
    pub binding: Option<String>,
    #[serde(with = "humantime_serde")]
    pub receive_poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub startup_timeout: Duration,
    pub inbound_queue_capacity: usize,
    pub max_payload_hint: Option<usize>,
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
    pub max_iterations: Option<u64>,
    pub max_consecutive_failures: Option<u32>,
    pub keys_per_snapshot: usize,
    pub max_key_length: usize,
}

impl SimNodeConfig {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        Self::load(config_path, ENV_PREFIX)
    }

    pub fn load(config_path: Option<PathBuf>, env_prefix: &str) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("binding", None::<String>)?
            .set_default("receive_poll_interval", "50ms")?
            .set_default("startup_timeout", "2s")?
            .set_default("inbound_queue_capacity", 16)?
            .set_default("tick_interval", "0s")?
            .set_default("retry_backoff", "250ms")?
            .set_default("keys_per_snapshot", 5)?
            .set_default("max_key_length", 30)?;

        if let Some(path) = config_path {
            if path.extension().and_then(|ext| ext.to_str()) == Some("env") {
                // .env files feed the environment source below.
                match dotenvy::from_path(&path) {
                    Ok(_) => tracing::info!("loaded environment from {}", path.display()),
                    Err(err) => {
                        tracing::warn!("failed to load .env from {}: {}", path.display(), err)
                    }
                }
            } else {
                builder = builder.add_source(File::from(path));
            }
        }

        builder = builder.add_source(Environment::with_prefix(env_prefix).try_parsing(true));

        let cfg: Self = builder.build()?.try_deserialize()?;
        if cfg.max_key_length == 0 {
            return Err(ConfigError::Message(
                "max_key_length must be at least 1".to_string(),
            ));
        }
        Ok(cfg)
    }

    pub fn adapter_config(&self, endpoint: &str) -> ZmqReplyAdapterConfig {
        let mut adapter = ZmqReplyAdapterConfig::new(endpoint);
        adapter.inbound_queue_capacity = self.inbound_queue_capacity.max(1);
        adapter.receive_poll_interval = self.receive_poll_interval;
        adapter.startup_timeout = self.startup_timeout;
        adapter.max_payload_hint = self.max_payload_hint;
        adapter
    }

    pub fn simulation_settings(&self) -> SimulationSettings {
        SimulationSettings {
            tick_interval: self.tick_interval,
            retry_backoff: self.retry_backoff,
            max_iterations: self.max_iterations,
            max_consecutive_failures: self.max_consecutive_failures,
            keys_per_snapshot: self.keys_per_snapshot,
            max_key_length: self.max_key_length,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn with_env<F>(vars: &[(&str, &str)], test: F)
    where
        F: FnOnce(),
    {
        let mut old = Vec::new();
        for (k, v) in vars {
            old.push((k.to_string(), env::var(k).ok()));
            env::set_var(k, v);
        }

        test();

        for (k, maybe_old) in old {
            match maybe_old {
                Some(val) => env::set_var(k, val),
                None => env::remove_var(k),
            }
        }
    }

    #[test]
    fn defaults_are_applied() {
        let cfg = SimNodeConfig::load(None, "LAPLACE_TEST_DEFAULTS").expect("config");

        assert!(cfg.binding.is_none());
        assert_eq!(cfg.receive_poll_interval, Duration::from_millis(50));
        assert_eq!(cfg.startup_timeout, Duration::from_secs(2));
        assert_eq!(cfg.inbound_queue_capacity, 16);
        assert!(cfg.max_payload_hint.is_none());
        assert_eq!(cfg.tick_interval, Duration::ZERO);
        assert_eq!(cfg.retry_backoff, Duration::from_millis(250));
        assert!(cfg.max_iterations.is_none());
        assert!(cfg.max_consecutive_failures.is_none());
        assert_eq!(cfg.keys_per_snapshot, 5);
        assert_eq!(cfg.max_key_length, 30);
    }

    #[test]
    fn env_vars_override_defaults() {
        with_env(
            &[
                ("LAPLACE_TEST_ENV_BINDING", "5555"),
                ("LAPLACE_TEST_ENV_KEYS_PER_SNAPSHOT", "3"),
                ("LAPLACE_TEST_ENV_MAX_ITERATIONS", "10"),
                ("LAPLACE_TEST_ENV_TICK_INTERVAL", "5ms"),
                ("LAPLACE_TEST_ENV_RETRY_BACKOFF", "1s"),
            ],
            || {
                let cfg = SimNodeConfig::load(None, "LAPLACE_TEST_ENV").expect("config");
                assert_eq!(cfg.binding.as_deref(), Some("5555"));
                assert_eq!(cfg.keys_per_snapshot, 3);
                assert_eq!(cfg.max_iterations, Some(10));
                assert_eq!(cfg.tick_interval, Duration::from_millis(5));
                assert_eq!(cfg.retry_backoff, Duration::from_secs(1));
            },
        );
    }

    #[test]
    fn file_values_sit_between_defaults_and_env() {
        use std::io::Write;

        let mut tmp = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        writeln!(
            tmp,
            r#"
binding = "tcp://0.0.0.0:6000"
startup_timeout = "5s"
max_payload_hint = 4096
max_key_length = 8
"#
        )
        .expect("write to temp file");

        with_env(&[("LAPLACE_TEST_FILE_MAX_KEY_LENGTH", "12")], || {
            let cfg = SimNodeConfig::load(Some(PathBuf::from(tmp.path())), "LAPLACE_TEST_FILE")
                .expect("config");
            assert_eq!(cfg.binding.as_deref(), Some("tcp://0.0.0.0:6000"));
            assert_eq!(cfg.startup_timeout, Duration::from_secs(5));
            assert_eq!(cfg.max_payload_hint, Some(4096));
            assert_eq!(cfg.max_key_length, 12);
        });
    }

    #[test]
    fn dotenv_file_feeds_the_environment() {
        use std::io::Write;

        let mut tmp = tempfile::Builder::new()
            .suffix(".env")
            .tempfile()
            .expect("temp file");
        writeln!(tmp, "LAPLACE_TEST_DOTENV_BINDING=tcp://127.0.0.1:7100").expect("write");

        let cfg = SimNodeConfig::load(Some(PathBuf::from(tmp.path())), "LAPLACE_TEST_DOTENV")
            .expect("config");
        assert_eq!(cfg.binding.as_deref(), Some("tcp://127.0.0.1:7100"));
        env::remove_var("LAPLACE_TEST_DOTENV_BINDING");
    }

    #[test]
    fn zero_key_length_is_rejected() {
        with_env(&[("LAPLACE_TEST_ZERO_MAX_KEY_LENGTH", "0")], || {
            assert!(SimNodeConfig::load(None, "LAPLACE_TEST_ZERO").is_err());
        });
    }

    #[test]
    fn adapter_config_carries_transport_settings() {
        let mut cfg = SimNodeConfig::load(None, "LAPLACE_TEST_ADAPTER").expect("config");
        cfg.inbound_queue_capacity = 0;
        cfg.max_payload_hint = Some(512);

        let adapter = cfg.adapter_config("tcp://127.0.0.1:0");
        assert_eq!(adapter.endpoint, "tcp://127.0.0.1:0");
        assert_eq!(adapter.inbound_queue_capacity, 1);
        assert_eq!(adapter.receive_poll_interval, Duration::from_millis(50));
        assert_eq!(adapter.startup_timeout, Duration::from_secs(2));
        assert_eq!(adapter.max_payload_hint, Some(512));
    }
}
