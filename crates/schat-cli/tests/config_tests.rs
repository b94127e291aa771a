//! Layered configuration loading

use figment::Jail;

use schat_cli::{CliError, SchatConfig};
use schat_core::InputMode;

#[test]
fn test_local_file_overrides_defaults() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "schat.toml",
            r#"
                [client]
                threads = 2
                input_mode = "thread"

                [policy]
                accept_hello = false

                [channel]
                hello_timeout_ms = 1500
            "#,
        )?;

        let config = SchatConfig::load().unwrap();
        assert_eq!(config.client.threads, Some(2));
        assert_eq!(config.client.input_mode, InputMode::Thread);
        assert_eq!(config.policy.accept_hello, Some(false));
        assert_eq!(config.channel.hello_timeout_ms, 1500);
        assert_eq!(config.log.level, "warn");
        Ok(())
    });
}

#[test]
fn test_environment_overrides_files() {
    Jail::expect_with(|jail| {
        jail.create_file("schat.toml", "[client]\nthreads = 2\n")?;
        jail.create_file("extra.toml", "[client]\nthreads = 4\nmax_line_length = 80\n")?;
        jail.set_env("SCHAT_CONFIG", "extra.toml");
        jail.set_env("SCHAT_CLIENT__THREADS", "3");
        jail.set_env("SCHAT_LOG__LEVEL", "debug");

        let config = SchatConfig::load().unwrap();
        assert_eq!(config.client.threads, Some(3));
        assert_eq!(config.client.max_line_length, 80);
        assert_eq!(config.log.level, "debug");
        Ok(())
    });
}

#[test]
fn test_named_file_overrides_local_file() {
    Jail::expect_with(|jail| {
        jail.create_file("schat.toml", "[channel]\nkeepalive_period_ms = 2000\n")?;
        jail.create_file("site.toml", "[channel]\nkeepalive_period_ms = 4000\n")?;
        jail.set_env("SCHAT_CONFIG", "site.toml");

        let config = SchatConfig::load().unwrap();
        assert_eq!(config.channel.keepalive_period_ms, 4000);
        Ok(())
    });
}

#[test]
fn test_invalid_values_are_rejected() {
    Jail::expect_with(|jail| {
        jail.create_file("schat.toml", "[client]\nmax_line_length = 0\n")?;
        assert!(matches!(SchatConfig::load(), Err(CliError::Core(_))));

        jail.create_file("schat.toml", "[client]\nthreads = \"many\"\n")?;
        assert!(matches!(SchatConfig::load(), Err(CliError::Config(_))));
        Ok(())
    });
}

#[test]
fn test_load_from_file_ignores_other_layers() {
    Jail::expect_with(|jail| {
        jail.create_file("only.toml", "[log]\nlevel = \"info\"\n")?;
        jail.set_env("SCHAT_LOG__LEVEL", "trace");

        let config = SchatConfig::load_from_file("only.toml").unwrap();
        assert_eq!(config.log.level, "info");
        assert_eq!(config.client, SchatConfig::default().client);
        Ok(())
    });
}
