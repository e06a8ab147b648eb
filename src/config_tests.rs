#[cfg(test)]
mod tests {
    use crate::config::*;

    #[test]
    fn test_default_limit_config() {
        let config = LimitConfig::default();
        assert_eq!(config.daily_free_quota, 3);
        assert_eq!(config.max_clip_secs, 60);
    }

    #[test]
    fn test_default_media_config() {
        let config = MediaConfig::default();
        assert_eq!(config.note_length, 400);
        assert_eq!(config.transcode_timeout_secs, 120);
    }

    #[test]
    fn test_default_payment_config() {
        let config = PaymentConfig::default();
        assert_eq!(config.cryptopay_base_url, "https://pay.crypt.bot");
        assert_eq!(config.poll_interval_secs, 60);
        assert_eq!(config.premium_days, 365);
    }

    #[test]
    fn test_default_broadcast_config() {
        let config = BroadcastConfig::default();
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.batch_pause_ms, 1_000);
        assert_eq!(config.progress_every, 100);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
            [telegram]
            bot_token = "123:abc"
            admin_user_id = 42
        "#;
        let config: Config = toml::from_str(toml).expect("parse");
        assert_eq!(config.telegram.bot_token, "123:abc");
        assert_eq!(config.telegram.admin_user_id, 42);
        // Unspecified sections fall back to defaults
        assert_eq!(config.limits.daily_free_quota, 3);
        assert_eq!(config.database.url, "sqlite://roundnote.db?mode=rwc");
    }

    #[test]
    fn test_parse_toml_overrides() {
        let toml = r#"
            [telegram]
            bot_token = "123:abc"

            [limits]
            max_clip_secs = 90

            [payments]
            poll_interval_secs = 15
            price_stars = 500

            [broadcast]
            batch_size = 10
        "#;
        let config: Config = toml::from_str(toml).expect("parse");
        assert_eq!(config.limits.max_clip_secs, 90);
        // Unset field in a present section still defaults
        assert_eq!(config.limits.daily_free_quota, 3);
        assert_eq!(config.payments.poll_interval_secs, 15);
        assert_eq!(config.payments.price_stars, 500);
        assert_eq!(config.broadcast.batch_size, 10);
    }

    #[test]
    fn test_from_file_missing_path_errors() {
        let err = Config::from_file("/nonexistent/roundnote.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
