use once_cell::sync::Lazy;
use std::env;
use std::time::Duration;

/// Port for the public web server
/// Read from PORT environment variable
/// Default: 8000
pub static PORT: Lazy<u16> = Lazy::new(|| {
    env::var("PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8000)
});

/// Database file path
/// Read from DATABASE_PATH environment variable
/// Default: shipments.db
pub static DATABASE_PATH: Lazy<String> =
    Lazy::new(|| env::var("DATABASE_PATH").unwrap_or_else(|_| "shipments.db".to_string()));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: signment.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "signment.log".to_string()));

/// Redis connection URL. When unset or unreachable the cache and the
/// notification queue fall back to an in-process backend.
pub static REDIS_URL: Lazy<Option<String>> = Lazy::new(|| {
    env::var("REDIS_URL")
        .ok()
        .and_then(|s| if s.trim().is_empty() { None } else { Some(s) })
});

/// Bot token
/// Read from TELEGRAM_BOT_TOKEN or BOT_TOKEN environment variable
pub static BOT_TOKEN: Lazy<String> = Lazy::new(|| {
    env::var("TELEGRAM_BOT_TOKEN")
        .or_else(|_| env::var("BOT_TOKEN"))
        .unwrap_or_else(|_| String::new())
});

/// Webhook URL for Telegram updates (webhook mode only)
/// Read from WEBHOOK_URL environment variable
pub static WEBHOOK_URL: Lazy<Option<String>> = Lazy::new(|| env::var("WEBHOOK_URL").ok());

/// Public base URL of this deployment. Used for tracking links in
/// notification email and as the default webhook target.
pub static PUBLIC_BASE_URL: Lazy<String> =
    Lazy::new(|| env::var("PUBLIC_BASE_URL").unwrap_or_else(|_| "http://localhost:8000".to_string()));

/// Global webhook URL used when a shipment has no webhook of its own
/// Read from GLOBAL_WEBHOOK_URL environment variable
pub static GLOBAL_WEBHOOK_URL: Lazy<Option<String>> = Lazy::new(|| {
    env::var("GLOBAL_WEBHOOK_URL")
        .ok()
        .and_then(|s| if s.trim().is_empty() { None } else { Some(s) })
});

/// Geocoding API key for checkpoint coordinates (geocode.maps.co)
/// Read from GEOCODING_API_KEY environment variable
pub static GEOCODING_API_KEY: Lazy<String> =
    Lazy::new(|| env::var("GEOCODING_API_KEY").unwrap_or_else(|_| String::new()));

/// Tawk chat widget identifiers, embedded into the tracking page
pub static TAWK_PROPERTY_ID: Lazy<String> =
    Lazy::new(|| env::var("TAWK_PROPERTY_ID").unwrap_or_else(|_| String::new()));
pub static TAWK_WIDGET_ID: Lazy<String> =
    Lazy::new(|| env::var("TAWK_WIDGET_ID").unwrap_or_else(|_| String::new()));

/// Admin configuration
pub mod admin {
    use once_cell::sync::Lazy;
    use std::env;

    fn parse_admin_ids(raw: &str) -> Vec<i64> {
        raw.split([',', ' ', '\n', '\t'])
            .filter_map(|part| part.trim().parse::<i64>().ok())
            .collect()
    }

    /// Telegram user IDs allowed to use admin commands (comma-separated)
    /// Read from ALLOWED_ADMINS environment variable
    pub static ALLOWED_ADMINS: Lazy<Vec<i64>> = Lazy::new(|| {
        env::var("ALLOWED_ADMINS")
            .ok()
            .map(|raw| parse_admin_ids(&raw))
            .unwrap_or_default()
    });

    /// Admin user ID for direct notifications (startup, task failures)
    /// Read from ADMIN_USER_ID or fallback to first ALLOWED_ADMINS entry
    pub static ADMIN_USER_ID: Lazy<i64> = Lazy::new(|| {
        env::var("ADMIN_USER_ID")
            .ok()
            .and_then(|s| s.parse().ok())
            .or_else(|| ALLOWED_ADMINS.first().copied())
            .unwrap_or(0)
    });

    #[cfg(test)]
    mod tests {
        use super::parse_admin_ids;

        #[test]
        fn test_parse_admin_ids_mixed_separators() {
            assert_eq!(parse_admin_ids("1,2 3\n4"), vec![1, 2, 3, 4]);
            assert_eq!(parse_admin_ids(""), Vec::<i64>::new());
            assert_eq!(parse_admin_ids("12, not-a-number, 34"), vec![12, 34]);
        }
    }
}

/// SMTP configuration for email notifications
pub mod smtp {
    use once_cell::sync::Lazy;
    use std::env;

    pub static HOST: Lazy<String> = Lazy::new(|| env::var("SMTP_HOST").unwrap_or_else(|_| "smtp.gmail.com".to_string()));

    pub static PORT: Lazy<u16> = Lazy::new(|| {
        env::var("SMTP_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(587)
    });

    pub static USER: Lazy<String> = Lazy::new(|| env::var("SMTP_USER").unwrap_or_else(|_| String::new()));

    pub static PASS: Lazy<String> = Lazy::new(|| env::var("SMTP_PASS").unwrap_or_else(|_| String::new()));

    pub static FROM: Lazy<String> =
        Lazy::new(|| env::var("SMTP_FROM").unwrap_or_else(|_| "no-reply@example.com".to_string()));

    /// Email delivery is enabled only when credentials are configured.
    pub fn is_configured() -> bool {
        !USER.is_empty() && !PASS.is_empty()
    }
}

/// reCAPTCHA configuration for the public track endpoint
pub mod recaptcha {
    use once_cell::sync::Lazy;
    use std::env;

    pub const VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";

    /// Minimum score accepted from the v3 verification response
    pub const MIN_SCORE: f64 = 0.5;

    pub static SITE_KEY: Lazy<String> =
        Lazy::new(|| env::var("RECAPTCHA_SITE_KEY").unwrap_or_else(|_| String::new()));

    pub static SECRET_KEY: Lazy<String> =
        Lazy::new(|| env::var("RECAPTCHA_SECRET_KEY").unwrap_or_else(|_| String::new()));

    /// Verification is skipped when the secret is unset or still the
    /// placeholder from the sample environment.
    pub fn is_enabled() -> bool {
        !SECRET_KEY.is_empty() && !SECRET_KEY.contains("your-secret-key")
    }
}

/// Rate limiting configuration
pub mod rate_limit {
    use super::Duration;

    /// Window for bot command rate limiting (in seconds)
    pub const BOT_WINDOW_SECONDS: u64 = 60;

    /// Maximum bot commands per window per chat
    pub const BOT_MAX_PER_WINDOW: u32 = 10;

    /// Window for the public track endpoint (in seconds)
    pub const WEB_WINDOW_SECONDS: u64 = 3600;

    /// Maximum track requests per window per client
    pub const WEB_MAX_PER_WINDOW: u32 = 50;

    pub fn bot_window() -> Duration {
        Duration::from_secs(BOT_WINDOW_SECONDS)
    }

    pub fn web_window() -> Duration {
        Duration::from_secs(WEB_WINDOW_SECONDS)
    }
}

/// Retry configuration
pub mod retry {
    use super::Duration;

    /// Maximum delivery attempts for a single notification
    pub const MAX_DELIVERY_ATTEMPTS: u32 = 3;

    /// Base delay between delivery attempts (in seconds)
    pub const DELIVERY_DELAY_SECS: u64 = 5;

    /// Maximum number of retries for dispatcher reconnection
    pub const MAX_DISPATCHER_RETRIES: u32 = 5;

    /// Delay between dispatcher retry attempts (in seconds)
    pub const DISPATCHER_RETRY_DELAY_SECS: u64 = 5;

    /// Base for exponential backoff calculation
    pub const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

    pub fn delivery_delay() -> Duration {
        Duration::from_secs(DELIVERY_DELAY_SECS)
    }

    pub fn dispatcher_delay() -> Duration {
        Duration::from_secs(DISPATCHER_RETRY_DELAY_SECS)
    }
}

/// Simulation tuning
pub mod simulation {
    use super::Duration;

    /// Hard cap on how long a single simulation may run (in days)
    pub const MAX_SIMULATION_DAYS: i64 = 30;

    /// Poll interval while a simulation is paused (in seconds)
    pub const PAUSED_POLL_SECS: u64 = 5;

    /// Consecutive database failures tolerated before a simulation stops
    pub const MAX_DB_RETRIES: u32 = 5;

    /// Speed multiplier clamp range
    pub const MIN_SPEED_MULTIPLIER: f64 = 0.1;
    pub const MAX_SPEED_MULTIPLIER: f64 = 10.0;

    pub fn paused_poll() -> Duration {
        Duration::from_secs(PAUSED_POLL_SECS)
    }
}

/// Network configuration
pub mod network {
    use super::Duration;

    /// Timeout for outbound HTTP requests (webhooks, reCAPTCHA, geocoding)
    pub const REQUEST_TIMEOUT_SECS: u64 = 5;

    /// Timeout for Telegram Bot API requests
    pub const TELEGRAM_TIMEOUT_SECS: u64 = 30;

    pub fn timeout() -> Duration {
        Duration::from_secs(REQUEST_TIMEOUT_SECS)
    }

    pub fn telegram_timeout() -> Duration {
        Duration::from_secs(TELEGRAM_TIMEOUT_SECS)
    }
}

/// Cache TTLs (in seconds)
pub mod cache_ttl {
    /// Cached shipment details
    pub const SHIPMENT_SECS: u64 = 3600;

    /// Cached route templates
    pub const ROUTE_TEMPLATES_SECS: u64 = 86400;

    /// Cached geocoding results
    pub const GEOCODE_SECS: u64 = 86400;
}

/// Metrics and monitoring configuration
pub mod metrics {
    use once_cell::sync::Lazy;
    use std::env;

    /// Enable metrics collection and HTTP server
    /// Read from METRICS_ENABLED environment variable
    /// Default: true
    pub static ENABLED: Lazy<bool> = Lazy::new(|| {
        env::var("METRICS_ENABLED")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(true)
    });

    /// Port for metrics HTTP server
    /// Read from METRICS_PORT environment variable
    /// Default: 9090
    pub static PORT: Lazy<u16> = Lazy::new(|| {
        env::var("METRICS_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(9090)
    });
}

/// Keep-alive self-ping configuration. Free-tier hosts idle the
/// container out unless something keeps hitting it.
pub mod keep_alive {
    use once_cell::sync::Lazy;
    use std::env;

    /// Enable the periodic self-ping of /health
    /// Read from KEEP_ALIVE_ENABLED environment variable
    /// Default: false (only useful on sleep-prone hosts)
    pub static ENABLED: Lazy<bool> = Lazy::new(|| {
        env::var("KEEP_ALIVE_ENABLED")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false)
    });

    /// Seconds between pings
    pub const INTERVAL_SECS: u64 = 60;

    /// Ping attempts before giving up for this interval
    pub const MAX_ATTEMPTS: u32 = 3;
}
