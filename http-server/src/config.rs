use crash_engine::EngineConfig;
use crash_engine::round::RoundConfig;
use std::time::Duration;

/// Runtime settings, read once from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// SQLite file, or `:memory:`
    pub db_path: String,
    pub countdown_secs: u32,
    pub tick_ms: u64,
    pub cooldown_ms: u64,
    pub instant_probability: f64,
    pub history_cap: usize,
    pub signup_bonus: f64,
    /// Bearer token for admin requests; admin is open when unset
    pub admin_token: Option<String>,
    pub rng_seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            db_path: "crash.sqlite3".to_string(),
            countdown_secs: 8,
            tick_ms: 50,
            cooldown_ms: 4_000,
            instant_probability: 0.20,
            history_cap: 25,
            signup_bonus: 50.0,
            admin_token: None,
            rng_seed: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("CRASH_HOST").unwrap_or(defaults.host),
            port: read_env("CRASH_PORT", defaults.port),
            db_path: std::env::var("CRASH_DB_PATH").unwrap_or(defaults.db_path),
            countdown_secs: read_env("CRASH_COUNTDOWN_SECS", defaults.countdown_secs),
            tick_ms: read_env("CRASH_TICK_MS", defaults.tick_ms),
            cooldown_ms: read_env("CRASH_COOLDOWN_MS", defaults.cooldown_ms),
            instant_probability: read_env(
                "CRASH_INSTANT_PROBABILITY",
                defaults.instant_probability,
            ),
            history_cap: read_env("CRASH_HISTORY_CAP", defaults.history_cap),
            signup_bonus: read_env("CRASH_SIGNUP_BONUS", defaults.signup_bonus),
            admin_token: std::env::var("CRASH_ADMIN_TOKEN")
                .ok()
                .filter(|token| !token.is_empty()),
            rng_seed: std::env::var("CRASH_RNG_SEED")
                .ok()
                .and_then(|raw| raw.parse().ok()),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Engine settings; out-of-range values are clamped by the engine
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            round: RoundConfig {
                countdown_secs: self.countdown_secs,
                tick_interval: Duration::from_millis(self.tick_ms),
                cooldown: Duration::from_millis(self.cooldown_ms),
            },
            instant_probability: self.instant_probability,
            history_cap: self.history_cap,
            signup_bonus: self.signup_bonus,
        }
    }
}

fn read_env<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(fallback)
}
