use std::{env, str::FromStr, time::Duration};

use fee_payment_engine::{helpers::DEFAULT_REFERENCE_PREFIXES, EngineConfig};
use fpg_common::{parse_boolean_flag, Secret, DEFAULT_CURRENCY_CODE};
use log::*;

const DEFAULT_FPG_HOST: &str = "127.0.0.1";
const DEFAULT_FPG_PORT: u16 = 8370;
const DEFAULT_DATABASE_URL: &str = "sqlite://data/fee_store.db";
const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(3_000);
const DEFAULT_PROVIDER_UTC_OFFSET_HOURS: i32 = 3;
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_RETRY_MIN_AGE: Duration = Duration::from_secs(120);
const DEFAULT_NOTIFY_MAX_ATTEMPTS: u32 = 4;
const DEFAULT_NOTIFY_BASE_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_NOTIFY_MAX_DELAY: Duration = Duration::from_secs(30);
const DEFAULT_SCHOOL_NAME: &str = "School";

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// The billing currency. Payments in any other currency are failed.
    pub currency: String,
    /// The provider is always answered within this deadline, whether or not processing has finished.
    pub ack_timeout: Duration,
    /// When true, the validation endpoint rejects references that do not resolve to exactly one student.
    pub strict_validation: bool,
    /// The provider's `TransTime` values are local times at this offset from UTC.
    pub provider_utc_offset_hours: i32,
    pub reference_prefixes: Vec<String>,
    pub auto_apply_credit: bool,
    /// How often the retry worker runs
    pub retry_interval: Duration,
    /// Payments stuck in `Pending` or `Matched` for longer than this are re-driven by the retry worker
    pub retry_min_age: Duration,
    pub notifications: NotificationConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_FPG_HOST.to_string(),
            port: DEFAULT_FPG_PORT,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            currency: DEFAULT_CURRENCY_CODE.to_string(),
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            strict_validation: false,
            provider_utc_offset_hours: DEFAULT_PROVIDER_UTC_OFFSET_HOURS,
            reference_prefixes: DEFAULT_REFERENCE_PREFIXES.iter().map(|p| p.to_string()).collect(),
            auto_apply_credit: true,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            retry_min_age: DEFAULT_RETRY_MIN_AGE,
            notifications: NotificationConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("FPG_HOST").ok().unwrap_or_else(|| DEFAULT_FPG_HOST.into());
        let port = parse_env("FPG_PORT", DEFAULT_FPG_PORT);
        let database_url = env::var("FPG_DATABASE_URL").ok().unwrap_or_else(|| {
            warn!("🪛️ FPG_DATABASE_URL is not set. Using the default, {DEFAULT_DATABASE_URL}.");
            DEFAULT_DATABASE_URL.to_string()
        });
        let currency = env::var("FPG_CURRENCY")
            .ok()
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_CURRENCY_CODE.to_string());
        let ack_timeout = Duration::from_millis(parse_env("FPG_ACK_TIMEOUT_MS", DEFAULT_ACK_TIMEOUT.as_millis() as u64));
        let strict_validation = parse_boolean_flag(env::var("FPG_STRICT_VALIDATION").ok(), false);
        let provider_utc_offset_hours = parse_env("FPG_PROVIDER_UTC_OFFSET_HOURS", DEFAULT_PROVIDER_UTC_OFFSET_HOURS);
        let provider_utc_offset_hours = if (-12..=14).contains(&provider_utc_offset_hours) {
            provider_utc_offset_hours
        } else {
            warn!(
                "🪛️ FPG_PROVIDER_UTC_OFFSET_HOURS={provider_utc_offset_hours} is not a real timezone offset. Using \
                 +{DEFAULT_PROVIDER_UTC_OFFSET_HOURS} instead."
            );
            DEFAULT_PROVIDER_UTC_OFFSET_HOURS
        };
        let reference_prefixes = match env::var("FPG_REFERENCE_PREFIXES") {
            Ok(s) => parse_prefixes(&s),
            Err(_) => DEFAULT_REFERENCE_PREFIXES.iter().map(|p| p.to_string()).collect(),
        };
        let auto_apply_credit = parse_boolean_flag(env::var("FPG_AUTO_APPLY_CREDIT").ok(), true);
        let retry_interval =
            Duration::from_secs(parse_env("FPG_RETRY_INTERVAL_SECS", DEFAULT_RETRY_INTERVAL.as_secs()).max(1));
        let retry_min_age = Duration::from_secs(parse_env("FPG_RETRY_MIN_AGE_SECS", DEFAULT_RETRY_MIN_AGE.as_secs()));
        let notifications = NotificationConfig::from_env_or_default();
        Self {
            host,
            port,
            database_url,
            currency,
            ack_timeout,
            strict_validation,
            provider_utc_offset_hours,
            reference_prefixes,
            auto_apply_credit,
            retry_interval,
            retry_min_age,
            notifications,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_currency(self.currency.clone())
            .with_reference_prefixes(self.reference_prefixes.clone())
            .with_auto_apply_credit(self.auto_apply_credit)
    }
}

//-------------------------------------------------  NotificationConfig  -----------------------------------------------
#[derive(Clone, Debug)]
pub struct NotificationConfig {
    pub school_name: String,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// When `None`, SMS messages are written to the log instead of being sent.
    pub sms_gateway: Option<SmsGatewayConfig>,
}

#[derive(Clone, Debug)]
pub struct SmsGatewayConfig {
    pub url: String,
    pub api_key: Secret<String>,
    pub sender_id: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            school_name: DEFAULT_SCHOOL_NAME.to_string(),
            max_attempts: DEFAULT_NOTIFY_MAX_ATTEMPTS,
            base_delay: DEFAULT_NOTIFY_BASE_DELAY,
            max_delay: DEFAULT_NOTIFY_MAX_DELAY,
            sms_gateway: None,
        }
    }
}

impl NotificationConfig {
    pub fn from_env_or_default() -> Self {
        let school_name = env::var("FPG_SCHOOL_NAME").ok().unwrap_or_else(|| DEFAULT_SCHOOL_NAME.to_string());
        let max_attempts = parse_env("FPG_NOTIFY_MAX_ATTEMPTS", DEFAULT_NOTIFY_MAX_ATTEMPTS).max(1);
        let base_delay =
            Duration::from_millis(parse_env("FPG_NOTIFY_BASE_DELAY_MS", DEFAULT_NOTIFY_BASE_DELAY.as_millis() as u64));
        let sms_gateway = match (env::var("FPG_SMS_GATEWAY_URL"), env::var("FPG_SMS_API_KEY")) {
            (Ok(url), Ok(key)) => {
                let sender_id = env::var("FPG_SMS_SENDER_ID").ok().unwrap_or_else(|| school_name.clone());
                info!("🪛️ SMS confirmations will be sent through {url}");
                Some(SmsGatewayConfig { url, api_key: Secret::new(key), sender_id })
            },
            (Ok(_), Err(_)) => {
                warn!("🪛️ FPG_SMS_GATEWAY_URL is set but FPG_SMS_API_KEY is not. SMS messages will only be logged.");
                None
            },
            _ => {
                info!("🪛️ No SMS gateway is configured. SMS messages will only be logged.");
                None
            },
        };
        Self { school_name, max_attempts, base_delay, max_delay: DEFAULT_NOTIFY_MAX_DELAY, sms_gateway }
    }
}

//-------------------------------------------------  GatewayOptions  ---------------------------------------------------
/// The subset of the configuration that the webhook handlers need. Contains no secrets.
#[derive(Clone, Copy, Debug)]
pub struct GatewayOptions {
    pub ack_timeout: Duration,
    pub strict_validation: bool,
    pub provider_utc_offset_hours: i32,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

impl GatewayOptions {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            ack_timeout: config.ack_timeout,
            strict_validation: config.strict_validation,
            provider_utc_offset_hours: config.provider_utc_offset_hours,
        }
    }
}

fn parse_env<T>(name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(s) => s.trim().parse::<T>().unwrap_or_else(|e| {
            warn!("🪛️ {s} is not a valid value for {name}. {e} Using the default, {default}, instead.");
            default
        }),
        Err(_) => {
            debug!("🪛️ {name} is not set. Using the default, {default}.");
            default
        },
    }
}

fn parse_prefixes(s: &str) -> Vec<String> {
    let prefixes = s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect::<Vec<_>>();
    if prefixes.is_empty() {
        warn!("🪛️ FPG_REFERENCE_PREFIXES is empty. Account references will only be matched after normalization.");
    }
    prefixes
}
