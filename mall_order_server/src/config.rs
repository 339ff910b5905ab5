//! Server configuration.
//!
//! Every setting is read from a `MALL_*` environment variable and has a default. Values that fail to parse are
//! reported and replaced by their default, so a typo never stops the server from starting.
use std::{env, fmt::Display, str::FromStr, sync::Arc, time::Duration as StdDuration};

use chrono::Duration;
use log::*;
use mall_common::{helpers::parse_boolean_flag, Secret};
use mall_order_engine::{
    db_types::StoreId,
    gateway::{AlipayConfig, AlipayGateway},
    helpers::RetryPolicy,
    order_objects::OrderFlowConfig,
    payment_objects::PaymentFlowConfig,
    GatewayRegistry,
};

use crate::errors::ServerError;

const DEFAULT_MALL_HOST: &str = "127.0.0.1";
const DEFAULT_MALL_PORT: u16 = 8360;
const DEFAULT_DATABASE_URL: &str = "sqlite://data/mall_orders.db";
const DEFAULT_PAYMENT_TIMEOUT_SECS: i64 = 300;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
const DEFAULT_REFUND_MAX_RETRIES: u32 = 3;
const DEFAULT_REFUND_RETRY_DELAY_MS: u64 = 2000;
const DEFAULT_RESERVE_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_EVENT_BUFFER_SIZE: usize = 25;
const CONFLICT_BACKOFF: StdDuration = StdDuration::from_millis(25);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// How long a buyer has to pay, counted from checkout or from the latest trade request
    pub payment_timeout: Duration,
    /// How often the timeout worker sweeps the database for overdue payments it may have missed
    pub sweep_interval: StdDuration,
    /// Total gateway refund attempts, including the first
    pub refund_max_retries: u32,
    /// The refund back-off. The n-th retry waits n times this long.
    pub refund_retry_delay: StdDuration,
    /// Attempts at a checkout that keeps losing races for the same stock
    pub reserve_max_attempts: u32,
    /// The platform's own store. Its orders get no settlement share.
    pub platform_store_id: Option<StoreId>,
    pub event_buffer_size: usize,
    pub alipay: AlipaySettings,
}

#[derive(Clone, Debug, Default)]
pub struct AlipaySettings {
    pub enabled: bool,
    pub app_id: String,
    pub private_key: Secret<String>,
    pub public_key: String,
    pub gateway_url: Option<String>,
    pub notify_url: Option<String>,
    pub return_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_MALL_HOST.to_string(),
            port: DEFAULT_MALL_PORT,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            payment_timeout: Duration::seconds(DEFAULT_PAYMENT_TIMEOUT_SECS),
            sweep_interval: StdDuration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            refund_max_retries: DEFAULT_REFUND_MAX_RETRIES,
            refund_retry_delay: StdDuration::from_millis(DEFAULT_REFUND_RETRY_DELAY_MS),
            reserve_max_attempts: DEFAULT_RESERVE_MAX_ATTEMPTS,
            platform_store_id: None,
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
            alipay: AlipaySettings::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("MALL_HOST").ok().unwrap_or_else(|| DEFAULT_MALL_HOST.into());
        let port = env_or("MALL_PORT", DEFAULT_MALL_PORT);
        let database_url = env::var("MALL_DATABASE_URL").ok().unwrap_or_else(|| {
            warn!("🪛️ MALL_DATABASE_URL is not set. Using {DEFAULT_DATABASE_URL}.");
            DEFAULT_DATABASE_URL.to_string()
        });
        let timeout_secs = env_or("MALL_PAYMENT_TIMEOUT", DEFAULT_PAYMENT_TIMEOUT_SECS);
        let payment_timeout = if timeout_secs > 0 {
            Duration::seconds(timeout_secs)
        } else {
            warn!("🪛️ MALL_PAYMENT_TIMEOUT must be positive. Using {DEFAULT_PAYMENT_TIMEOUT_SECS}s instead.");
            Duration::seconds(DEFAULT_PAYMENT_TIMEOUT_SECS)
        };
        let sweep_interval =
            StdDuration::from_secs(env_or("MALL_TIMEOUT_SWEEP_INTERVAL", DEFAULT_SWEEP_INTERVAL_SECS).max(1));
        let refund_max_retries = env_or("MALL_REFUND_MAX_RETRIES", DEFAULT_REFUND_MAX_RETRIES);
        let refund_retry_delay =
            StdDuration::from_millis(env_or("MALL_REFUND_RETRY_DELAY_MS", DEFAULT_REFUND_RETRY_DELAY_MS));
        let reserve_max_attempts = env_or("MALL_RESERVE_MAX_ATTEMPTS", DEFAULT_RESERVE_MAX_ATTEMPTS);
        let platform_store_id = env::var("MALL_PLATFORM_STORE_ID").ok().and_then(|s| {
            s.trim()
                .parse::<StoreId>()
                .map_err(|e| warn!("🪛️ Ignoring invalid MALL_PLATFORM_STORE_ID ({s}). {e}"))
                .ok()
        });
        let event_buffer_size = env_or("MALL_EVENT_BUFFER_SIZE", DEFAULT_EVENT_BUFFER_SIZE);
        let alipay = AlipaySettings::from_env();
        Self {
            host,
            port,
            database_url,
            payment_timeout,
            sweep_interval,
            refund_max_retries,
            refund_retry_delay,
            reserve_max_attempts,
            platform_store_id,
            event_buffer_size,
            alipay,
        }
    }

    pub fn payment_flow_config(&self) -> PaymentFlowConfig {
        PaymentFlowConfig {
            timeout_window: self.payment_timeout,
            refund_retry: RetryPolicy::new(self.refund_max_retries, self.refund_retry_delay),
            platform_store_id: self.platform_store_id,
            ..Default::default()
        }
    }

    pub fn order_flow_config(&self) -> OrderFlowConfig {
        OrderFlowConfig { conflict_retry: RetryPolicy::new(self.reserve_max_attempts, CONFLICT_BACKOFF) }
    }

    /// Builds a gateway for every enabled payment method. A method that is enabled but misconfigured is an error.
    pub fn gateway_registry(&self) -> Result<GatewayRegistry, ServerError> {
        let mut registry = GatewayRegistry::new();
        if self.alipay.enabled {
            let gateway = AlipayGateway::new(self.alipay.gateway_config())?;
            registry.register(Arc::new(gateway));
            info!("🪛️ Alipay gateway enabled for app {}", self.alipay.app_id);
        } else {
            warn!("🪛️ No payment gateway is enabled. Buyers will not be able to pay.");
        }
        Ok(registry)
    }
}

impl AlipaySettings {
    pub fn from_env() -> Self {
        let enabled = parse_boolean_flag(env::var("MALL_ALIPAY_ENABLED").ok(), false);
        let app_id = env::var("MALL_ALIPAY_APP_ID").unwrap_or_default();
        let private_key = Secret::new(env::var("MALL_ALIPAY_PRIVATE_KEY").unwrap_or_default());
        let public_key = env::var("MALL_ALIPAY_PUBLIC_KEY").unwrap_or_default();
        if enabled && (app_id.is_empty() || private_key.is_empty() || public_key.is_empty()) {
            error!(
                "🪛️ Alipay is enabled, but MALL_ALIPAY_APP_ID, MALL_ALIPAY_PRIVATE_KEY and MALL_ALIPAY_PUBLIC_KEY \
                 must all be set."
            );
        }
        let optional = |name: &str| env::var(name).ok().filter(|s| !s.trim().is_empty());
        Self {
            enabled,
            app_id,
            private_key,
            public_key,
            gateway_url: optional("MALL_ALIPAY_GATEWAY_URL"),
            notify_url: optional("MALL_ALIPAY_NOTIFY_URL"),
            return_url: optional("MALL_ALIPAY_RETURN_URL"),
        }
    }

    pub fn gateway_config(&self) -> AlipayConfig {
        let defaults = AlipayConfig::default();
        AlipayConfig {
            app_id: self.app_id.clone(),
            private_key: self.private_key.clone(),
            alipay_public_key: self.public_key.clone(),
            gateway_url: self.gateway_url.clone().unwrap_or(defaults.gateway_url),
            notify_url: self.notify_url.clone(),
            return_url: self.return_url.clone(),
        }
    }
}

fn env_or<T>(name: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(name) {
        Ok(s) => s.trim().parse::<T>().unwrap_or_else(|e| {
            warn!("🪛️ {s} is not a valid value for {name}. {e} Using the default, {default}, instead.");
            default
        }),
        Err(_) => {
            debug!("🪛️ {name} is not set. Using the default value of {default}.");
            default
        },
    }
}
