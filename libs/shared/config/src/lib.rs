use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_service_key: String,
    pub jwt_secret: String,
    pub jwt_ttl_hours: i64,
    pub vnpay_tmn_code: String,
    pub vnpay_hash_secret: String,
    pub vnpay_url: String,
    pub vnpay_return_url: String,
    pub slot_duration_minutes: i64,
    pub cancellation_notice_hours: i64,
    pub server_port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_service_key: env::var("SUPABASE_SERVICE_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_SERVICE_KEY not set, using empty value");
                    String::new()
                }),
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("JWT_SECRET not set, using empty value");
                    String::new()
                }),
            jwt_ttl_hours: parse_or("JWT_TTL_HOURS", 24),
            vnpay_tmn_code: env::var("VNPAY_TMN_CODE")
                .unwrap_or_else(|_| {
                    warn!("VNPAY_TMN_CODE not set, using empty value");
                    String::new()
                }),
            vnpay_hash_secret: env::var("VNPAY_HASH_SECRET")
                .unwrap_or_else(|_| {
                    warn!("VNPAY_HASH_SECRET not set, using empty value");
                    String::new()
                }),
            vnpay_url: env::var("VNPAY_URL")
                .unwrap_or_else(|_| {
                    warn!("VNPAY_URL not set, using sandbox default");
                    "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".to_string()
                }),
            vnpay_return_url: env::var("VNPAY_RETURN_URL")
                .unwrap_or_else(|_| {
                    warn!("VNPAY_RETURN_URL not set, using empty value");
                    String::new()
                }),
            slot_duration_minutes: parse_or("SLOT_DURATION_MINUTES", 30),
            cancellation_notice_hours: parse_or("CANCELLATION_NOTICE_HOURS", 24),
            server_port: parse_or("SERVER_PORT", 3000),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_service_key.is_empty()
            && !self.jwt_secret.is_empty()
    }

    pub fn is_payment_gateway_configured(&self) -> bool {
        !self.vnpay_tmn_code.is_empty()
            && !self.vnpay_hash_secret.is_empty()
            && !self.vnpay_return_url.is_empty()
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has an invalid value '{}', using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}
