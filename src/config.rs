//! Application configuration, loaded from the environment (with `.env` as a
//! local-dev fallback), in the shape of the teacher's `models::Config::from_env`.

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_host: String,
    pub bind_port: u16,
    pub database_path: String,
    pub token_secret: String,
    pub token_ttl_seconds: i64,
    pub transport_grace_period_secs: u64,
    pub reconnect_backoff_cap_secs: u64,
    pub rest_request_timeout_secs: u64,
    pub rest_total_budget_secs: u64,
    pub ws_idle_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let bind_host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let bind_port = std::env::var("PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()
            .unwrap_or(8000);

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./bettergate.db".to_string());

        let token_secret = std::env::var("TOKEN_SECRET").unwrap_or_else(|_| {
            tracing::warn!("TOKEN_SECRET not set, using an insecure development default");
            "insecure-development-secret".to_string()
        });

        let token_ttl_seconds = std::env::var("TOKEN_TTL_SECONDS")
            .unwrap_or_else(|_| "1800".to_string())
            .parse()
            .unwrap_or(1800);

        let transport_grace_period_secs = std::env::var("TRANSPORT_GRACE_PERIOD_SECONDS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);

        let reconnect_backoff_cap_secs = std::env::var("RECONNECT_BACKOFF_CAP_SECONDS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);

        let rest_request_timeout_secs = std::env::var("REST_REQUEST_TIMEOUT_SECONDS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        let rest_total_budget_secs = std::env::var("REST_TOTAL_BUDGET_SECONDS")
            .unwrap_or_else(|_| "120".to_string())
            .parse()
            .unwrap_or(120);

        let ws_idle_timeout_secs = std::env::var("WS_IDLE_TIMEOUT_SECONDS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .unwrap_or(60);

        Ok(Self {
            bind_host,
            bind_port,
            database_path,
            token_secret,
            token_ttl_seconds,
            transport_grace_period_secs,
            reconnect_backoff_cap_secs,
            rest_request_timeout_secs,
            rest_total_budget_secs,
            ws_idle_timeout_secs,
        })
    }
}
