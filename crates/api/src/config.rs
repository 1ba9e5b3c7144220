//! Process configuration, read from the environment at startup.

use counterflow_stock::NegativeStockPolicy;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// HS256 shared secret for bearer-token verification.
    pub jwt_secret: String,

    /// Socket address the HTTP server binds to.
    pub bind_addr: String,

    /// Acceptable absolute discrepancy (minor units) when closing a session.
    pub cash_tolerance: i64,

    /// What happens when a sale would drive a stock level negative.
    pub negative_stock_policy: NegativeStockPolicy,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| {
            tracing::warn!("JWT_SECRET not set; using insecure dev default");
            "dev-secret".to_string()
        });

        let bind_addr =
            std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let cash_tolerance = std::env::var("CASH_TOLERANCE_MINOR")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);

        let negative_stock_policy = match std::env::var("NEGATIVE_STOCK_POLICY").as_deref() {
            Ok("allow_with_flag") => NegativeStockPolicy::AllowWithFlag,
            Ok("block") | Err(_) => NegativeStockPolicy::Block,
            Ok(other) => {
                tracing::warn!("unknown NEGATIVE_STOCK_POLICY '{other}', defaulting to block");
                NegativeStockPolicy::Block
            }
        };

        Self {
            jwt_secret,
            bind_addr,
            cash_tolerance,
            negative_stock_policy,
        }
    }
}
