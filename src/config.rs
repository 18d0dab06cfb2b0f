use std::env;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://./data/botglam.db";
pub const DEFAULT_PAYSTACK_URL: &str = "https://api.paystack.co";
pub const DEFAULT_EMAIL_API_URL: &str = "https://api.resend.com/emails";

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub public_base_url: String,
    pub paystack: PaystackConfig,
    pub email: EmailConfig,
}

#[derive(Clone, Debug)]
pub struct PaystackConfig {
    pub secret_key: String,
    pub base_url: String,
}

#[derive(Clone, Debug)]
pub struct EmailConfig {
    pub api_key: String,
    pub api_url: String,
    pub from: String,
}

impl EmailConfig {
    pub fn enabled(&self) -> bool {
        !(self.api_key.trim().is_empty() || self.from.trim().is_empty())
    }

    pub fn disabled() -> Self {
        Self {
            api_key: String::new(),
            api_url: DEFAULT_EMAIL_API_URL.to_string(),
            from: String::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let port = env::var("PORT")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(8080);

        let public_base_url = env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{port}"))
            .trim_end_matches('/')
            .to_string();

        let paystack = PaystackConfig {
            secret_key: env::var("PAYSTACK_SECRET_KEY").unwrap_or_default(),
            base_url: env::var("PAYSTACK_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_PAYSTACK_URL.to_string()),
        };
        if paystack.secret_key.trim().is_empty() {
            log::warn!("PAYSTACK_SECRET_KEY not set. Deposit payments will fail at the gateway.");
        }

        let email = EmailConfig {
            api_key: env::var("EMAIL_API_KEY").unwrap_or_default(),
            api_url: env::var("EMAIL_API_URL")
                .unwrap_or_else(|_| DEFAULT_EMAIL_API_URL.to_string()),
            from: env::var("EMAIL_FROM").unwrap_or_default(),
        };

        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            port,
            public_base_url,
            paystack,
            email,
        }
    }
}
