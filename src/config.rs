use failure::Error;
use std::env;
use std::time::Duration;
use url::Url;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_SOAP_URL: &str = "https://prm.citycarpark.my/CCP_ArchService/MessageGateway.svc";
const DEFAULT_SOAP_ACTION: &str = "http://www.citycarpark.my/MessageGatewayService/ProcessMessage";
const DEFAULT_PAYMENT_BASE_URL: &str = "http://220.158.208.216:3000/payment/public/lpr/";
const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Static credentials sent in every SOAP header.
#[derive(Debug, Clone, PartialEq)]
pub struct AgencyCredentials {
    pub request_code: String,
    pub agency_id: String,
    pub agency_key: String,
}

/// Fixed identifiers the payment gateway expects on each order.
#[derive(Debug, Clone, PartialEq)]
pub struct MerchantProfile {
    pub store_id: String,
    pub terminal_id: String,
    pub shift_id: String,
    pub whatsapp_no: String,
    pub language: String,
    pub whatsapp_template_id: String,
    pub qr_validity: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub soap_url: Url,
    pub soap_action: String,
    pub agency: AgencyCredentials,
    pub payment_token_url: Url,
    pub payment_qr_url: Url,
    pub merchant: MerchantProfile,
    pub upstream_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Config, Error> {
        Config::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let require = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| format_err!("{} environment variable unset", key))
        };

        let port_raw = get("PORT", &DEFAULT_PORT.to_string());
        let port = port_raw
            .parse::<u16>()
            .map_err(|e| format_err!("Invalid PORT '{}': {}", port_raw, e))?;

        let timeout_raw = get("UPSTREAM_TIMEOUT_SECS", &DEFAULT_TIMEOUT_SECS.to_string());
        let timeout_secs = timeout_raw
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or_else(|| format_err!("Invalid UPSTREAM_TIMEOUT_SECS '{}'", timeout_raw))?;

        let soap_url = parse_url("SUMMONS_SOAP_URL", &get("SUMMONS_SOAP_URL", DEFAULT_SOAP_URL))?;
        let payment_base = payment_base_url(&get("PAYMENT_BASE_URL", DEFAULT_PAYMENT_BASE_URL))?;

        Ok(Config {
            port,
            soap_url,
            soap_action: get("SUMMONS_SOAP_ACTION", DEFAULT_SOAP_ACTION),
            agency: AgencyCredentials {
                request_code: get("SUMMONS_REQUEST_CODE", "REQ_11"),
                agency_id: require("SUMMONS_AGENCY_ID")?,
                agency_key: require("SUMMONS_AGENCY_KEY")?,
            },
            payment_token_url: payment_base.join("token")?,
            payment_qr_url: payment_base.join("generate-qr")?,
            merchant: MerchantProfile {
                store_id: require("PAYMENT_STORE_ID")?,
                terminal_id: require("PAYMENT_TERMINAL_ID")?,
                shift_id: get("PAYMENT_SHIFT_ID", "Success"),
                whatsapp_no: get("PAYMENT_WHATSAPP_NO", "+60123456789"),
                language: get("PAYMENT_LANGUAGE", "en_us"),
                whatsapp_template_id: get("PAYMENT_WHATSAPP_TEMPLATE", "payment_qr"),
                qr_validity: get("PAYMENT_QR_VALIDITY", "99999"),
            },
            upstream_timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// One client for both upstreams; the timeout bounds every call made
    /// through it.
    pub fn http_client(&self) -> Result<reqwest::Client, Error> {
        Ok(reqwest::Client::builder()
            .timeout(self.upstream_timeout)
            .build()?)
    }
}

fn parse_url(key: &str, raw: &str) -> Result<Url, Error> {
    Url::parse(raw).map_err(|e| format_err!("Invalid {} '{}': {}", key, raw, e))
}

/// `Url::join` drops the last path segment unless the base ends in `/`.
fn payment_base_url(raw: &str) -> Result<Url, Error> {
    if raw.ends_with('/') {
        parse_url("PAYMENT_BASE_URL", raw)
    } else {
        parse_url("PAYMENT_BASE_URL", &format!("{}/", raw))
    }
}
