#[macro_use]
extern crate failure;

pub mod config;
pub mod dedup;
pub mod error;
pub mod normalize;
pub mod payment;
pub mod routes;
pub mod summons;
pub mod token;
pub mod types;

use crate::config::Config;
use crate::dedup::DedupGuard;
use crate::payment::PaymentService;
use crate::summons::SummonsService;
use crate::token::TokenCache;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// The services behind the HTTP interface, sharing one HTTP client.
#[derive(Clone)]
pub struct Gateway {
    pub summons: Arc<SummonsService>,
    pub payment: Arc<PaymentService>,
    pub tokens: Arc<TokenCache>,
    pub in_flight: Arc<DedupGuard>,
}

impl Gateway {
    pub fn from_config(config: &Config) -> Result<Gateway, failure::Error> {
        let client = config.http_client()?;
        let in_flight = Arc::new(DedupGuard::new());
        let tokens = Arc::new(TokenCache::new(
            client.clone(),
            config.payment_token_url.clone(),
        ));
        let summons = Arc::new(SummonsService::new(
            client.clone(),
            config.soap_url.clone(),
            config.soap_action.clone(),
            config.agency.clone(),
            Arc::clone(&in_flight),
        ));
        let payment = Arc::new(PaymentService::new(
            client,
            config.payment_qr_url.clone(),
            Arc::clone(&tokens),
            config.merchant.clone(),
        ));
        Ok(Gateway {
            summons,
            payment,
            tokens,
            in_flight,
        })
    }
}

pub(crate) fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
