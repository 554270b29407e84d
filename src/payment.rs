use crate::config::MerchantProfile;
use crate::epoch_millis;
use crate::error::GatewayError;
use crate::token::TokenCache;
use crate::types::PaymentLink;
use log::{error, info, warn};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use url::Url;

/// Upstream limit on `order_number` length.
pub const ORDER_NUMBER_MAX_LEN: usize = 13;

/// Issues order numbers of the form `S` + 12 digits. The digits come from a
/// millisecond counter that never repeats within the process, even when two
/// orders land in the same millisecond.
#[derive(Debug, Default)]
pub struct OrderNumbers {
    last: AtomicU64,
}

impl OrderNumbers {
    pub fn next(&self) -> String {
        let now = epoch_millis().max(0) as u64;
        let previous = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        let issued = now.max(previous + 1);
        format!("S{:012}", issued % 1_000_000_000_000)
    }
}

pub struct PaymentService {
    client: reqwest::Client,
    qr_url: Url,
    tokens: Arc<TokenCache>,
    merchant: MerchantProfile,
    orders: OrderNumbers,
}

impl PaymentService {
    pub fn new(
        client: reqwest::Client,
        qr_url: Url,
        tokens: Arc<TokenCache>,
        merchant: MerchantProfile,
    ) -> Self {
        PaymentService {
            client,
            qr_url,
            tokens,
            merchant,
            orders: OrderNumbers::default(),
        }
    }

    /// Asks the gateway for a hosted payment page covering `total_amount`.
    pub async fn generate_payment_qr(
        &self,
        total_amount: f64,
        summons_refs: &[String],
    ) -> Result<PaymentLink, GatewayError> {
        if !(total_amount.is_finite() && total_amount > 0.0) {
            return Err(GatewayError::InvalidAmount);
        }
        if summons_refs.is_empty() || summons_refs.iter().any(|r| r.trim().is_empty()) {
            return Err(GatewayError::InvalidSelection);
        }

        let token = self.tokens.get_valid_token().await?;
        let order = self.order_payload(total_amount);
        info!(
            "Sending payment request {} for {} covering {:?}",
            order["order_number"], order["order_amount"], summons_refs
        );

        let response = self
            .client
            .post(self.qr_url.clone())
            .bearer_auth(&token)
            .json(&order)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!("Payment gateway refused the cached token");
            self.tokens.invalidate().await;
        }
        let body = response.text().await?;
        if !status.is_success() {
            error!("Payment gateway error {}: {}", status, body);
            return Err(GatewayError::PaymentGatewayRejected(format!("HTTP {}", status)));
        }

        let url = payment_url(&body)?;
        info!("Payment URL generated: {}", url);
        Ok(PaymentLink::new(url))
    }

    fn order_payload(&self, total_amount: f64) -> Value {
        json!({
            "order_output": "online",
            "order_number": self.orders.next(),
            "override_existing_unprocessed_order_no": "YES",
            "order_amount": format!("{:.2}", total_amount),
            "validity_qr": self.merchant.qr_validity,
            "store_id": self.merchant.store_id,
            "terminal_id": self.merchant.terminal_id,
            "shift_id": self.merchant.shift_id,
            "to_whatsapp_no": self.merchant.whatsapp_no,
            "language": self.merchant.language,
            "whatsapp_template_id": self.merchant.whatsapp_template_id,
        })
    }
}

/// Pulls `data.content.iframe_url` out of a `data.status == "success"` envelope.
fn payment_url(body: &str) -> Result<String, GatewayError> {
    let rejected = |why: &str| {
        error!("Payment gateway error: {} in {}", why, body);
        GatewayError::PaymentGatewayRejected(why.to_string())
    };
    let json: Value = serde_json::from_str(body).map_err(|_| rejected("response is not JSON"))?;
    let data = &json["data"];
    if data["status"].as_str() != Some("success") {
        return Err(rejected("status is not success"));
    }
    data["content"]["iframe_url"]
        .as_str()
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .ok_or_else(|| rejected("no iframe_url in response"))
}
