use serde::{Deserialize, Serialize};

/// Sentinel for any text field the summons directory left out.
pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SummonsStatus {
    Unpaid,
    Paid,
}

impl SummonsStatus {
    /// The directory flags outstanding notices with exactly `T`; anything
    /// else, padded or lowercase included, is settled.
    pub fn from_flag(flag: Option<&str>) -> Self {
        match flag {
            Some("T") => SummonsStatus::Unpaid,
            _ => SummonsStatus::Paid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummonsRecord {
    pub plate: String,
    pub notice_no: String,
    pub offence: String,
    pub location: String,
    pub offence_date: String,
    pub status: SummonsStatus,
    pub amount: f64,
    pub due_date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLink {
    pub payment_url: String,
    pub qr_code: String,
}

impl PaymentLink {
    pub fn new(url: String) -> Self {
        PaymentLink {
            qr_code: url.clone(),
            payment_url: url,
        }
    }
}
