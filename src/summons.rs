use crate::config::AgencyCredentials;
use crate::dedup::DedupGuard;
use crate::error::GatewayError;
use crate::normalize::normalize;
use crate::types::{SummonsRecord, SummonsStatus};
use log::{debug, error, info};
use quick_xml::escape::escape;
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use url::Url;

const SOAP_CONTENT_TYPE: &str = "text/xml; charset=utf-8";

/// Looks up a plate's summons in the SOAP directory. At most one lookup per
/// plate runs at a time; overlapping requests fail fast instead of queueing.
pub struct SummonsService {
    client: reqwest::Client,
    endpoint: Url,
    soap_action: String,
    agency: AgencyCredentials,
    in_flight: Arc<DedupGuard>,
}

impl SummonsService {
    pub fn new(
        client: reqwest::Client,
        endpoint: Url,
        soap_action: String,
        agency: AgencyCredentials,
        in_flight: Arc<DedupGuard>,
    ) -> Self {
        SummonsService {
            client,
            endpoint,
            soap_action,
            agency,
            in_flight,
        }
    }

    /// Outstanding summons for `plate`, in directory order.
    pub async fn lookup_summons(&self, plate: &str) -> Result<Vec<SummonsRecord>, GatewayError> {
        let unpaid = unpaid_only(self.lookup_all(plate).await?);
        info!("Returning {} unpaid summons for {}", unpaid.len(), plate);
        Ok(unpaid)
    }

    /// Every summons the directory reports for `plate`, paid or not.
    pub async fn lookup_all(&self, plate: &str) -> Result<Vec<SummonsRecord>, GatewayError> {
        if plate.trim().is_empty() {
            return Err(GatewayError::InvalidInput);
        }
        // Held until this future completes or is dropped.
        let permit = self
            .in_flight
            .acquire(plate)
            .ok_or_else(|| GatewayError::DuplicateInProgress(plate.to_string()))?;

        info!("Requesting summons for plate: {}", permit.key());
        let raw = self.fetch(plate.trim()).await.map_err(|e| {
            error!("Summons request for {} failed: {}", plate, e);
            e
        })?;
        debug!("Raw summons response for {}: {}", plate, raw);

        normalize(&raw).map_err(|e| {
            error!("Unreadable summons response for {}: {}", plate, e);
            GatewayError::from(e)
        })
    }

    async fn fetch(&self, plate: &str) -> Result<String, GatewayError> {
        let body = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, SOAP_CONTENT_TYPE)
            .header("SOAPAction", self.soap_action.as_str())
            .body(request_envelope(&self.agency, plate))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body)
    }
}

/// Drops settled summons; only unpaid ones are offered for payment.
pub fn unpaid_only(records: Vec<SummonsRecord>) -> Vec<SummonsRecord> {
    records
        .into_iter()
        .filter(|r| r.status == SummonsStatus::Unpaid)
        .collect()
}

fn request_envelope(agency: &AgencyCredentials, plate: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<s:Envelope xmlns:a="http://schemas.xmlsoap.org/ws/2004/08/addressing" xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
    <s:Header>
        <RequestCode>{}</RequestCode>
        <AgencyID>{}</AgencyID>
        <AgencyKey>{}</AgencyKey>
    </s:Header>
    <s:Body>
        <Request>
            <OffenderIDNo></OffenderIDNo>
            <VehicleRegistrationNumber>{}</VehicleRegistrationNumber>
            <NoticeNo></NoticeNo>
        </Request>
    </s:Body>
</s:Envelope>"#,
        escape(&agency.request_code),
        escape(&agency.agency_id),
        escape(&agency.agency_key),
        escape(plate),
    )
}
