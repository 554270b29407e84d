use httpmock::MockServer;
use summons_gateway::config::Config;
use summons_gateway::Gateway;

pub const SOAP_PATH: &str = "/CCP_ArchService/MessageGateway.svc";
pub const TOKEN_PATH: &str = "/payment/public/lpr/token";
pub const QR_PATH: &str = "/payment/public/lpr/generate-qr";

/// A gateway whose upstreams both point at `server`.
pub fn gateway_for(server: &MockServer) -> Gateway {
    let soap_url = server.url(SOAP_PATH);
    let payment_base = server.url("/payment/public/lpr");
    let config = Config::from_lookup(|key: &str| match key {
        "SUMMONS_SOAP_URL" => Some(soap_url.clone()),
        "PAYMENT_BASE_URL" => Some(payment_base.clone()),
        "SUMMONS_AGENCY_ID" => Some("VISTAAPP".to_string()),
        "SUMMONS_AGENCY_KEY" => Some("test-key".to_string()),
        "PAYMENT_STORE_ID" => Some("store-1".to_string()),
        "PAYMENT_TERMINAL_ID" => Some("0982722".to_string()),
        "UPSTREAM_TIMEOUT_SECS" => Some("2".to_string()),
        _ => None,
    })
    .unwrap();
    Gateway::from_config(&config).unwrap()
}

pub fn summons_response(summons: &[(&str, &str, &str)]) -> String {
    let body: String = summons
        .iter()
        .map(|(notice, status, amount)| {
            format!(
                "<Summons><VehicleRegistrationNo>WXY123</VehicleRegistrationNo><NoticeNo>{}</NoticeNo><OffenceSection>S.48</OffenceSection><NoticeStatus>{}</NoticeStatus><Amount>{}</Amount><DueDate>2024-03-01</DueDate></Summons>",
                notice, status, amount
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><Response><Summonses>{}</Summonses></Response></s:Body></s:Envelope>"#,
        body
    )
}
