use failure::Fail;

/// Every way a gateway operation can fail. Nothing here is process-fatal;
/// each error belongs to the request that produced it.
#[derive(Debug, Clone, PartialEq, Fail)]
pub enum GatewayError {
    #[fail(display = "vehicle number is required")]
    InvalidInput,
    #[fail(display = "a lookup for plate {} is already in progress", _0)]
    DuplicateInProgress(String),
    #[fail(display = "upstream unreachable: {}", _0)]
    UpstreamUnreachable(String),
    #[fail(display = "malformed upstream response: {}", _0)]
    MalformedUpstreamResponse(String),
    #[fail(display = "payment gateway authentication unavailable")]
    AuthenticationUnavailable,
    #[fail(display = "payment gateway rejected the request: {}", _0)]
    PaymentGatewayRejected(String),
    #[fail(display = "payment amount must be greater than zero")]
    InvalidAmount,
    #[fail(display = "no summons selected for payment")]
    InvalidSelection,
}

impl From<NormalizeError> for GatewayError {
    fn from(e: NormalizeError) -> Self {
        GatewayError::MalformedUpstreamResponse(e.to_string())
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::UpstreamUnreachable(format!("timed out: {}", e))
        } else {
            GatewayError::UpstreamUnreachable(e.to_string())
        }
    }
}

/// Failures turning a summons directory response into records.
#[derive(Debug, Clone, PartialEq, Fail)]
pub enum NormalizeError {
    #[fail(display = "invalid XML: {}", _0)]
    Xml(String),
    #[fail(display = "missing <{}> element", _0)]
    MissingElement(&'static str),
    #[fail(display = "SOAP fault: {}", _0)]
    Fault(String),
}
