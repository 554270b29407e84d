use crate::error::GatewayError;
use crate::payment::PaymentService;
use crate::summons::SummonsService;
use crate::token::TokenCache;
use crate::Gateway;
use log::{error, info, warn};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

const BODY_LIMIT: u64 = 16 * 1024;

/// Which upstream an endpoint depends on, for the client-facing failure text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Upstream {
    Summons,
    Payment,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummonsQuery {
    vehicle_number: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentRequest {
    #[serde(default)]
    summons: Vec<String>,
    total_amount: Option<f64>,
}

pub async fn run(gateway: Gateway, addr: SocketAddr) {
    info!("Listening on {}", addr);
    warp::serve(routes(gateway)).run(addr).await;
}

pub fn routes(
    gateway: Gateway,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let summons_service = gateway.summons.clone();
    let summons = warp::path!("api" / "summons")
        .and(warp::post())
        .and(warp::body::content_length_limit(BODY_LIMIT))
        .and(warp::body::json())
        .and(warp::any().map(move || summons_service.clone()))
        .and_then(handle_summons);

    let payment_service = gateway.payment.clone();
    let payment = warp::path!("api" / "payment" / "generate-qr")
        .and(warp::post())
        .and(warp::body::content_length_limit(BODY_LIMIT))
        .and(warp::body::json())
        .and(warp::any().map(move || payment_service.clone()))
        .and_then(handle_payment);

    let tokens = gateway.tokens.clone();
    let health = warp::path!("api" / "health")
        .and(warp::get())
        .and(warp::any().map(move || tokens.clone()))
        .and_then(handle_health);

    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_headers(vec!["content-type"]);

    summons
        .or(payment)
        .or(health)
        .with(cors)
        .recover(handle_rejection)
        .with(warp::log("summons_gateway"))
}

async fn handle_summons(
    query: SummonsQuery,
    service: Arc<SummonsService>,
) -> Result<Response, Infallible> {
    let request_id = Uuid::new_v4();
    let plate = query.vehicle_number.unwrap_or_default();
    info!("[{}] Summons lookup for '{}'", request_id, plate);
    let reply = match service.lookup_summons(&plate).await {
        Ok(records) => warp::reply::json(&records).into_response(),
        Err(e) => error_reply(request_id, Upstream::Summons, &e),
    };
    Ok(tagged(reply, request_id))
}

async fn handle_payment(
    request: PaymentRequest,
    service: Arc<PaymentService>,
) -> Result<Response, Infallible> {
    let request_id = Uuid::new_v4();
    let amount = request.total_amount.unwrap_or(0.0);
    info!(
        "[{}] Payment QR for {} summons, total {}",
        request_id,
        request.summons.len(),
        amount
    );
    let reply = match service.generate_payment_qr(amount, &request.summons).await {
        Ok(link) => warp::reply::json(&link).into_response(),
        Err(e) => error_reply(request_id, Upstream::Payment, &e),
    };
    Ok(tagged(reply, request_id))
}

async fn handle_health(tokens: Arc<TokenCache>) -> Result<Response, Infallible> {
    let cached = tokens.has_token();
    Ok(warp::reply::json(&json!({ "status": "ok", "paymentTokenCached": cached })).into_response())
}

/// HTTP status and client-facing message for each failure.
pub fn status_and_message(upstream: Upstream, e: &GatewayError) -> (StatusCode, &'static str) {
    match e {
        GatewayError::InvalidInput => (StatusCode::BAD_REQUEST, "Vehicle number is required"),
        GatewayError::DuplicateInProgress(_) => (
            StatusCode::TOO_MANY_REQUESTS,
            "Request already in progress. Try again later.",
        ),
        GatewayError::UpstreamUnreachable(_) => match upstream {
            Upstream::Summons => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to fetch summons data.",
            ),
            Upstream::Payment => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to generate payment link.",
            ),
        },
        GatewayError::MalformedUpstreamResponse(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Invalid API response format.",
        ),
        GatewayError::AuthenticationUnavailable => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to authenticate payment request.",
        ),
        GatewayError::PaymentGatewayRejected(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to generate payment link.",
        ),
        GatewayError::InvalidAmount => (StatusCode::BAD_REQUEST, "Invalid payment amount"),
        GatewayError::InvalidSelection => {
            (StatusCode::BAD_REQUEST, "No summons selected for payment")
        }
    }
}

fn error_reply(request_id: Uuid, upstream: Upstream, e: &GatewayError) -> Response {
    let (status, message) = status_and_message(upstream, e);
    if status.is_server_error() {
        error!("[{}] Request failed: {}", request_id, e);
    } else {
        warn!("[{}] Request rejected: {}", request_id, e);
    }
    json_error(status, message)
}

fn tagged(reply: Response, request_id: Uuid) -> Response {
    warp::reply::with_header(reply, "x-request-id", request_id.to_string()).into_response()
}

fn json_error(status: StatusCode, message: &str) -> Response {
    warp::reply::with_status(warp::reply::json(&json!({ "error": message })), status)
        .into_response()
}

async fn handle_rejection(rejection: Rejection) -> Result<Response, Infallible> {
    let (status, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found")
    } else if rejection
        .find::<warp::filters::body::BodyDeserializeError>()
        .is_some()
    {
        (StatusCode::BAD_REQUEST, "Invalid request body")
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large")
    } else if rejection.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "Content-Length required")
    } else if rejection
        .find::<warp::reject::UnsupportedMediaType>()
        .is_some()
    {
        (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Expected a JSON body")
    } else if rejection.find::<warp::filters::cors::CorsForbidden>().is_some() {
        (StatusCode::FORBIDDEN, "CORS request forbidden")
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    } else {
        error!("Unhandled rejection: {:?}", rejection);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    };
    Ok(json_error(status, message))
}
