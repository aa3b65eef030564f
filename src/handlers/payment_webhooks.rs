use crate::{
    errors::{ApiError, ServiceError},
    services::fulfillment::{FulfillmentOutcome, PaymentEvent},
    AppState,
};
use axum::{
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Creates the router for payment webhook endpoints
pub fn webhook_routes() -> Router<Arc<AppState>> {
    Router::new().route("/payments", post(receive_payment_event))
}

/// Verifies inbound webhook signatures: HMAC-SHA256 over
/// `"{timestamp}.{body}"`, hex-encoded, with a bounded timestamp skew.
pub struct SignatureVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl SignatureVerifier {
    pub fn new(secret: String, tolerance_secs: i64) -> Self {
        Self {
            secret,
            tolerance_secs,
        }
    }

    /// Checks the signature and the timestamp's freshness.
    pub fn verify(&self, timestamp: &str, signature: &str, body: &[u8]) -> Result<(), String> {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        type HmacSha256 = Hmac<Sha256>;

        let ts: i64 = timestamp
            .parse()
            .map_err(|_| "timestamp is not a unix epoch integer".to_string())?;
        let age = (chrono::Utc::now().timestamp() - ts).abs();
        if age > self.tolerance_secs {
            return Err(format!("timestamp outside tolerance ({}s old)", age));
        }

        let expected = hex::decode(signature).map_err(|_| "signature is not hex".to_string())?;

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        mac.verify_slice(&expected)
            .map_err(|_| "signature mismatch".to_string())
    }

    /// Produces a signature for a payload; used by tests and local tooling.
    pub fn sign(&self, timestamp: &str, body: &[u8]) -> String {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        type HmacSha256 = Hmac<Sha256>;

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Receives a payment notification from the provider.
///
/// Acknowledgment contract: 2xx tells the provider to stop redelivering, any
/// other status schedules a redelivery. Malformed payloads are acknowledged
/// (and logged) because redelivery cannot fix them; a failed single-item
/// order answers 503 so the provider tries again once stock contention or a
/// transient fault has passed.
#[instrument(skip(state, headers, body))]
async fn receive_payment_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(verifier) = &state.signature_verifier {
        let timestamp = header_str(&headers, TIMESTAMP_HEADER)
            .ok_or_else(|| ApiError::Unauthorized("missing signature timestamp".to_string()))?;
        let signature = header_str(&headers, SIGNATURE_HEADER)
            .ok_or_else(|| ApiError::Unauthorized("missing signature".to_string()))?;

        verifier
            .verify(timestamp, signature, body.as_bytes())
            .map_err(|reason| {
                warn!(reason = %reason, "Rejected webhook delivery");
                ApiError::Unauthorized(format!("signature verification failed: {}", reason))
            })?;
    }

    let event: PaymentEvent = match serde_json::from_str(&body) {
        Ok(event) => event,
        Err(e) => {
            error!(error = %e, "Dropping undecodable webhook payload");
            return Ok(Json(json!({ "status": "dropped" })).into_response());
        }
    };

    let event_id = event.id.clone();

    match state.fulfillment.process_event(event).await {
        Ok(FulfillmentOutcome::Processed(summary)) => {
            info!(
                event_id = %event_id,
                fulfilled = summary.fulfilled(),
                skipped = summary.skipped(),
                failed = summary.failed(),
                "Acknowledging payment event"
            );
            Ok(Json(json!({
                "status": "processed",
                "fulfilled": summary.fulfilled(),
                "skipped": summary.skipped(),
                "failed": summary.failed(),
            }))
            .into_response())
        }
        Ok(FulfillmentOutcome::Observed) => {
            Ok(Json(json!({ "status": "observed" })).into_response())
        }
        Ok(FulfillmentOutcome::Ignored) => {
            Ok(Json(json!({ "status": "ignored" })).into_response())
        }
        Err(ServiceError::MalformedPayload(reason)) => {
            // Redelivery cannot repair a bad payload; acknowledge and drop.
            error!(event_id = %event_id, reason = %reason, "Dropping malformed payment event");
            Ok(Json(json!({ "status": "dropped", "reason": reason })).into_response())
        }
        Err(e @ ServiceError::OutOfStock(_)) | Err(e @ ServiceError::AllocationConflict(_)) => {
            // Single-item order failure: ask the provider to redeliver later.
            Err(ApiError::ServiceUnavailable(e.to_string()))
        }
        Err(e) => {
            error!(event_id = %event_id, error = %e, "Payment event processing failed");
            Err(ApiError::ServiceError(e))
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
