//! On-demand delivery of a single record.
//!
//! Every outcome is answered with HTTP 200 and a result envelope; the
//! envelope's `code` carries success or failure.

use axum::{
    extract::{rejection::FormRejection, State},
    Form, Json,
};
use rowsync_core::models::{Record, RecordCode};
use rowsync_sync::{DeliveryReport, SyncError};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::AppState;

/// Envelope code for an accepted delivery.
pub const SUCCESS_CODE: i64 = 1;

/// Envelope code for local failures.
pub const FAILURE_CODE: i64 = 2;

/// Request parameters, read from the query string on GET and from a form
/// body otherwise.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncRecordRequest {
    /// Code of the record to deliver.
    pub record_code: String,
}

/// Result envelope returned by the on-demand operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// `1` on success, the downstream code on rejection, `2` otherwise.
    pub code: i64,
    /// Human-readable outcome.
    pub message: String,
    /// The delivered record, present on success only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Record>,
}

impl SyncResponse {
    /// Successful delivery of `record`.
    pub fn success(record: Record) -> Self {
        Self { code: SUCCESS_CODE, message: "OK".to_string(), data: Some(record) }
    }

    /// Failure with an explicit code.
    pub fn failure(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }
}

impl From<DeliveryReport> for SyncResponse {
    fn from(report: DeliveryReport) -> Self {
        if !report.persisted {
            warn!(record_code = %report.record.code, "delivery state was not recorded");
        }

        match report.outcome {
            Ok(_) => Self::success(report.record),
            Err(e) => Self::failure(e.result_code(), e.to_string()),
        }
    }
}

/// Delivers the requested record now, regardless of its delivery state.
#[instrument(name = "sync_record_request", skip_all)]
pub async fn sync_record(
    State(app_state): State<AppState>,
    payload: Result<Form<SyncRecordRequest>, FormRejection>,
) -> Json<SyncResponse> {
    let request = match payload {
        Ok(Form(request)) => request,
        Err(rejection) => {
            warn!(error = %rejection, "invalid sync request");
            return Json(SyncResponse::failure(FAILURE_CODE, rejection.body_text()));
        },
    };

    let code = request.record_code.as_str();
    if code.trim().is_empty() {
        return Json(SyncResponse::failure(FAILURE_CODE, "record_code is required"));
    }

    let response = match app_state.engine.sync_record(&RecordCode::from(code)).await {
        Ok(report) => SyncResponse::from(report),
        Err(e @ SyncError::RecordNotFound { .. }) => {
            SyncResponse::failure(FAILURE_CODE, e.to_string())
        },
        Err(e) => {
            error!(record_code = code, error = %e, "on-demand sync failed");
            SyncResponse::failure(FAILURE_CODE, e.to_string())
        },
    };

    info!(record_code = code, result_code = response.code, "on-demand sync answered");
    Json(response)
}
