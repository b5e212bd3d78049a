use crate::api::auth::AuthUser;
use crate::api::error::ApiError;
use crate::api::AppState;
use crate::pipeline::{Job, ANALYSIS_FAILED};
use crate::store::{NewReport, Report, ReportStatus, ReportUpdate, UserRole};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateReportRequest {
    pub property_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateReportResponse {
    pub success: String,
}

/// Queue a new analysis report for a property
pub async fn create_report(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<CreateReportRequest>,
) -> Result<(StatusCode, Json<CreateReportResponse>), ApiError> {
    if auth.role().is_staff() && auth.role() != UserRole::Superuser {
        return Err(ApiError::Forbidden(
            "Staff accounts cannot request analysis reports".to_string(),
        ));
    }
    let property_id = payload
        .property_id
        .ok_or_else(|| ApiError::BadRequest("property_id is required".to_string()))?;

    let property = state.store.get_property(property_id).await?;

    // A failed report may be replaced, anything else blocks a new one
    if let Some(existing) = state.store.find_report(auth.id(), property.id).await? {
        if existing.status == ReportStatus::Failed {
            state.store.delete_report(existing.id).await?;
        } else {
            return Err(ApiError::DuplicateReport {
                report_id: existing.id,
            });
        }
    }

    let report = state
        .store
        .create_report(NewReport::for_property(auth.id(), &property))
        .await?;

    // A report nobody will run must not block the property
    if let Err(err) = state
        .queue
        .enqueue(Job::Report {
            report_id: report.id,
        })
        .await
    {
        error!(report_id = %report.id, error = %err, "Failed to queue report");
        state
            .store
            .update_report(report.id, ReportUpdate::failed(ANALYSIS_FAILED, err.to_string()))
            .await?;
        return Err(err.into());
    }
    info!(report_id = %report.id, property_id = %property.id, "Report queued");

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateReportResponse {
            success: format!("Analysis Report {} is being generated.", report.id),
        }),
    ))
}

/// Staff see any report, owners see their own, everyone else gets a 404
pub async fn get_report(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(report_id): Path<Uuid>,
) -> Result<Json<Report>, ApiError> {
    let report = state.store.get_report(report_id).await?;
    if !auth.role().is_staff() && report.user_id != auth.id() {
        return Err(ApiError::NotFound("report"));
    }
    Ok(Json(report))
}
