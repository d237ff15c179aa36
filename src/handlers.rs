use crate::AppState;
use crate::controller::{ControlError, TrackingConfig};
use crate::models::{EnableRequest, IntervalRequest};
use actix_web::{Responder, get, post, web};

fn to_http_error(err: ControlError) -> actix_web::Error {
    match err {
        ControlError::InvalidInterval
        | ControlError::MissingUserId
        | ControlError::InvalidEndpoint(_) => actix_web::error::ErrorBadRequest(err.to_string()),
        ControlError::Store(_) => {
            log::error!("{err}");
            actix_web::error::ErrorInternalServerError(err.to_string())
        }
        ControlError::ControllerGone => actix_web::error::ErrorServiceUnavailable(err.to_string()),
    }
}

/// Handler for the `/api/tracking/enable` endpoint.
///
/// Starts a new tracking session with the given user id, collector endpoint
/// and interval. An already running session is replaced.
#[post("/api/tracking/enable")]
pub async fn enable_tracking(
    data: web::Form<EnableRequest>,
    state: web::Data<AppState>,
) -> actix_web::Result<impl Responder> {
    let data = data.into_inner();
    let status = state
        .enable(TrackingConfig {
            interval_seconds: data.interval,
            user_id: data.user_id,
            endpoint_url: data.endpoint,
        })
        .await
        .map_err(to_http_error)?;
    Ok(web::Json(status))
}

#[post("/api/tracking/disable")]
pub async fn disable_tracking(state: web::Data<AppState>) -> actix_web::Result<impl Responder> {
    let status = state.disable().await.map_err(to_http_error)?;
    Ok(web::Json(status))
}

/// Handler for the `/api/tracking/interval` endpoint. Takes effect
/// immediately when tracking is on, otherwise on the next enable.
#[post("/api/tracking/interval")]
pub async fn update_interval(
    data: web::Form<IntervalRequest>,
    state: web::Data<AppState>,
) -> actix_web::Result<impl Responder> {
    let status = state
        .update_interval(data.interval)
        .await
        .map_err(to_http_error)?;
    Ok(web::Json(status))
}

#[get("/api/tracking/status")]
pub async fn tracking_status(state: web::Data<AppState>) -> impl Responder {
    web::Json(state.status())
}
