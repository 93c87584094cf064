pub mod control;
pub mod metrics;
pub mod targets;

pub use control::{
    get_settings, pause_monitor, recent_events, resume_monitor, start_monitor, stop_monitor,
    update_settings,
};
pub use metrics::get_metrics;
pub use targets::{
    add_target, discover_executables, list_targets, probe_targets, remove_target,
    reset_threshold_timer, set_executable_path, toggle_target,
};

use actix_web::{web, HttpResponse, Responder};

use crate::error::WatchdogError;

pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy"
    }))
}

/// Register every route on an actix `App`
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/targets", web::get().to(list_targets))
        .route("/api/targets", web::post().to(add_target))
        .route("/api/targets/discover", web::post().to(discover_executables))
        .route("/api/targets/probe", web::post().to(probe_targets))
        .route("/api/targets/{name}", web::delete().to(remove_target))
        .route("/api/targets/{name}/toggle", web::post().to(toggle_target))
        .route("/api/targets/{name}/executable", web::put().to(set_executable_path))
        .route("/api/targets/{name}/reset-timer", web::post().to(reset_threshold_timer))
        .route("/api/monitor/start", web::post().to(start_monitor))
        .route("/api/monitor/pause", web::post().to(pause_monitor))
        .route("/api/monitor/resume", web::post().to(resume_monitor))
        .route("/api/monitor/stop", web::post().to(stop_monitor))
        .route("/api/settings", web::get().to(get_settings))
        .route("/api/settings", web::put().to(update_settings))
        .route("/api/events", web::get().to(recent_events))
        .route("/metrics", web::get().to(get_metrics))
        .route("/health", web::get().to(health));
}

/// Map an engine error onto the JSON error body
pub(crate) fn error_response(err: &WatchdogError) -> HttpResponse {
    let mut builder = match err {
        WatchdogError::Config(_) | WatchdogError::InvalidPath(_) => HttpResponse::BadRequest(),
        WatchdogError::TargetNotFound(_) => HttpResponse::NotFound(),
        WatchdogError::DuplicateTarget(_) | WatchdogError::InvalidState(_) => {
            HttpResponse::Conflict()
        }
        WatchdogError::EngineUnavailable => HttpResponse::ServiceUnavailable(),
        WatchdogError::Inspection(_) | WatchdogError::Io(_) | WatchdogError::Serialization(_) => {
            HttpResponse::InternalServerError()
        }
    };

    builder.json(serde_json::json!({
        "status": "error",
        "message": err.to_string()
    }))
}

pub(crate) fn success(message: String) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "success",
        "message": message
    }))
}
