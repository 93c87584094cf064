use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;

use crate::api::error_response;
use crate::error::Result;
use crate::models::SettingsPatch;
use crate::state::AppState;

const DEFAULT_EVENT_LIMIT: usize = 100;

#[derive(Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

fn monitor_response(result: Result<()>, message: &str, data: &AppState) -> HttpResponse {
    match result {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "status": "success",
            "message": message,
            "loop_state": data.watchdog.snapshot().loop_state
        })),
        Err(e) => error_response(&e),
    }
}

pub async fn start_monitor(data: web::Data<AppState>) -> impl Responder {
    let result = data.watchdog.start().await;
    monitor_response(result, "Monitoring started", &data)
}

pub async fn pause_monitor(data: web::Data<AppState>) -> impl Responder {
    let result = data.watchdog.pause().await;
    monitor_response(result, "Monitoring paused", &data)
}

pub async fn resume_monitor(data: web::Data<AppState>) -> impl Responder {
    let result = data.watchdog.resume().await;
    monitor_response(result, "Monitoring resumed", &data)
}

pub async fn stop_monitor(data: web::Data<AppState>) -> impl Responder {
    let result = data.watchdog.stop().await;
    monitor_response(result, "Monitoring stopped", &data)
}

pub async fn get_settings(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(&data.watchdog.snapshot().settings)
}

/// Fields left out of the body keep their current value
pub async fn update_settings(
    data: web::Data<AppState>,
    req: web::Json<SettingsPatch>,
) -> impl Responder {
    match data.watchdog.update_settings(req.into_inner()).await {
        Ok(settings) => HttpResponse::Ok().json(serde_json::json!({
            "status": "success",
            "message": "Settings saved",
            "settings": settings
        })),
        Err(e) => error_response(&e),
    }
}

/// Recent event lines, oldest first
pub async fn recent_events(
    data: web::Data<AppState>,
    query: web::Query<EventsQuery>,
) -> impl Responder {
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
    let lines: Vec<_> = data
        .watchdog
        .recent_events(limit)
        .iter()
        .map(|e| {
            serde_json::json!({
                "timestamp": e.timestamp.to_rfc3339(),
                "level": e.level,
                "message": e.message,
                "line": e.to_string()
            })
        })
        .collect();

    HttpResponse::Ok().json(lines)
}
