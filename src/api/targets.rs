use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;
use std::path::PathBuf;

use crate::api::{error_response, success};
use crate::metrics::METRICS;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct AddTargetRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct ExecutablePathRequest {
    pub path: PathBuf,
}

/// Current snapshot: loop state, counts and every target
pub async fn list_targets(data: web::Data<AppState>) -> impl Responder {
    let snapshot = data.watchdog.snapshot();
    HttpResponse::Ok().json(snapshot.as_ref())
}

pub async fn add_target(
    data: web::Data<AppState>,
    req: web::Json<AddTargetRequest>,
) -> impl Responder {
    let name = req.name.trim().to_string();

    match data.watchdog.add_target(&name).await {
        Ok(()) => success(format!("Application '{}' added", name)),
        Err(e) => error_response(&e),
    }
}

pub async fn remove_target(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let name = path.into_inner();

    match data.watchdog.remove_target(&name).await {
        Ok(()) => {
            METRICS.remove_target(&name);
            success(format!("Application '{}' removed", name))
        }
        Err(e) => error_response(&e),
    }
}

pub async fn toggle_target(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let name = path.into_inner();

    match data.watchdog.toggle_enabled(&name).await {
        Ok(enabled) => HttpResponse::Ok().json(serde_json::json!({
            "status": "success",
            "message": format!(
                "Monitoring {} for '{}'",
                if enabled { "enabled" } else { "disabled" },
                name
            ),
            "enabled": enabled
        })),
        Err(e) => error_response(&e),
    }
}

pub async fn set_executable_path(
    data: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<ExecutablePathRequest>,
) -> impl Responder {
    let name = path.into_inner();
    let executable = req.into_inner().path;
    let shown = executable.display().to_string();

    match data.watchdog.set_executable_path(&name, executable).await {
        Ok(()) => success(format!("Executable path for '{}' set to {}", name, shown)),
        Err(e) => error_response(&e),
    }
}

pub async fn reset_threshold_timer(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let name = path.into_inner();

    match data.watchdog.reset_threshold_timer(&name).await {
        Ok(was_running) => HttpResponse::Ok().json(serde_json::json!({
            "status": "success",
            "message": if was_running {
                format!("Threshold timer for '{}' reset", name)
            } else {
                format!("No active threshold timer for '{}'", name)
            },
            "was_running": was_running
        })),
        Err(e) => error_response(&e),
    }
}

pub async fn discover_executables(data: web::Data<AppState>) -> impl Responder {
    match data.watchdog.discover_executable_paths().await {
        Ok(found) => HttpResponse::Ok().json(serde_json::json!({
            "status": "success",
            "message": format!("Found {} executable path(s)", found),
            "found": found
        })),
        Err(e) => error_response(&e),
    }
}

pub async fn probe_targets(data: web::Data<AppState>) -> impl Responder {
    match data.watchdog.probe().await {
        Ok(()) => {
            let snapshot = data.watchdog.snapshot();
            let results: Vec<_> = snapshot
                .targets
                .iter()
                .filter(|t| t.enabled)
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "process_count": t.process_count,
                        "cpu_percent": t.last_cpu_percent
                    })
                })
                .collect();

            HttpResponse::Ok().json(serde_json::json!({
                "status": "success",
                "threshold": snapshot.settings.cpu_threshold_percent,
                "targets": results
            }))
        }
        Err(e) => error_response(&e),
    }
}
