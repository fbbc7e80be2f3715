/**
 * API REST SOMA - Surface de contrôle monitoring/adaptation du nœud
 *
 * RÔLE :
 * Ce module expose l'API de la boucle externe monitor/execute. C'est
 * par ici qu'un planificateur d'adaptation observe le nœud et lui
 * pousse des ordres.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum, routes plates : /monitor, /execute et leurs schémas
 * - Chaque réponse d'erreur porte un corps JSON avec la cause
 * - Le mapping erreur -> code HTTP vit ici et nulle part ailleurs
 *
 * UTILITÉ DANS SOMA :
 * 🎯 Boucle d'adaptation externe : observer puis agir, schémas à l'appui
 * 🎯 Debug : inspection des composants et du health en temps réel
 * 🎯 Intégration : les clients découvrent les formes via *_schema
 */

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::buffer::MetricSample;
use crate::error::HubError;
use crate::health::{HealthTracker, NodeHealth};
use crate::models::{ComponentDetail, ComponentView, SampleView};
use crate::node::NodeService;
use crate::registry::Component;
use crate::schema::Schema;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<NodeService>,
    pub health_tracker: HealthTracker,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/monitor", get(get_monitor))
        .route("/monitor_schema", get(get_monitor_schema))
        .route("/execute", put(execute_adaptation))
        .route("/execute_schema", get(get_execute_schema))
        .route("/adaptation_options", get(get_adaptation_options))
        .route("/adaptation_options_schema", get(get_adaptation_options_schema))
        .route("/components", get(get_components))
        .route("/components/{name}", get(get_component))
        .with_state(app_state)
}

fn to_view(c: &Component) -> ComponentView {
    let now = OffsetDateTime::now_utc();
    let age = now - c.last_seen;
    ComponentView {
        name: c.name.clone(),
        metrics: c.metrics.clone(),
        adaptable: c.adaptable,
        active: c.active,
        registered_at: c.registered_at.format(&Rfc3339).unwrap_or_default(),
        last_seen: c.last_seen.format(&Rfc3339).unwrap_or_default(),
        age_seconds: age.whole_seconds().max(0),
    }
}

fn to_sample_view(s: &MetricSample) -> SampleView {
    SampleView {
        metric: s.metric.clone(),
        value: s.value,
        ts: s.timestamp.format(&Rfc3339).unwrap_or_default(),
    }
}

/// Code HTTP de chaque classe d'erreur. Seul endroit du hub où la
/// taxonomie rencontre HTTP.
fn status_for(err: &HubError) -> StatusCode {
    match err {
        HubError::SchemaViolation { .. } | HubError::MalformedRequestBody(_) => {
            StatusCode::BAD_REQUEST
        }
        HubError::UnknownComponent(_) => StatusCode::NOT_FOUND,
        HubError::DuplicateName(_) => StatusCode::CONFLICT,
        HubError::UnsupportedAdaptation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        HubError::ComponentRejected(_) => StatusCode::BAD_GATEWAY,
        HubError::RegistryFull { .. } => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn error_response(err: &HubError) -> (StatusCode, Json<Value>) {
    let mut body = json!({
        "status": "error",
        "error": err.to_string(),
    });
    if let HubError::SchemaViolation { field, .. } = err {
        body["field"] = json!(field);
    }
    (status_for(err), Json(body))
}

// GET /monitor (mesures bufferisées, composant -> métrique -> valeurs)
async fn get_monitor(
    State(app): State<AppState>,
) -> Json<BTreeMap<String, BTreeMap<String, Vec<f64>>>> {
    Json(app.service.monitor())
}

// GET /monitor_schema (suit le contenu courant du registre)
async fn get_monitor_schema(State(app): State<AppState>) -> Json<Schema> {
    Json(app.service.monitor_schema())
}

// PUT /execute (commande d'adaptation)
async fn execute_adaptation(
    State(app): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> (StatusCode, Json<Value>) {
    let payload = match body {
        Ok(Json(payload)) => payload,
        Err(rejection) => {
            return error_response(&HubError::MalformedRequestBody(rejection.body_text()));
        }
    };

    match app.service.execute(&payload).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "success" }))),
        Err(e) => error_response(&e),
    }
}

// GET /execute_schema (forme attendue par PUT /execute)
async fn get_execute_schema(State(app): State<AppState>) -> Json<Schema> {
    Json(app.service.execute_schema().clone())
}

// GET /adaptation_options (kinds supportés)
async fn get_adaptation_options(State(app): State<AppState>) -> Json<BTreeMap<String, String>> {
    Json(app.service.adaptation_options())
}

// GET /adaptation_options_schema
async fn get_adaptation_options_schema(State(app): State<AppState>) -> Json<Schema> {
    Json(app.service.options_schema().clone())
}

// GET /components (inventaire, ordre d'enregistrement)
async fn get_components(State(app): State<AppState>) -> Json<Vec<ComponentView>> {
    let views = app.service.components().iter().map(to_view).collect();
    Json(views)
}

// GET /components/{name} (détail, avec les mesures encore en buffer)
async fn get_component(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ComponentDetail>, StatusCode> {
    let component = app
        .service
        .component(&name)
        .map_err(|_| StatusCode::NOT_FOUND)?;
    let samples = app
        .service
        .snapshot(&name)
        .map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(Json(ComponentDetail {
        component: to_view(&component),
        samples: samples.iter().map(to_sample_view).collect(),
    }))
}

// GET /system/health (état du hub)
async fn get_system_health(State(app): State<AppState>) -> Json<NodeHealth> {
    Json(app.health_tracker.get_health(&app.service))
}
