//! HTTP surface.
//!
//! A thin adapter over the pipeline: it translates problem-build requests
//! into [`Problem::build`] calls and serves problem metadata. The body of
//! a build response is always the full report; the status is 200 whenever
//! the pipeline ran to completion, regardless of per-phase results, and
//! 5xx only for infrastructure failures.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::judge::JudgePool;
use crate::metadata::MetadataStore;
use crate::problem::storage::{save_test_data, StorageClient};
use crate::problem::{package, Problem};
use crate::revision::{parse_revision, Revision, RevisionStore};

pub struct AppState {
    pub pool: Arc<JudgePool>,
    pub repo: Arc<dyn RevisionStore>,
    pub storage: StorageClient,
    pub metadata: Arc<dyn MetadataStore>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/problems", get(list_problems))
        .route("/problem", post(create_problem))
        .route("/problem/:id/config", get(problem_config))
        .route("/problem/:id/build", post(build_problem))
        .route("/problem/:id/package", get(package_problem))
        .with_state(state)
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message.into() })),
    )
        .into_response()
}

fn not_found(message: impl Into<String>) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": message.into() })),
    )
        .into_response()
}

fn internal_error(message: impl Into<String>) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": message.into() })),
    )
        .into_response()
}

async fn list_problems(State(state): State<Arc<AppState>>) -> Response {
    match state.metadata.list_problems().await {
        Ok(problems) => (StatusCode::OK, Json(json!({ "problems": problems }))).into_response(),
        Err(err) => {
            error!("failed to list problems: {err:#}");
            internal_error("failed to list problems")
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateProblemRequest {
    name: String,
    #[serde(default)]
    tags: Vec<String>,
}

async fn create_problem(
    State(state): State<Arc<AppState>>,
    Json(params): Json<CreateProblemRequest>,
) -> Response {
    match state.metadata.create_problem(&params.name, params.tags).await {
        Ok(problem) => (StatusCode::OK, Json(json!({ "problem": problem.id }))).into_response(),
        Err(err) => {
            error!("failed to create problem: {err:#}");
            internal_error("failed to create problem")
        }
    }
}

#[derive(Debug, Deserialize)]
struct RevisionQuery {
    rev: String,
}

async fn problem_config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<RevisionQuery>,
) -> Response {
    let Ok(rev) = parse_revision(&query.rev) else {
        return bad_request("invalid revision");
    };
    if !state.repo.commit_exists(&rev) {
        return not_found("revision not found");
    }
    let problem = Problem::new(id, Arc::clone(&state.repo));
    match problem.config(&rev) {
        Ok(config) => (StatusCode::OK, Json(config)).into_response(),
        Err(err) => {
            error!("failed to load problem config: {err:#}");
            internal_error(format!("failed to load problem config: {err:#}"))
        }
    }
}

#[derive(Debug, Deserialize)]
struct BuildRequest {
    rev: String,
    #[serde(default)]
    save: bool,
}

async fn build_problem(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(params): Json<BuildRequest>,
) -> Response {
    let rev: Revision = match parse_revision(&params.rev) {
        Ok(rev) => rev,
        Err(err) => return bad_request(format!("invalid revision: {err:#}")),
    };

    match state.metadata.get_problem(id).await {
        Ok(Some(_)) => {}
        Ok(None) => return not_found("problem not found"),
        Err(err) => {
            error!("failed to look up problem {id}: {err:#}");
            return internal_error("failed to look up problem");
        }
    }

    if !state.repo.commit_exists(&rev) {
        return not_found("revision not found");
    }

    info!("building problem {id} at revision {}", params.rev);
    let problem = Problem::new(id, Arc::clone(&state.repo));
    let (build, fs) = problem.build(&rev, &state.pool).await;

    if params.save && build.ok {
        let Some(fs) = fs else {
            return internal_error("build succeeded but produced no test data");
        };
        let Some(test_groups) = build.generate.as_ref().map(|g| &g.test_groups) else {
            return internal_error("build succeeded but produced no test groups");
        };
        if let Err(err) = save_test_data(&state.storage, id, test_groups, &fs).await {
            error!("failed to archive test data of {id}: {err:#}");
            return internal_error(format!("failed to archive test data: {err:#}"));
        }
        if let Err(err) = state.metadata.upsert_build_info(id, &rev, &build).await {
            error!("failed to store build info of {id}: {err:#}");
            return internal_error("failed to store build info");
        }
        info!("archived test data of problem {id}");
    }

    (StatusCode::OK, Json(json!({ "build": build }))).into_response()
}

#[derive(Debug, Deserialize)]
struct PackageQuery {
    rev: String,
    #[serde(default = "default_package_format")]
    format: String,
}

fn default_package_format() -> String {
    "luogu".to_string()
}

async fn package_problem(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<PackageQuery>,
) -> Response {
    if !package::formats().contains(&query.format.as_str()) {
        return bad_request(format!("unknown package format '{}'", query.format));
    }
    let Ok(rev) = parse_revision(&query.rev) else {
        return bad_request("invalid revision");
    };
    let build = match state.metadata.get_build_info(id, &rev).await {
        Ok(Some(build)) => build,
        Ok(None) => return not_found("no stored build for this revision"),
        Err(err) => {
            error!("failed to load build info of {id}: {err:#}");
            return internal_error("failed to load build info");
        }
    };
    let Some(test_groups) = build.generate.as_ref().map(|g| &g.test_groups) else {
        return not_found("stored build has no test groups");
    };

    match package::export(&query.format, &state.storage, id, test_groups).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/zip")],
            bytes,
        )
            .into_response(),
        Err(err) => {
            error!("failed to package problem {id}: {err:#}");
            internal_error(format!("failed to package problem: {err:#}"))
        }
    }
}
