//! HTTP route handlers for the agent API.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::Router;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use reviewloop::core::budget::IterationBudget;
use reviewloop::core::status::StatusCode as ReviewStatus;
use reviewloop::core::types::TerminationReason;
use reviewloop::io::config::UrlInfo;
use reviewloop::io::executor::{CommandTaskExecutor, ExecRequest, TaskExecutor};
use reviewloop::io::generator::CommandTextGenerator;
use reviewloop::workflow::{LoopStop, WorkflowController, WorkflowOutcome};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::state::AppState;

/// `resultCd` values carried in every API response body.
pub mod result_code {
    pub const SUCCESS: i32 = 100;
    pub const FAIL: i32 = 900;
    pub const INTERNAL_ERROR: i32 = 910;
    pub const EXTERNAL_ERROR: i32 = 920;
}

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/v1/agents/screenshot", post(run_screenshot_agent))
        .route(
            "/v1/predefined/screenshot",
            get(latest_screenshot).post(capture_predefined),
        )
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    result_cd: i32,
    result_msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

impl<T> ApiResponse<T> {
    fn failure(result_cd: i32, result_msg: impl Into<String>) -> Self {
        Self {
            result_cd,
            result_msg: result_msg.into(),
            data: None,
        }
    }
}

type ApiResult<T> = (StatusCode, Json<ApiResponse<T>>);

fn failure<T>(status: StatusCode, result_cd: i32, result_msg: impl Into<String>) -> ApiResult<T> {
    (status, Json(ApiResponse::failure(result_cd, result_msg)))
}

/// Malformed bodies and query strings get the envelope instead of axum's plain text.
fn bad_request<T>(detail: String) -> ApiResult<T> {
    warn!(%detail, "rejected request");
    failure(StatusCode::BAD_REQUEST, result_code::INTERNAL_ERROR, detail)
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, String> {
    body.map(|Json(value)| value)
        .map_err(|rejection| format!("invalid request body: {}", rejection.body_text()))
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    prompt: String,
    max_iterations: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResultData {
    final_text: String,
    iterations_used: u32,
    termination_reason: TerminationReason,
    last_status: ReviewStatus,
    run_id: String,
}

impl From<WorkflowOutcome> for AgentResultData {
    fn from(outcome: WorkflowOutcome) -> Self {
        Self {
            termination_reason: outcome.termination_reason(),
            final_text: outcome.final_text,
            iterations_used: outcome.iterations_used,
            last_status: outcome.last_status,
            run_id: outcome.run_id,
        }
    }
}

/// POST /api/v1/agents/screenshot - run the review loop for one prompt.
async fn run_screenshot_agent(
    State(state): State<AppState>,
    body: Result<Json<AgentRequest>, JsonRejection>,
) -> ApiResult<AgentResultData> {
    let request = match json_body(body) {
        Ok(request) => request,
        Err(detail) => return bad_request(detail),
    };
    if request.prompt.trim().is_empty() {
        return bad_request("prompt must not be empty".to_string());
    }

    let config = state.config.clone();
    let budget =
        IterationBudget::new(request.max_iterations.unwrap_or(config.max_iterations));
    let cancel = state.shutdown.child_token();
    info!(max_iterations = budget.max_iterations(), "agent run requested");

    // The loop blocks on child processes, so it runs off the async workers.
    let joined = tokio::task::spawn_blocking(move || {
        let controller = WorkflowController::from_config(
            CommandTaskExecutor::new(&config.executor),
            CommandTextGenerator::new(&config.generator),
            &config,
        );
        controller.run(&request.prompt, budget, &cancel, |record| {
            info!(iteration = record.index, status = %record.status, "iteration finished");
        })
    })
    .await;

    let outcome = match joined {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(error = %err, "workflow task failed");
            return failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                result_code::INTERNAL_ERROR,
                format!("workflow task failed: {err}"),
            );
        }
    };

    let (result_cd, result_msg) = match &outcome.stop {
        LoopStop::Completed => (result_code::SUCCESS, "completed".to_string()),
        LoopStop::BudgetExhausted { max_iterations } => (
            result_code::FAIL,
            format!("iteration limit reached after {max_iterations} iterations"),
        ),
        LoopStop::Cancelled => (result_code::FAIL, "run cancelled".to_string()),
        LoopStop::Fatal { stage, message } => (
            result_code::EXTERNAL_ERROR,
            format!("{stage} stage failed: {message}"),
        ),
    };
    info!(
        run_id = %outcome.run_id,
        termination = %outcome.termination_reason(),
        result_cd,
        "agent run finished"
    );

    (
        StatusCode::OK,
        Json(ApiResponse {
            result_cd,
            result_msg,
            data: Some(outcome.into()),
        }),
    )
}

#[derive(Debug, Deserialize)]
pub struct ScreenshotQuery {
    #[serde(rename = "systemNm")]
    system_nm: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotData {
    system_nm: String,
    image_path: String,
}

/// GET /api/v1/predefined/screenshot - latest saved screenshot for a known system.
async fn latest_screenshot(
    State(state): State<AppState>,
    query: Result<Query<ScreenshotQuery>, QueryRejection>,
) -> ApiResult<ScreenshotData> {
    let name = match query {
        Ok(Query(query)) => query.system_nm,
        Err(rejection) => return bad_request(format!("invalid query: {}", rejection.body_text())),
    };
    if state.config.find_url(&name).is_none() {
        return failure(
            StatusCode::NOT_FOUND,
            result_code::INTERNAL_ERROR,
            format!("unknown system '{name}'"),
        );
    }

    match find_latest_screenshot(&state.screenshots_dir(), &name) {
        Some(path) => {
            let file_name = path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default();
            (
                StatusCode::OK,
                Json(ApiResponse {
                    result_cd: result_code::SUCCESS,
                    result_msg: "success".to_string(),
                    data: Some(ScreenshotData {
                        system_nm: name,
                        image_path: format!("/static/screenshots/{file_name}"),
                    }),
                }),
            )
        }
        None => failure(
            StatusCode::NOT_FOUND,
            result_code::INTERNAL_ERROR,
            format!("no screenshot found for '{name}'"),
        ),
    }
}

#[derive(Debug, Deserialize)]
pub struct CaptureRequest {
    #[serde(rename = "systemNm")]
    system_nm: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResultData {
    requested_urls: Vec<UrlInfo>,
    passed_urls: Vec<UrlInfo>,
    failed_urls: Vec<UrlInfo>,
}

/// POST /api/v1/predefined/screenshot - capture one known system, or all of them.
///
/// Each target gets a single task executor call, run in `save_path`, asked to
/// write `<name>-<unix millis>.png`. A target passes when the call succeeds and
/// the file exists afterwards.
async fn capture_predefined(
    State(state): State<AppState>,
    body: Result<Json<CaptureRequest>, JsonRejection>,
) -> ApiResult<CaptureResultData> {
    let request = match json_body(body) {
        Ok(request) => request,
        Err(detail) => return bad_request(detail),
    };
    let config = state.config.clone();
    let targets = match &request.system_nm {
        Some(name) => match config.find_url(name) {
            Some(info) => vec![info.clone()],
            None => {
                return failure(
                    StatusCode::NOT_FOUND,
                    result_code::INTERNAL_ERROR,
                    format!("no URLs found for systemNm={name}"),
                );
            }
        },
        None => config.server.urls.clone(),
    };

    let save_path = state.screenshots_dir();
    if let Err(err) = fs::create_dir_all(&save_path) {
        error!(path = %save_path.display(), error = %err, "cannot create screenshot directory");
        return failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            result_code::INTERNAL_ERROR,
            format!("create {}: {err}", save_path.display()),
        );
    }
    info!(targets = targets.len(), "predefined capture requested");

    let cancel = state.shutdown.child_token();
    let joined = tokio::task::spawn_blocking(move || {
        let executor = CommandTaskExecutor::new(&config.executor).with_workdir(save_path.clone());
        let (passed, failed): (Vec<_>, Vec<_>) = targets
            .iter()
            .cloned()
            .partition(|info| capture_one(&executor, &save_path, info, &cancel));
        CaptureResultData {
            requested_urls: targets,
            passed_urls: passed,
            failed_urls: failed,
        }
    })
    .await;

    let data = match joined {
        Ok(data) => data,
        Err(err) => {
            error!(error = %err, "capture task failed");
            return failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                result_code::INTERNAL_ERROR,
                format!("capture task failed: {err}"),
            );
        }
    };

    let (result_cd, result_msg) = if data.failed_urls.is_empty() {
        (result_code::SUCCESS, "success".to_string())
    } else {
        (
            result_code::EXTERNAL_ERROR,
            format!(
                "{} of {} captures failed",
                data.failed_urls.len(),
                data.requested_urls.len()
            ),
        )
    };
    info!(
        passed = data.passed_urls.len(),
        failed = data.failed_urls.len(),
        "predefined capture finished"
    );
    (
        StatusCode::OK,
        Json(ApiResponse {
            result_cd,
            result_msg,
            data: Some(data),
        }),
    )
}

fn capture_one(
    executor: &impl TaskExecutor,
    save_path: &Path,
    info: &UrlInfo,
    cancel: &CancellationToken,
) -> bool {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    let file_name = format!("{}-{stamp}.png", info.name);
    let request = ExecRequest {
        run_id: format!("capture-{}-{stamp}", info.name),
        iteration: 0,
        instruction: capture_instruction(&info.url, &file_name),
        cancel: cancel.clone(),
    };

    match executor.execute(&request) {
        Ok(_) if save_path.join(&file_name).is_file() => true,
        Ok(_) => {
            warn!(system = %info.name, file = %file_name, "executor finished without saving the screenshot");
            false
        }
        Err(err) => {
            warn!(system = %info.name, error = %err, "capture failed");
            false
        }
    }
}

fn capture_instruction(url: &str, file_name: &str) -> String {
    format!(
        "Open {url} in a browser and save a full-page PNG screenshot in the current directory.\n\
         Output file: {file_name}\n"
    )
}

/// Newest `<name>-*.png` in `dir` by modification time.
fn find_latest_screenshot(dir: &Path, name: &str) -> Option<PathBuf> {
    let prefix = format!("{name}-");
    let entries = fs::read_dir(dir).ok()?;

    entries
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|f| f.starts_with(&prefix) && f.ends_with(".png"))
        })
        .filter_map(|entry| {
            let modified = entry.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, entry.path()))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}
