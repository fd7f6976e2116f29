use axum::{
    Json, Router,
    body::Bytes,
    extract::{Multipart, Path, Query, State, multipart::MultipartError},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{Local, NaiveDate, Utc};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::config::AppConfig;
use crate::downloader;
use crate::engine::{RolloverOutcome, SaveOutcome, Session};
use crate::error::CalcError;
use crate::loader;
use crate::record::{MonthKey, PerStep, Step, StepInput, parse_date};
use crate::saving::{FileDocumentStore, JsonFileMirror};
use crate::sync::{SyncService, SyncStatus};

pub struct AppState {
    session: Mutex<Session>,
    sync: SyncService,
    simulated_today: Mutex<Option<NaiveDate>>,
}

impl AppState {
    pub fn new(session: Session, sync: SyncService) -> Self {
        AppState {
            session: Mutex::new(session),
            sync,
            simulated_today: Mutex::new(None),
        }
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wall-clock date unless a simulated date was set
    fn today(&self) -> NaiveDate {
        let simulated = *self
            .simulated_today
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        simulated.unwrap_or_else(|| Local::now().date_naive())
    }

    /// Run the rollover check and persist whatever it produced
    fn roll_over(&self) -> (RolloverOutcome, SyncStatus) {
        let today = self.today();
        let mut session = self.session();
        let outcome = session.check_rollover(today, Utc::now());

        let mut status = SyncStatus::default();
        if let Some(summary) = &outcome.summary {
            status = self.sync.persist_summary(&session, summary);
        }
        if let Err(e) = self.sync.persist_active_month(&session) {
            status.mirror_error = Some(e.to_string());
        }
        (outcome, status)
    }
}

#[derive(Deserialize)]
struct StepFields {
    #[serde(default)]
    value1: String,
    #[serde(default)]
    value2: String,
}

impl StepFields {
    fn input(&self) -> StepInput {
        StepInput::parse(&self.value1, &self.value2)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DayUpdate {
    step_a: StepFields,
    step_b: StepFields,
}

#[derive(Deserialize)]
struct StepUpdate {
    step: String,
    #[serde(flatten)]
    fields: StepFields,
}

#[derive(Deserialize)]
struct SimulatedDate {
    date: Option<String>,
}

#[derive(Deserialize)]
struct ResetQuery {
    confirm: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveResponse {
    status: String,
    #[serde(flatten)]
    outcome: SaveOutcome,
    touched_count: usize,
    sync: SyncStatus,
}

#[derive(Serialize)]
struct StatusResponse {
    status: String,
    message: Option<String>,
}

fn error_response(e: CalcError) -> Response {
    let code = match e {
        CalcError::FutureDate { .. } | CalcError::EmptyInputs { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        CalcError::InvalidDate(_)
        | CalcError::InvalidMonth(_)
        | CalcError::ResetNotConfirmed { .. }
        | CalcError::Import(_)
        | CalcError::Serialization(_) => StatusCode::BAD_REQUEST,
        CalcError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        code,
        Json(StatusResponse {
            status: "error".to_string(),
            message: Some(e.to_string()),
        }),
    )
        .into_response()
}

fn upload_error(e: MultipartError) -> Response {
    error_response(CalcError::Import(format!("could not read upload: {}", e)))
}

fn saved_response(state: &AppState, session: &Session, outcome: SaveOutcome) -> Response {
    let mut sync = state.sync.persist_days(session, &outcome.touched);
    if let Some(summary) = &outcome.summary {
        sync.merge(state.sync.persist_summary(session, summary));
    }
    Json(SaveResponse {
        status: "ok".to_string(),
        touched_count: outcome.touched_count(),
        outcome,
        sync,
    })
    .into_response()
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/today", get(get_today).put(set_today))
        .route("/api/active/step", post(enter_step))
        .route("/api/active/save", post(save_active))
        .route("/api/days/:date", get(get_day).put(save_day))
        .route("/api/calendar/:month", get(get_calendar))
        .route("/api/months", get(list_months))
        .route("/api/months/:month", get(get_month).delete(reset_month))
        .route("/api/rollover", post(check_rollover))
        .route("/api/export/json", get(export_json))
        .route("/api/export/xlsx", get(export_xlsx))
        .route("/api/export/csv", get(export_csv))
        .route("/api/import", post(import_backup))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let durable = FileDocumentStore::open(config.store_path())?;
    let mirror = JsonFileMirror::open(config.mirror_path());
    let sync = SyncService::new(&config.account_id, Box::new(durable), Box::new(mirror));

    let loaded = sync.load()?;
    let mut session = loaded.into_session();
    let repaired = session.repair_all();
    if !repaired.is_empty() {
        let status = sync.persist_repairs(&session, &repaired);
        if !status.is_ok() {
            error!("repaired records were not written back: {:?}", status);
        }
    }

    let app_state = Arc::new(AppState::new(session, sync));
    let (outcome, _) = app_state.roll_over();
    if let Some(summary) = &outcome.summary {
        info!("{}", downloader::month_report(summary));
    }

    // Periodic rollover check
    let ticker_state = Arc::clone(&app_state);
    let period = Duration::from_secs(config.rollover_check_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let (outcome, status) = ticker_state.roll_over();
            if let Some(summary) = &outcome.summary {
                info!("{}", downloader::month_report(summary));
            }
            if !status.is_ok() {
                error!("rollover persistence incomplete: {:?}", status);
            }
        }
    });

    let app = router(app_state);

    let listener = TcpListener::bind(&config.bind_address).await?;
    info!("Listening on http://{}", config.bind_address);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn get_today(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let today = state.today();
    let mut session = state.session();
    if session.active_day.is_none() {
        session.start_active_day(today);
    }
    let active = session.active_day.clone();
    let preview = active.as_ref().map(|a| a.preview());
    let day_state = active.as_ref().map(|a| session.day_state(a.date));

    Json(serde_json::json!({
        "today": today,
        "activeMonth": session.active_month,
        "activeDay": active,
        "preview": preview,
        "state": day_state,
    }))
}

async fn set_today(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SimulatedDate>,
) -> Response {
    let date = match payload.date.as_deref().map(parse_date).transpose() {
        Ok(date) => date,
        Err(e) => return error_response(e),
    };
    *state
        .simulated_today
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = date;

    let today = state.today();
    state.session().start_active_day(today);
    let (outcome, sync) = state.roll_over();

    Json(serde_json::json!({
        "today": today,
        "rollover": outcome,
        "sync": sync,
    }))
    .into_response()
}

async fn enter_step(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<StepUpdate>,
) -> Response {
    let Some(step) = Step::from_strng(&payload.step) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(StatusResponse {
                status: "error".to_string(),
                message: Some(format!("unknown step '{}'", payload.step)),
            }),
        )
            .into_response();
    };

    let today = state.today();
    let mut session = state.session();
    let active = session.enter_step(step, payload.fields.input(), today).clone();

    Json(serde_json::json!({
        "activeDay": active,
        "preview": active.preview(),
        "complete": active.is_complete(),
    }))
    .into_response()
}

async fn save_active(State(state): State<Arc<AppState>>) -> Response {
    let today = state.today();
    let mut session = state.session();
    match session.save_active_day(today) {
        Ok(outcome) => saved_response(&state, &session, outcome),
        Err(e) => error_response(e),
    }
}

async fn get_day(Path(date): Path<String>, State(state): State<Arc<AppState>>) -> Response {
    let date = match parse_date(&date) {
        Ok(date) => date,
        Err(e) => return error_response(e),
    };
    let session = state.session();
    match session.record(date) {
        Some(record) => Json(serde_json::json!({
            "record": record,
            "state": session.day_state(date),
        }))
        .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn save_day(
    Path(date): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DayUpdate>,
) -> Response {
    let date = match parse_date(&date) {
        Ok(date) => date,
        Err(e) => return error_response(e),
    };
    let inputs = PerStep::new(payload.step_a.input(), payload.step_b.input());

    let today = state.today();
    let mut session = state.session();
    match session.save_day_record(date, inputs, today) {
        Ok(outcome) => saved_response(&state, &session, outcome),
        Err(e) => error_response(e),
    }
}

async fn get_calendar(Path(month): Path<String>, State(state): State<Arc<AppState>>) -> Response {
    let month: MonthKey = match month.parse() {
        Ok(month) => month,
        Err(e) => return error_response(e),
    };
    let today = state.today();
    let session = state.session();

    Json(serde_json::json!({
        "month": month,
        "days": session.calendar_month(month, today),
    }))
    .into_response()
}

async fn list_months(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let session = state.session();
    let months: Vec<_> = session.months.values().rev().cloned().collect();
    Json(months)
}

async fn get_month(Path(month): Path<String>, State(state): State<Arc<AppState>>) -> Response {
    let month: MonthKey = match month.parse() {
        Ok(month) => month,
        Err(e) => return error_response(e),
    };
    let session = state.session();
    match session.months.get(&month) {
        Some(summary) => Json(summary.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn reset_month(
    Path(month): Path<String>,
    Query(params): Query<ResetQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let month: MonthKey = match month.parse() {
        Ok(month) => month,
        Err(e) => return error_response(e),
    };

    let mut session = state.session();
    match session.reset_month(month, &params.confirm) {
        Ok(removed) => {
            let mut sync = state.sync.delete_days(&session, &removed);
            sync.merge(state.sync.delete_summary(&session, month));

            Json(serde_json::json!({
                "status": "ok",
                "removed": removed,
                "sync": sync,
            }))
            .into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn check_rollover(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (outcome, sync) = state.roll_over();
    Json(serde_json::json!({
        "rollover": outcome,
        "sync": sync,
    }))
}

async fn export_json(State(state): State<Arc<AppState>>) -> Response {
    let session = state.session();
    match downloader::to_json(&session, Utc::now()) {
        Ok(json) => (
            [
                (header::CONTENT_TYPE, "application/json"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"daily-calculator.json\"",
                ),
            ],
            json,
        )
            .into_response(),
        Err(e) => error_response(CalcError::from(e)),
    }
}

async fn export_xlsx(State(state): State<Arc<AppState>>) -> Response {
    let session = state.session();
    match downloader::to_xlsx(&session) {
        Ok(buffer) => (
            [
                (
                    header::CONTENT_TYPE,
                    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                ),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"daily-calculator.xlsx\"",
                ),
            ],
            Bytes::from(buffer),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(StatusResponse {
                status: "error".to_string(),
                message: Some(e.to_string()),
            }),
        )
            .into_response(),
    }
}

async fn export_csv(State(state): State<Arc<AppState>>) -> Response {
    let session = state.session();
    match downloader::to_csv(&session) {
        Ok(csv) => ([(header::CONTENT_TYPE, "text/csv")], csv).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(StatusResponse {
                status: "error".to_string(),
                message: Some(e.to_string()),
            }),
        )
            .into_response(),
    }
}

async fn import_backup(State(state): State<Arc<AppState>>, mut multipart: Multipart) -> Response {
    let mut file_data = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return upload_error(e),
        };
        if field.name() == Some("backup") {
            file_data = match field.bytes().await {
                Ok(bytes) => bytes.to_vec(),
                Err(e) => return upload_error(e),
            };
        }
    }

    if file_data.is_empty() {
        return error_response(CalcError::Import("no file data received".to_string()));
    }

    let text = match String::from_utf8(file_data) {
        Ok(text) => text,
        Err(_) => return error_response(CalcError::Import("backup is not UTF-8".to_string())),
    };
    let imported = match loader::from_json(&text) {
        Ok(imported) => imported,
        Err(e) => return error_response(e),
    };

    let today = state.today();
    let mut session = state.session();
    let report = session.apply_import(imported, today, Utc::now());
    let sync = state.sync.persist_all(&session);

    Json(serde_json::json!({
        "status": "ok",
        "days": report.day_count,
        "months": report.month_count,
        "skipped": report.skipped,
        "repaired": report.repaired,
        "rollover": report.rollover,
        "sync": sync,
    }))
    .into_response()
}
