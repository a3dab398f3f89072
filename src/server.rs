use crate::data::{Assignment, ConfigError, DemandUnit, SchoolConfig, Timetable};
use crate::solver;
use crate::validator::{self, ValidationReport};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use log::info;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

const DEFAULT_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_MAX_ATTEMPTS: u32 = 100;

/// Runtime settings, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub addr: SocketAddr,
    /// JSON school config to serve as the default; the built-in sample when unset.
    pub config_path: Option<PathBuf>,
    /// Default number of scheduling attempts per request.
    pub attempts: u32,
    /// Largest `attempts` a request may ask for.
    pub max_attempts: u32,
}

#[derive(Debug, Error)]
#[error("Invalid value for {name}: {value:?}")]
pub struct SettingsError {
    name: &'static str,
    value: String,
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let addr = lookup("TIMETABLE_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let addr = addr.parse().map_err(|_| SettingsError {
            name: "TIMETABLE_ADDR",
            value: addr.clone(),
        })?;

        let attempts = match lookup("TIMETABLE_ATTEMPTS") {
            Some(raw) => raw.parse().map_err(|_| SettingsError {
                name: "TIMETABLE_ATTEMPTS",
                value: raw.clone(),
            })?,
            None => 1,
        };
        let max_attempts = match lookup("TIMETABLE_MAX_ATTEMPTS") {
            Some(raw) => raw.parse().map_err(|_| SettingsError {
                name: "TIMETABLE_MAX_ATTEMPTS",
                value: raw.clone(),
            })?,
            None => DEFAULT_MAX_ATTEMPTS,
        };
        if attempts > max_attempts {
            return Err(SettingsError {
                name: "TIMETABLE_ATTEMPTS",
                value: attempts.to_string(),
            });
        }

        Ok(Self {
            addr,
            config_path: lookup("TIMETABLE_CONFIG").map(PathBuf::from),
            attempts,
            max_attempts,
        })
    }

    pub fn load_school(&self) -> Result<SchoolConfig, ConfigError> {
        match &self.config_path {
            Some(path) => SchoolConfig::from_json_file(path),
            None => {
                let config = SchoolConfig::sample();
                config.validate()?;
                Ok(config)
            }
        }
    }
}

#[derive(Clone)]
struct AppState {
    school: Arc<SchoolConfig>,
    attempts: u32,
    max_attempts: u32,
}

impl AppState {
    fn config_or_default(&self, config: Option<SchoolConfig>) -> SchoolConfig {
        config.unwrap_or_else(|| self.school.as_ref().clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    config: Option<SchoolConfig>,
    seed: Option<u64>,
    attempts: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    seed: u64,
    attempts: u32,
    assignments: Vec<Assignment>,
    unassigned: Vec<DemandUnit>,
    by_class: BTreeMap<String, Vec<Assignment>>,
    by_teacher: BTreeMap<String, Vec<Assignment>>,
    report: ValidationReport,
}

#[derive(Debug, Deserialize)]
struct ValidateRequest {
    config: Option<SchoolConfig>,
    assignments: Vec<Assignment>,
}

async fn generate_handler(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, (StatusCode, String)> {
    let config = state.config_or_default(request.config);
    let seed = request.seed.unwrap_or_else(rand::random);
    let attempts = request.attempts.unwrap_or(state.attempts);
    if attempts > state.max_attempts {
        return Err((
            StatusCode::BAD_REQUEST,
            format!(
                "attempts must be at most {}, got {}",
                state.max_attempts, attempts
            ),
        ));
    }
    info!("Generating timetable with seed {} ({} attempts)", seed, attempts);

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let result = solver::solve(&config, attempts, &mut rng)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let timetable = &result.outcome.timetable;
    let by_class = config
        .classes
        .iter()
        .map(|class| (class.clone(), timetable.for_class(class)))
        .collect();
    let by_teacher = config
        .teachers
        .iter()
        .map(|t| (t.name.clone(), timetable.for_teacher(&t.name)))
        .collect();

    Ok(Json(GenerateResponse {
        seed,
        attempts: result.attempts,
        assignments: timetable.assignments(),
        unassigned: result.outcome.unassigned.clone(),
        by_class,
        by_teacher,
        report: result.report,
    }))
}

async fn validate_handler(
    State(state): State<AppState>,
    Json(request): Json<ValidateRequest>,
) -> Result<Json<ValidationReport>, (StatusCode, String)> {
    let config = state.config_or_default(request.config);
    config
        .validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let timetable = Timetable::from_assignments(&config, request.assignments)
        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;

    Ok(Json(validator::validate(&timetable, &config)))
}

async fn config_handler(State(state): State<AppState>) -> Json<SchoolConfig> {
    Json(state.school.as_ref().clone())
}

pub fn router(school: SchoolConfig, attempts: u32, max_attempts: u32) -> Router {
    Router::new()
        .route("/v1/timetable/generate", post(generate_handler))
        .route("/v1/timetable/validate", post(validate_handler))
        .route("/v1/timetable/config", get(config_handler))
        .with_state(AppState {
            school: Arc::new(school),
            attempts,
            max_attempts,
        })
}

pub async fn run_server(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let school = settings.load_school()?;
    info!(
        "Loaded school with {} classes, {} subjects and {} teachers",
        school.classes.len(),
        school.subjects.len(),
        school.teachers.len()
    );

    let app = router(school, settings.attempts, settings.max_attempts);
    let listener = tokio::net::TcpListener::bind(settings.addr).await?;

    info!("Server running at http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use tower::ServiceExt;

    fn app() -> Router {
        router(SchoolConfig::sample(), 1, 10)
    }

    fn toy_config() -> Value {
        json!({
            "classes": ["6A"],
            "subjects": ["Math"],
            "requirements": {"6A": {"Math": 2}},
            "teachers": [{"name": "Kumar", "subjects": ["Math"]}],
            "days": ["Monday"],
            "periodsPerDay": 2
        })
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, body)
    }

    async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        send(app, request).await
    }

    #[tokio::test]
    async fn test_generate_toy_config() {
        let (status, body) = post_json(
            app(),
            "/v1/timetable/generate",
            json!({"config": toy_config(), "seed": 11}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["seed"], 11);
        assert_eq!(body["attempts"], 1);
        assert_eq!(body["report"]["ok"], true);
        assert_eq!(body["assignments"].as_array().unwrap().len(), 2);
        assert_eq!(body["unassigned"], json!([]));
        assert_eq!(body["byTeacher"]["Kumar"].as_array().unwrap().len(), 2);
        assert_eq!(body["byClass"]["6A"][0]["period"], 1);
    }

    #[tokio::test]
    async fn test_generate_is_reproducible_with_seed() {
        let request = json!({"seed": 2024, "attempts": 2});
        let (_, first) = post_json(app(), "/v1/timetable/generate", request.clone()).await;
        let (_, second) = post_json(app(), "/v1/timetable/generate", request).await;

        assert_eq!(first["assignments"], second["assignments"]);
        assert_eq!(first["unassigned"], second["unassigned"]);
    }

    #[tokio::test]
    async fn test_generate_conserves_demand_on_default_school() {
        let (status, body) = post_json(app(), "/v1/timetable/generate", json!({"seed": 5})).await;

        assert_eq!(status, StatusCode::OK);
        let assigned = body["assignments"].as_array().unwrap().len();
        let unassigned = body["unassigned"].as_array().unwrap().len();
        assert_eq!(
            assigned + unassigned,
            SchoolConfig::sample().total_demand() as usize
        );
        assert_eq!(body["report"]["ok"], unassigned == 0);
    }

    #[tokio::test]
    async fn test_generate_rejects_malformed_config() {
        let mut config = toy_config();
        config["periodsPerDay"] = json!(0);
        let (status, body) =
            post_json(app(), "/v1/timetable/generate", json!({"config": config})).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!("Periods per day must be positive"));
    }

    #[tokio::test]
    async fn test_generate_rejects_attempts_above_limit() {
        let (status, body) = post_json(
            app(),
            "/v1/timetable/generate",
            json!({"config": toy_config(), "attempts": u32::MAX}),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!("attempts must be at most 10, got 4294967295"));
    }

    #[tokio::test]
    async fn test_generate_accepts_attempts_at_limit() {
        let (status, body) = post_json(
            app(),
            "/v1/timetable/generate",
            json!({"config": toy_config(), "attempts": 10}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["attempts"], 1);
    }

    #[tokio::test]
    async fn test_generate_rejects_oversized_demand() {
        let mut config = toy_config();
        config["requirements"]["6A"]["Math"] = json!(u32::MAX);
        let (status, body) =
            post_json(app(), "/v1/timetable/generate", json!({"config": config})).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.as_str().unwrap().starts_with("Total demand of 4294967295 periods"));
    }

    #[tokio::test]
    async fn test_validate_reports_double_booking() {
        let config = json!({
            "classes": ["6A", "6B"],
            "subjects": ["Math"],
            "requirements": {"6A": {"Math": 1}, "6B": {"Math": 1}},
            "teachers": [{"name": "Kumar", "subjects": ["Math"]}],
            "days": ["Monday"],
            "periodsPerDay": 1
        });
        let assignments = json!([
            {"class": "6A", "subject": "Math", "teacher": "Kumar", "day": "Monday", "period": 1},
            {"class": "6B", "subject": "Math", "teacher": "Kumar", "day": "Monday", "period": 1}
        ]);
        let (status, body) = post_json(
            app(),
            "/v1/timetable/validate",
            json!({"config": config, "assignments": assignments}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "ok": false,
                "violations": [
                    {"kind": "teacherDoubleBooked", "teacher": "Kumar", "day": "Monday", "period": 1}
                ]
            })
        );
    }

    #[tokio::test]
    async fn test_validate_rejects_class_collision() {
        let assignments = json!([
            {"class": "6A", "subject": "Math", "teacher": "Kumar", "day": "Monday", "period": 1},
            {"class": "6A", "subject": "Math", "teacher": "Kumar", "day": "Monday", "period": 1}
        ]);
        let (status, _) = post_json(
            app(),
            "/v1/timetable/validate",
            json!({"config": toy_config(), "assignments": assignments}),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_config_endpoint_serves_default_school() {
        let request = Request::builder()
            .uri("/v1/timetable/config")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(app(), request).await;

        assert_eq!(status, StatusCode::OK);
        let config: SchoolConfig = serde_json::from_value(body).unwrap();
        assert_eq!(config, SchoolConfig::sample());
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::from_lookup(|_| None).unwrap();
        assert_eq!(settings.addr, DEFAULT_ADDR.parse::<SocketAddr>().unwrap());
        assert_eq!(settings.attempts, 1);
        assert_eq!(settings.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(settings.config_path.is_none());
        assert_eq!(settings.load_school().unwrap(), SchoolConfig::sample());
    }

    #[test]
    fn test_settings_from_values() {
        let env = HashMap::from([
            ("TIMETABLE_ADDR", "0.0.0.0:9000"),
            ("TIMETABLE_ATTEMPTS", "25"),
            ("TIMETABLE_MAX_ATTEMPTS", "50"),
            ("TIMETABLE_CONFIG", "/etc/school.json"),
        ]);
        let settings = Settings::from_lookup(|key| env.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(settings.addr.port(), 9000);
        assert_eq!(settings.attempts, 25);
        assert_eq!(settings.max_attempts, 50);
        assert_eq!(settings.config_path, Some(PathBuf::from("/etc/school.json")));
    }

    #[test]
    fn test_settings_reject_bad_attempts() {
        let err = Settings::from_lookup(|key| {
            (key == "TIMETABLE_ATTEMPTS").then(|| "many".to_string())
        })
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid value for TIMETABLE_ATTEMPTS: \"many\"");
    }

    #[test]
    fn test_settings_reject_default_attempts_above_max() {
        let env = HashMap::from([
            ("TIMETABLE_ATTEMPTS", "20"),
            ("TIMETABLE_MAX_ATTEMPTS", "5"),
        ]);
        let err = Settings::from_lookup(|key| env.get(key).map(|v| v.to_string())).unwrap_err();
        assert_eq!(err.to_string(), "Invalid value for TIMETABLE_ATTEMPTS: \"20\"");
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let settings = Settings {
            addr: DEFAULT_ADDR.parse::<SocketAddr>().unwrap(),
            config_path: Some(PathBuf::from("/nonexistent/school.json")),
            attempts: 1,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        };
        assert!(matches!(settings.load_school(), Err(ConfigError::Io(_))));
    }
}
