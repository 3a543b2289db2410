//! Widget orchestration: configuration, source resolution, loading and the
//! per-widget state machine.

use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coursecat_core::{
    query, seed_catalog, CourseRecord, DisplayCourse, QuerySpec, SortBy, DEFAULT_LIMIT,
};
use coursecat_normalize::{normalize_response, ShapeError};
use coursecat_remote::{FetchError, HttpClientConfig, HttpFetcher};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "coursecat-widget";

/// Path of the built-in mock course API.
pub const MOCK_COURSES_PATH: &str = "/api/mock/courses";

/// Embed-time widget configuration, as written in page markup, YAML or a
/// query string. Ill-typed values are dropped rather than rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetConfig {
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub api_endpoint_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_sort", skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<SortBy>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub university: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "lenient_limit", skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

impl WidgetConfig {
    pub fn resolve(&self) -> ResolvedSource {
        resolve(self.api_endpoint_url.as_deref())
    }

    /// The query exactly as configured; defaults are left to whichever side
    /// executes it.
    pub fn query_spec(&self) -> QuerySpec {
        QuerySpec {
            sort_by: self.sort_by.clone(),
            university: self.university.clone(),
            country: self.country.clone(),
            category: self.category.clone(),
            limit: self.limit,
        }
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match JsonValue::deserialize(d)? {
        JsonValue::String(s) => Some(s),
        _ => None,
    })
}

fn lenient_sort<'de, D: Deserializer<'de>>(d: D) -> Result<Option<SortBy>, D::Error> {
    Ok(lenient_string(d)?
        .filter(|s| !s.trim().is_empty())
        .map(|s| SortBy::parse(&s)))
}

fn lenient_limit<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Ok(match JsonValue::deserialize(d)? {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        JsonValue::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
        }
        _ => None,
    })
}

/// Where a widget's courses come from. Chosen once per configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", content = "url", rename_all = "lowercase")]
pub enum ResolvedSource {
    Mock,
    Remote(String),
}

pub fn resolve(endpoint: Option<&str>) -> ResolvedSource {
    let Some(raw) = endpoint else {
        return ResolvedSource::Mock;
    };
    let lowered = raw.trim().to_lowercase();
    let is_mock = lowered.is_empty()
        || lowered == "mock"
        || lowered == MOCK_COURSES_PATH
        || lowered.contains("mock/courses")
        || lowered.ends_with(MOCK_COURSES_PATH);
    if is_mock {
        return ResolvedSource::Mock;
    }
    let trimmed = raw.trim();
    let base = trimmed
        .split(['?', '#'])
        .next()
        .unwrap_or(trimmed);
    ResolvedSource::Remote(base.to_string())
}

/// `base` plus `sort`, `university`, `country`, `category`, `limit` in that
/// order, each only when set. A limit equal to [`DEFAULT_LIMIT`] is left to
/// the remote's own default.
pub fn remote_url(base: &str, spec: &QuerySpec) -> String {
    let mut params = url::form_urlencoded::Serializer::new(String::new());
    let sort = spec.sort_by.as_ref().map(SortBy::as_str);
    for (key, value) in [
        ("sort", sort),
        ("university", spec.university.as_deref()),
        ("country", spec.country.as_deref()),
        ("category", spec.category.as_deref()),
    ] {
        if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
            params.append_pair(key, value);
        }
    }
    if let Some(limit) = spec.limit.filter(|l| *l != DEFAULT_LIMIT as i64) {
        params.append_pair("limit", &limit.to_string());
    }
    let params = params.finish();
    if params.is_empty() {
        base.to_string()
    } else {
        format!("{base}?{params}")
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub mock_latency: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: 20,
            user_agent: "coursecat/0.1".to_string(),
            mock_latency: Duration::from_millis(300),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            http_timeout_secs: std::env::var("COURSECAT_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            user_agent: std::env::var("COURSECAT_USER_AGENT").unwrap_or(defaults.user_agent),
            mock_latency: std::env::var("COURSECAT_MOCK_LATENCY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.mock_latency),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
        }
    }
}

/// A successfully resolved course list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedCourses {
    pub courses: Vec<DisplayCourse>,
    /// The remote answered with JSON that holds no recognizable course list.
    pub unrecognized_shape: bool,
    pub loaded_at: DateTime<Utc>,
}

impl LoadedCourses {
    pub fn new(courses: Vec<DisplayCourse>) -> Self {
        Self {
            courses,
            unrecognized_shape: false,
            loaded_at: Utc::now(),
        }
    }

    pub fn unrecognized() -> Self {
        Self {
            unrecognized_shape: true,
            ..Self::new(Vec::new())
        }
    }
}

#[async_trait]
pub trait CourseSource: Send + Sync {
    async fn load(&self, source: &ResolvedSource, spec: &QuerySpec) -> Result<LoadedCourses, FetchError>;
}

/// Serves mock loads from an in-process catalog and remote loads over HTTP.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    catalog: Arc<Vec<CourseRecord>>,
    fetcher: HttpFetcher,
    mock_latency: Duration,
}

impl CatalogClient {
    pub fn new(catalog: Vec<CourseRecord>, config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            catalog: Arc::new(catalog),
            fetcher: HttpFetcher::new(config.http_client_config())?,
            mock_latency: config.mock_latency,
        })
    }

    pub fn with_seed_catalog(config: &ClientConfig) -> Result<Self> {
        Self::new(seed_catalog(), config)
    }

    pub fn catalog(&self) -> &[CourseRecord] {
        &self.catalog
    }

    /// Run a query against the local catalog, applying the widget's default
    /// `newest` ordering when no sort is configured.
    pub fn query_mock(&self, spec: &QuerySpec) -> Vec<CourseRecord> {
        let mut spec = spec.clone();
        spec.sort_by.get_or_insert_with(SortBy::default);
        query(&self.catalog, &spec)
    }
}

#[async_trait]
impl CourseSource for CatalogClient {
    async fn load(&self, source: &ResolvedSource, spec: &QuerySpec) -> Result<LoadedCourses, FetchError> {
        match source {
            ResolvedSource::Mock => {
                if !self.mock_latency.is_zero() {
                    tokio::time::sleep(self.mock_latency).await;
                }
                let rows = self.query_mock(spec);
                Ok(LoadedCourses::new(rows.iter().map(DisplayCourse::from).collect()))
            }
            ResolvedSource::Remote(base) => {
                let url = remote_url(base, spec);
                let body = self.fetcher.fetch_json(&url).await?;
                match normalize_response(&body) {
                    Ok(courses) => Ok(LoadedCourses::new(courses)),
                    Err(ShapeError::Unrecognized) => {
                        warn!(%url, "remote course API returned an unrecognized envelope");
                        Ok(LoadedCourses::unrecognized())
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RequestFailed,
    MalformedResponse,
    Transport,
}

/// Displayable record of a failed load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WidgetFailure {
    pub kind: FailureKind,
    pub status: Option<u16>,
    pub message: String,
}

impl From<&FetchError> for WidgetFailure {
    fn from(err: &FetchError) -> Self {
        let kind = match err {
            FetchError::RequestFailed { .. } => FailureKind::RequestFailed,
            FetchError::MalformedResponse { .. } => FailureKind::MalformedResponse,
            FetchError::Transport(_) => FailureKind::Transport,
        };
        Self {
            kind,
            status: err.status(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum WidgetState {
    Idle,
    Loading { token: u64 },
    Success(LoadedCourses),
    Failed(WidgetFailure),
}

/// Issued when a load starts; only the newest ticket may settle the widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub token: u64,
    pub source: ResolvedSource,
    pub spec: QuerySpec,
}

#[derive(Debug, Clone)]
pub struct Widget {
    config: WidgetConfig,
    source: ResolvedSource,
    state: WidgetState,
    last_token: u64,
    last_loaded: Option<LoadedCourses>,
}

impl Widget {
    pub fn new(config: WidgetConfig) -> Self {
        Self {
            source: config.resolve(),
            config,
            state: WidgetState::Idle,
            last_token: 0,
            last_loaded: None,
        }
    }

    pub fn config(&self) -> &WidgetConfig {
        &self.config
    }

    pub fn source(&self) -> &ResolvedSource {
        &self.source
    }

    pub fn state(&self) -> &WidgetState {
        &self.state
    }

    /// Last successfully loaded list; kept while a newer load is in flight.
    pub fn last_loaded(&self) -> Option<&LoadedCourses> {
        self.last_loaded.as_ref()
    }

    /// Swap the configuration and start a load that supersedes any other.
    pub fn configure(&mut self, config: WidgetConfig) -> LoadTicket {
        self.source = config.resolve();
        self.config = config;
        self.begin()
    }

    pub fn refresh(&mut self) -> LoadTicket {
        self.begin()
    }

    fn begin(&mut self) -> LoadTicket {
        self.last_token += 1;
        self.state = WidgetState::Loading {
            token: self.last_token,
        };
        LoadTicket {
            token: self.last_token,
            source: self.source.clone(),
            spec: self.config.query_spec(),
        }
    }

    /// Apply a finished load. Returns `false` when the result belongs to a
    /// superseded (or already settled) request and was dropped.
    pub fn settle(&mut self, token: u64, outcome: Result<LoadedCourses, FetchError>) -> bool {
        let current = matches!(self.state, WidgetState::Loading { token: t } if t == token);
        if !current {
            debug!(token, latest = self.last_token, "discarding superseded course load");
            return false;
        }
        self.state = match outcome {
            Ok(loaded) => {
                self.last_loaded = Some(loaded.clone());
                WidgetState::Success(loaded)
            }
            Err(err) => {
                warn!(error = %err, "course load failed");
                WidgetState::Failed(WidgetFailure::from(&err))
            }
        };
        true
    }
}

/// A widget shared between tasks. Loads run without holding the lock, so a
/// reconfiguration can start while an older load is still in flight.
#[derive(Debug, Clone)]
pub struct SharedWidget {
    inner: Arc<Mutex<Widget>>,
    settled: Arc<Notify>,
}

impl SharedWidget {
    pub fn new(config: WidgetConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Widget::new(config))),
            settled: Arc::new(Notify::new()),
        }
    }

    pub async fn state(&self) -> WidgetState {
        self.inner.lock().await.state().clone()
    }

    /// Current state once no load is in flight. A caller whose own load was
    /// superseded waits here for the newer one instead of seeing `Loading`.
    pub async fn settled_state(&self) -> WidgetState {
        loop {
            let mut notified = pin!(self.settled.notified());
            notified.as_mut().enable();
            let state = self.state().await;
            if !matches!(state, WidgetState::Loading { .. }) {
                return state;
            }
            notified.await;
        }
    }

    pub async fn source(&self) -> ResolvedSource {
        self.inner.lock().await.source().clone()
    }

    pub async fn reconfigure(&self, courses: &dyn CourseSource, config: WidgetConfig) -> bool {
        let ticket = self.inner.lock().await.configure(config);
        self.run(courses, ticket).await
    }

    pub async fn refresh(&self, courses: &dyn CourseSource) -> bool {
        let ticket = self.inner.lock().await.refresh();
        self.run(courses, ticket).await
    }

    async fn run(&self, courses: &dyn CourseSource, ticket: LoadTicket) -> bool {
        let outcome = courses.load(&ticket.source, &ticket.spec).await;
        let applied = self.inner.lock().await.settle(ticket.token, outcome);
        if applied {
            self.settled.notify_waiters();
        }
        applied
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WidgetRegistry {
    #[serde(default)]
    pub widgets: Vec<WidgetDefinition>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WidgetDefinition {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub config: WidgetConfig,
}

impl WidgetRegistry {
    pub fn get(&self, id: &str) -> Option<&WidgetDefinition> {
        self.widgets.iter().find(|w| w.id == id)
    }
}

/// Load `widgets.yaml`. A missing file yields an empty registry.
pub async fn load_widget_registry(path: impl AsRef<Path>) -> Result<WidgetRegistry> {
    let path = path.as_ref();
    if !tokio::fs::try_exists(path)
        .await
        .with_context(|| format!("checking {}", path.display()))?
    {
        return Ok(WidgetRegistry::default());
    }
    let yaml = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let registry: WidgetRegistry =
        serde_yaml::from_str(&yaml).with_context(|| format!("parsing {}", path.display()))?;

    let mut ids = std::collections::HashSet::new();
    for widget in &registry.widgets {
        if !ids.insert(widget.id.as_str()) {
            bail!("duplicate widget id {:?} in {}", widget.id, path.display());
        }
    }
    Ok(registry)
}

pub fn default_registry_path() -> PathBuf {
    std::env::var("COURSECAT_WIDGETS")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("widgets.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursecat_core::Fee;

    fn instant_client() -> CatalogClient {
        CatalogClient::with_seed_catalog(&ClientConfig {
            mock_latency: Duration::ZERO,
            ..ClientConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn mock_sentinels_resolve_to_mock() {
        for endpoint in [
            "",
            "   ",
            "mock",
            " MOCK ",
            "/api/mock/courses",
            "https://x.test/api/mock/courses",
            "https://x.test/api/mock/courses?limit=3",
            "https://cdn.test/v2/mock/courses/all",
        ] {
            assert_eq!(resolve(Some(endpoint)), ResolvedSource::Mock, "{endpoint:?}");
        }
        assert_eq!(resolve(None), ResolvedSource::Mock);
    }

    #[test]
    fn other_endpoints_resolve_to_remote_without_query() {
        assert_eq!(
            resolve(Some("https://x.test/api/courses")),
            ResolvedSource::Remote("https://x.test/api/courses".into())
        );
        assert_eq!(
            resolve(Some("  https://x.test/api/courses?sort=oldest&limit=2 ")),
            ResolvedSource::Remote("https://x.test/api/courses".into())
        );
        assert_eq!(
            resolve(Some("/api/courses")),
            ResolvedSource::Remote("/api/courses".into())
        );
    }

    #[test]
    fn remote_url_includes_only_present_params_in_fixed_order() {
        let spec = QuerySpec {
            sort_by: Some(SortBy::Popularity),
            university: None,
            country: Some("United Kingdom".into()),
            category: Some("  ".into()),
            limit: Some(3),
        };
        assert_eq!(
            remote_url("https://x.test/api/courses", &spec),
            "https://x.test/api/courses?sort=popularity&country=United+Kingdom&limit=3"
        );
        assert_eq!(
            remote_url("https://x.test/api/courses", &QuerySpec::default()),
            "https://x.test/api/courses"
        );

        let default_limit = QuerySpec {
            limit: Some(8),
            ..QuerySpec::default()
        };
        assert_eq!(remote_url("/api/courses", &default_limit), "/api/courses");
        let zero = QuerySpec {
            limit: Some(0),
            ..QuerySpec::default()
        };
        assert_eq!(remote_url("/api/courses", &zero), "/api/courses?limit=0");

        let all = QuerySpec {
            sort_by: Some(SortBy::Oldest),
            university: Some("ubc".into()),
            country: Some("Canada".into()),
            category: Some("Arts & Design".into()),
            limit: Some(10),
        };
        assert_eq!(
            remote_url("/api/courses", &all),
            "/api/courses?sort=oldest&university=ubc&country=Canada&category=Arts+%26+Design&limit=10"
        );
    }

    #[test]
    fn config_deserialization_is_lenient() {
        let config: WidgetConfig = serde_json::from_str(
            r#"{"apiEndpointUrl": 42, "sortBy": "popularity", "country": "Canada", "limit": "abc"}"#,
        )
        .unwrap();
        assert_eq!(config.api_endpoint_url, None);
        assert_eq!(config.resolve(), ResolvedSource::Mock);
        assert_eq!(config.sort_by, Some(SortBy::Popularity));
        assert_eq!(config.limit, None);

        let numeric: WidgetConfig = serde_json::from_str(r#"{"limit": "5"}"#).unwrap();
        assert_eq!(numeric.limit, Some(5));
        let float: WidgetConfig = serde_json::from_str(r#"{"limit": 4.8}"#).unwrap();
        assert_eq!(float.limit, Some(4));
    }

    #[tokio::test]
    async fn mock_load_defaults_to_newest_and_eight() {
        let client = instant_client();
        let loaded = client
            .load(&ResolvedSource::Mock, &QuerySpec::default())
            .await
            .unwrap();
        assert_eq!(loaded.courses.len(), 8);
        assert_eq!(loaded.courses[0].name, "MSc Advanced Computer Science");
        assert!(!loaded.unrecognized_shape);
    }

    #[tokio::test]
    async fn mock_load_normalizes_free_tuition() {
        let client = instant_client();
        let spec = QuerySpec {
            country: Some("Germany".into()),
            sort_by: Some(SortBy::Oldest),
            ..QuerySpec::default()
        };
        let loaded = client.load(&ResolvedSource::Mock, &spec).await.unwrap();
        assert_eq!(loaded.courses.len(), 3);
        assert!(loaded.courses.iter().all(|c| c.fee == Some(Fee::Free)));
    }

    #[test]
    fn superseded_ticket_is_discarded() {
        let mut widget = Widget::new(WidgetConfig::default());
        assert_eq!(widget.state(), &WidgetState::Idle);

        let first = widget.refresh();
        let second = widget.configure(WidgetConfig {
            country: Some("Canada".into()),
            ..WidgetConfig::default()
        });
        assert!(second.token > first.token);
        assert_eq!(second.spec.country.as_deref(), Some("Canada"));

        assert!(widget.settle(second.token, Ok(LoadedCourses::new(vec![]))));
        assert!(!widget.settle(first.token, Ok(LoadedCourses::unrecognized())));
        match widget.state() {
            WidgetState::Success(loaded) => assert!(!loaded.unrecognized_shape),
            other => panic!("unexpected state {other:?}"),
        }
        assert!(!widget.settle(second.token, Ok(LoadedCourses::unrecognized())));
    }

    #[test]
    fn failure_keeps_previous_list_available() {
        let mut widget = Widget::new(WidgetConfig::default());
        let ok = widget.refresh();
        widget.settle(ok.token, Ok(LoadedCourses::new(vec![])));
        let failing = widget.refresh();
        assert!(matches!(widget.state(), WidgetState::Loading { .. }));
        assert!(widget.last_loaded().is_some());

        let err = FetchError::RequestFailed {
            status: 502,
            url: "https://x.test/api/courses".into(),
        };
        assert!(widget.settle(failing.token, Err(err)));
        match widget.state() {
            WidgetState::Failed(failure) => {
                assert_eq!(failure.kind, FailureKind::RequestFailed);
                assert_eq!(failure.status, Some(502));
            }
            other => panic!("unexpected state {other:?}"),
        }
        assert!(widget.last_loaded().is_some());
    }

    #[test]
    fn configure_recomputes_source() {
        let mut widget = Widget::new(WidgetConfig::default());
        assert_eq!(widget.source(), &ResolvedSource::Mock);
        let ticket = widget.configure(WidgetConfig {
            api_endpoint_url: Some("https://x.test/api/courses?old=1".into()),
            ..WidgetConfig::default()
        });
        assert_eq!(ticket.source, ResolvedSource::Remote("https://x.test/api/courses".into()));
        assert_eq!(widget.source(), &ticket.source);
    }

    #[derive(Default)]
    struct GatedSource {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl CourseSource for GatedSource {
        async fn load(&self, _source: &ResolvedSource, spec: &QuerySpec) -> Result<LoadedCourses, FetchError> {
            let label = spec.country.clone().unwrap_or_default();
            if label == "Slow" {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok(LoadedCourses::new(vec![DisplayCourse {
                name: label,
                university: None,
                country: None,
                category: None,
                fee: None,
            }]))
        }
    }

    fn country(country: &str) -> WidgetConfig {
        WidgetConfig {
            country: Some(country.into()),
            ..WidgetConfig::default()
        }
    }

    #[tokio::test]
    async fn stale_result_never_overwrites_fresher_state() {
        let widget = SharedWidget::new(WidgetConfig::default());
        let source = Arc::new(GatedSource::default());

        let slow = {
            let widget = widget.clone();
            let source = source.clone();
            tokio::spawn(async move { widget.reconfigure(source.as_ref(), country("Slow")).await })
        };
        source.entered.notified().await;

        assert!(widget.reconfigure(source.as_ref(), country("Fast")).await);
        source.release.notify_one();
        assert!(!slow.await.unwrap());

        match widget.state().await {
            WidgetState::Success(loaded) => assert_eq!(loaded.courses[0].name, "Fast"),
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[derive(Default)]
    struct TwoGates {
        entered: Notify,
        first: Notify,
        second: Notify,
    }

    #[async_trait]
    impl CourseSource for TwoGates {
        async fn load(&self, _source: &ResolvedSource, spec: &QuerySpec) -> Result<LoadedCourses, FetchError> {
            let label = spec.country.clone().unwrap_or_default();
            self.entered.notify_one();
            match label.as_str() {
                "First" => self.first.notified().await,
                _ => self.second.notified().await,
            }
            Ok(LoadedCourses::new(vec![DisplayCourse {
                name: label,
                university: None,
                country: None,
                category: None,
                fee: None,
            }]))
        }
    }

    #[tokio::test]
    async fn superseded_caller_waits_for_the_newer_load() {
        let widget = SharedWidget::new(WidgetConfig::default());
        let source = Arc::new(TwoGates::default());

        let first = {
            let widget = widget.clone();
            let source = source.clone();
            tokio::spawn(async move {
                let applied = widget.reconfigure(source.as_ref(), country("First")).await;
                (applied, widget.settled_state().await)
            })
        };
        source.entered.notified().await;

        let second = {
            let widget = widget.clone();
            let source = source.clone();
            tokio::spawn(async move { widget.reconfigure(source.as_ref(), country("Second")).await })
        };
        source.entered.notified().await;

        source.first.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!first.is_finished());
        assert!(matches!(widget.state().await, WidgetState::Loading { .. }));

        source.second.notify_one();
        assert!(second.await.unwrap());
        let (applied, state) = first.await.unwrap();
        assert!(!applied);
        match state {
            WidgetState::Success(loaded) => assert_eq!(loaded.courses[0].name, "Second"),
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[tokio::test]
    async fn settled_state_returns_immediately_when_not_loading() {
        let widget = SharedWidget::new(WidgetConfig::default());
        assert!(matches!(widget.settled_state().await, WidgetState::Idle));
    }

    #[tokio::test]
    async fn registry_loads_yaml_and_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = load_widget_registry(dir.path().join("nope.yaml")).await.unwrap();
        assert!(missing.widgets.is_empty());

        let path = dir.path().join("widgets.yaml");
        std::fs::write(
            &path,
            r#"
widgets:
  - id: canada-popular
    title: Popular in Canada
    config:
      sortBy: popularity
      country: Canada
      limit: 3
  - id: partner
    config:
      apiEndpointUrl: https://partner.test/api/courses
"#,
        )
        .unwrap();
        let registry = load_widget_registry(&path).await.unwrap();
        assert_eq!(registry.widgets.len(), 2);
        let canada = registry.get("canada-popular").unwrap();
        assert_eq!(canada.config.limit, Some(3));
        assert_eq!(canada.config.resolve(), ResolvedSource::Mock);
        assert_eq!(
            registry.get("partner").unwrap().config.resolve(),
            ResolvedSource::Remote("https://partner.test/api/courses".into())
        );

        std::fs::write(&path, "widgets:\n  - id: a\n  - id: a\n").unwrap();
        assert!(load_widget_registry(&path).await.is_err());
    }
}
