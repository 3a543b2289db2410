//! Axum service exposing the course API and embeddable widget fragments.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use askama::Template;
use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use coursecat_core::{facets, load_catalog, seed_catalog, CourseRecord, DisplayCourse, QuerySpec, SortBy};
use coursecat_widget::{
    default_registry_path, load_widget_registry, CatalogClient, ClientConfig, ResolvedSource,
    SharedWidget, WidgetConfig, WidgetRegistry, WidgetState,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::info;

pub const CRATE_NAME: &str = "coursecat-web";

#[derive(Clone)]
pub struct AppState {
    client: CatalogClient,
    registry: Arc<WidgetRegistry>,
    widgets: Arc<HashMap<String, SharedWidget>>,
}

impl AppState {
    pub fn new(client: CatalogClient, registry: WidgetRegistry) -> Self {
        let widgets = registry
            .widgets
            .iter()
            .map(|w| (w.id.clone(), SharedWidget::new(w.config.clone())))
            .collect();
        Self {
            client,
            registry: Arc::new(registry),
            widgets: Arc::new(widgets),
        }
    }
}

/// Parameters of the course API, mirroring what remote widgets send.
#[derive(Debug, Deserialize, Default)]
struct CoursesApiQuery {
    sort: Option<String>,
    university: Option<String>,
    country: Option<String>,
    category: Option<String>,
    limit: Option<String>,
}

impl CoursesApiQuery {
    fn into_spec(self) -> QuerySpec {
        QuerySpec {
            sort_by: self
                .sort
                .filter(|s| !s.trim().is_empty())
                .map(|s| SortBy::parse(&s)),
            university: self.university,
            country: self.country,
            category: self.category,
            limit: self.limit.and_then(|l| l.trim().parse().ok()),
        }
    }
}

#[derive(Debug, Serialize)]
struct CoursesEnvelope {
    data: Vec<CourseRecord>,
}

#[derive(Debug, Serialize)]
pub struct WidgetSummary {
    pub id: String,
    pub title: Option<String>,
    pub config: WidgetConfig,
    pub source: ResolvedSource,
}

#[derive(Debug, Clone)]
struct CourseRow {
    name: String,
    meta: String,
    fee: String,
}

impl From<&DisplayCourse> for CourseRow {
    fn from(course: &DisplayCourse) -> Self {
        let meta = [&course.university, &course.country, &course.category]
            .into_iter()
            .flatten()
            .cloned()
            .collect::<Vec<_>>()
            .join(" · ");
        Self {
            name: course.name.clone(),
            meta,
            fee: course.fee_label().unwrap_or_default(),
        }
    }
}

#[derive(Template)]
#[template(path = "course_list.html")]
struct CourseListTemplate {
    widget_id: String,
    title: String,
    loading: bool,
    failed: bool,
    message: String,
    rows: Vec<CourseRow>,
}

impl CourseListTemplate {
    fn from_state(widget_id: &str, title: String, state: &WidgetState) -> Self {
        let mut tpl = Self {
            widget_id: widget_id.to_string(),
            title,
            loading: false,
            failed: false,
            message: String::new(),
            rows: Vec::new(),
        };
        match state {
            WidgetState::Idle | WidgetState::Loading { .. } => tpl.loading = true,
            WidgetState::Success(loaded) => {
                tpl.rows = loaded.courses.iter().map(CourseRow::from).collect();
            }
            WidgetState::Failed(failure) => {
                tpl.failed = true;
                tpl.message = failure.message.clone();
            }
        }
        tpl
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/courses", get(courses_api_handler))
        .route("/api/mock/courses", get(courses_api_handler))
        .route("/api/catalog/facets", get(facets_handler))
        .route("/widgets", get(widgets_handler))
        .route("/widgets/{id}", get(widget_fragment_handler))
        .route("/widget", get(embed_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    info!(port, "serving course widgets");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

/// Build state from `COURSECAT_*` variables and serve on `COURSECAT_WEB_PORT`.
pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("COURSECAT_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let catalog = match std::env::var("COURSECAT_CATALOG") {
        Ok(path) => load_catalog(path)?,
        Err(_) => seed_catalog(),
    };
    let client = CatalogClient::new(catalog, &ClientConfig::from_env())?;
    let registry = load_widget_registry(default_registry_path()).await?;
    serve(AppState::new(client, registry), port).await
}

async fn courses_api_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CoursesApiQuery>,
) -> Json<CoursesEnvelope> {
    Json(CoursesEnvelope {
        data: state.client.query_mock(&query.into_spec()),
    })
}

async fn facets_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(facets(state.client.catalog())).into_response()
}

async fn widgets_handler(State(state): State<Arc<AppState>>) -> Json<Vec<WidgetSummary>> {
    Json(
        state
            .registry
            .widgets
            .iter()
            .map(|w| WidgetSummary {
                id: w.id.clone(),
                title: w.title.clone(),
                config: w.config.clone(),
                source: w.config.resolve(),
            })
            .collect(),
    )
}

async fn widget_fragment_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Response {
    let (Some(definition), Some(widget)) = (state.registry.get(&id), state.widgets.get(&id)) else {
        return (StatusCode::NOT_FOUND, Html("Widget not found".to_string())).into_response();
    };
    widget.refresh(&state.client).await;
    let title = definition.title.clone().unwrap_or_else(|| definition.id.clone());
    render_html(CourseListTemplate::from_state(&id, title, &widget.settled_state().await))
}

async fn embed_handler(
    State(state): State<Arc<AppState>>,
    Query(config): Query<WidgetConfig>,
) -> Response {
    let widget = SharedWidget::new(WidgetConfig::default());
    widget.reconfigure(&state.client, config).await;
    let mut resp = render_html(CourseListTemplate::from_state(
        "embed",
        "Courses".to_string(),
        &widget.state().await,
    ));
    resp.headers_mut().insert(
        header::HeaderName::from_static("hx-trigger"),
        header::HeaderValue::from_static("courseWidgetLoaded"),
    );
    resp
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {}", err)),
    )
        .into_response()
}
