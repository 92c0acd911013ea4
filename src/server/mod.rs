mod pages;

use crate::error::{Error, Result};
use crate::loader::ArtifactLoader;
use crate::model::{check_path_component, ModelFetcher, ModelLoaderConfig};
use axum::{
	extract::State,
	http::{HeaderMap, StatusCode},
	response::{Html, IntoResponse, Response},
	routing::{get, post},
	Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// One entry of the public route table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RouteSpec {
	pub name: &'static str,
	pub method: &'static str,
	pub path: &'static str,
}

/// Every route the service exposes, in declaration order. The first four
/// describe the API itself.
pub const ROUTES: [RouteSpec; 9] = [
	RouteSpec { name: "openapi", method: "GET", path: "/openapi.json" },
	RouteSpec { name: "swagger_ui_html", method: "GET", path: "/docs" },
	RouteSpec { name: "swagger_ui_redirect", method: "GET", path: "/docs/oauth2-redirect" },
	RouteSpec { name: "redoc_html", method: "GET", path: "/redoc" },
	RouteSpec { name: "index_html", method: "GET", path: "/" },
	RouteSpec { name: "upload_file", method: "POST", path: "/uploadfile" },
	RouteSpec { name: "get_model_form", method: "GET", path: "/model-form" },
	RouteSpec { name: "load_model", method: "POST", path: "/load-model" },
	RouteSpec { name: "get_readiness", method: "GET", path: "/readiness" },
];

pub struct LoadedModel<L: ArtifactLoader> {
	pub config: ModelLoaderConfig,
	pub model: L::Model,
	pub tokenizer: L::Tokenizer,
	pub loaded_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadedDocument {
	pub filename: String,
	pub size: usize,
	pub uploaded_at: chrono::DateTime<chrono::Utc>,
	#[serde(skip)]
	pub text: String,
}

pub struct AppState<L: ArtifactLoader> {
	fetcher: Arc<ModelFetcher<L>>,
	loaded: Arc<RwLock<Option<LoadedModel<L>>>>,
	document: Arc<RwLock<Option<UploadedDocument>>>,
}

impl<L: ArtifactLoader> Clone for AppState<L> {
	fn clone(&self) -> Self {
		Self {
			fetcher: self.fetcher.clone(),
			loaded: self.loaded.clone(),
			document: self.document.clone(),
		}
	}
}

impl<L: ArtifactLoader + 'static> AppState<L> {
	pub fn new(fetcher: ModelFetcher<L>) -> Self {
		Self {
			fetcher: Arc::new(fetcher),
			loaded: Arc::new(RwLock::new(None)),
			document: Arc::new(RwLock::new(None)),
		}
	}

	pub async fn loaded_config(&self) -> Option<ModelLoaderConfig> {
		self.loaded.read().await.as_ref().map(|loaded| loaded.config.clone())
	}

	pub async fn document(&self) -> Option<UploadedDocument> {
		self.document.read().await.clone()
	}
}

#[derive(Serialize)]
struct ErrorResponse {
	error: String,
	timestamp: chrono::DateTime<chrono::Utc>,
}

impl IntoResponse for Error {
	fn into_response(self) -> Response {
		let status = match &self {
			Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
			Error::ModelNotFound(_) => StatusCode::NOT_FOUND,
			Error::AuthenticationFailed(_) | Error::RegistryError(_) | Error::DownloadFailed(_) => {
				StatusCode::BAD_GATEWAY
			}
			_ => StatusCode::INTERNAL_SERVER_ERROR,
		};

		let message = if status != StatusCode::INTERNAL_SERVER_ERROR {
			self.to_string()
		} else {
			tracing::error!(error = %self, "Internal error");
			if matches!(self, Error::ModelLoadFailed(_) | Error::ConfigParse { .. }) {
				self.to_string()
			} else {
				"Internal server error".to_string()
			}
		};

		let body = Json(ErrorResponse {
			error: message,
			timestamp: chrono::Utc::now(),
		});

		(status, body).into_response()
	}
}

async fn openapi() -> Json<serde_json::Value> {
	Json(pages::openapi_document(&ROUTES))
}

async fn swagger_ui_html() -> Html<String> {
	Html(pages::swagger_ui())
}

async fn swagger_ui_redirect() -> Html<&'static str> {
	Html(pages::OAUTH2_REDIRECT)
}

async fn redoc_html() -> Html<String> {
	Html(pages::redoc())
}

async fn index_html() -> Html<String> {
	Html(pages::index())
}

#[derive(Serialize)]
struct UploadResponse {
	filename: String,
	size: usize,
	uploaded_at: chrono::DateTime<chrono::Utc>,
}

async fn upload_file<L: ArtifactLoader + 'static>(
	State(state): State<AppState<L>>,
	headers: HeaderMap,
	body: String,
) -> Result<Json<UploadResponse>> {
	if body.trim().is_empty() {
		return Err(Error::InvalidInput("Uploaded file is empty".to_string()));
	}

	let filename = headers
		.get("x-filename")
		.and_then(|v| v.to_str().ok())
		.filter(|v| !v.is_empty())
		.unwrap_or("upload.txt")
		.to_string();

	let document = UploadedDocument {
		filename,
		size: body.len(),
		uploaded_at: chrono::Utc::now(),
		text: body,
	};
	tracing::info!("Received {} ({} bytes)", document.filename, document.size);

	let response = UploadResponse {
		filename: document.filename.clone(),
		size: document.size,
		uploaded_at: document.uploaded_at,
	};
	*state.document.write().await = Some(document);

	Ok(Json(response))
}

async fn get_model_form<L: ArtifactLoader + 'static>(
	State(state): State<AppState<L>>,
) -> Result<Html<String>> {
	let fetcher = state.fetcher.clone();
	let models = tokio::task::spawn_blocking(move || fetcher.list_model_names())
		.await
		.map_err(|e| Error::RegistryError(format!("Model listing task failed: {}", e)))??;

	Ok(Html(pages::model_form(ROUTES[7].path, &models)))
}

#[derive(Debug, Deserialize)]
pub struct LoadModelRequest {
	/// `name::version`, or a bare name for the latest version.
	pub model: String,
}

impl LoadModelRequest {
	fn parse(&self) -> Result<(&str, Option<&str>)> {
		let selection = self.model.trim();
		let (name, version) = match selection.split_once("::") {
			Some((name, version)) => (name, Some(version)),
			None => (selection, None),
		};

		check_path_component("model name", name)?;
		if let Some(version) = version {
			check_path_component("model version", version)?;
		}
		Ok((name, version))
	}
}

#[derive(Serialize)]
struct LoadModelResponse {
	model: String,
	version: String,
	loaded_at: chrono::DateTime<chrono::Utc>,
}

async fn load_model<L: ArtifactLoader + 'static>(
	State(state): State<AppState<L>>,
	Form(request): Form<LoadModelRequest>,
) -> Result<Json<LoadModelResponse>> {
	let (name, version) = request.parse()?;

	let fetcher = state.fetcher.clone();
	let base = {
		let fetcher = fetcher.clone();
		tokio::task::spawn_blocking(move || fetcher.resolver().resolve())
			.await
			.map_err(|e| Error::ConfigError(format!("Config task failed: {}", e)))??
	};
	let config = base.with_model(name, version);

	let fetch_config = config.clone();
	let (model, tokenizer) = tokio::task::spawn_blocking(move || fetcher.fetch(Some(&fetch_config)))
		.await
		.map_err(|e| Error::ModelLoadFailed(format!("Fetch task failed: {}", e)))??;

	let loaded_at = chrono::Utc::now();
	let response = LoadModelResponse {
		model: config.model_name.clone(),
		version: config.model_version.clone(),
		loaded_at,
	};

	*state.loaded.write().await = Some(LoadedModel {
		config,
		model,
		tokenizer,
		loaded_at,
	});

	Ok(Json(response))
}

#[derive(Serialize)]
struct ReadinessResponse {
	status: &'static str,
	#[serde(skip_serializing_if = "Option::is_none")]
	model: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	loaded_at: Option<chrono::DateTime<chrono::Utc>>,
}

async fn get_readiness<L: ArtifactLoader + 'static>(State(state): State<AppState<L>>) -> Response {
	let loaded = state.loaded.read().await;

	match loaded.as_ref() {
		Some(loaded) => (
			StatusCode::OK,
			Json(ReadinessResponse {
				status: "ready",
				model: Some(format!("{}::{}", loaded.config.model_name, loaded.config.model_version)),
				loaded_at: Some(loaded.loaded_at),
			}),
		)
			.into_response(),
		None => (
			StatusCode::SERVICE_UNAVAILABLE,
			Json(ReadinessResponse {
				status: "not_ready",
				model: None,
				loaded_at: None,
			}),
		)
			.into_response(),
	}
}

/// Routes are registered in [`ROUTES`] order.
pub fn create_router<L: ArtifactLoader + 'static>(state: AppState<L>) -> Router {
	Router::new()
		.route(ROUTES[0].path, get(openapi))
		.route(ROUTES[1].path, get(swagger_ui_html))
		.route(ROUTES[2].path, get(swagger_ui_redirect))
		.route(ROUTES[3].path, get(redoc_html))
		.route(ROUTES[4].path, get(index_html))
		.route(ROUTES[5].path, post(upload_file::<L>))
		.route(ROUTES[6].path, get(get_model_form::<L>))
		.route(ROUTES[7].path, post(load_model::<L>))
		.route(ROUTES[8].path, get(get_readiness::<L>))
		.with_state(state)
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(CorsLayer::permissive()),
		)
}

pub async fn serve<L: ArtifactLoader + 'static>(host: &str, port: u16, state: AppState<L>) -> Result<()> {
	let app = create_router(state);
	let addr = format!("{}:{}", host, port);

	tracing::info!("Starting server on {}", addr);

	let listener = tokio::net::TcpListener::bind(&addr)
		.await
		.map_err(|e| Error::ConfigError(format!("Failed to bind to {}: {}", addr, e)))?;

	axum::serve(listener, app)
		.await
		.map_err(|e| Error::ConfigError(format!("Server error: {}", e)))?;

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_route_table_order() {
		let names: Vec<&str> = ROUTES.iter().map(|r| r.name).collect();
		assert_eq!(ROUTES.len(), 9);
		assert_eq!(
			&names[4..],
			["index_html", "upload_file", "get_model_form", "load_model", "get_readiness"]
		);
	}

	#[test]
	fn test_route_paths_unique() {
		let mut paths: Vec<&str> = ROUTES.iter().map(|r| r.path).collect();
		paths.sort();
		paths.dedup();
		assert_eq!(paths.len(), ROUTES.len());
	}

	#[test]
	fn test_parse_model_selection() {
		let request = LoadModelRequest { model: "led-large::3".to_string() };
		assert_eq!(request.parse().unwrap(), ("led-large", Some("3")));

		let request = LoadModelRequest { model: " t5-small ".to_string() };
		assert_eq!(request.parse().unwrap(), ("t5-small", None));

		for bad in ["", "::1", "name::", "../escaped::1", "..::..", "a/b", "m::1\\2"] {
			let request = LoadModelRequest { model: bad.to_string() };
			assert!(matches!(request.parse(), Err(Error::InvalidInput(_))));
		}
	}
}
