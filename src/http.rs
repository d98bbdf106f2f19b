use crate::error::ProbeError;
use crate::service::PulseService;
use axum::extract::rejection::FormRejection;
use axum::extract::{Query, State};
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Form, Router};
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Default, Deserialize)]
pub struct PulseParams {
    #[serde(rename = "hKey")]
    pub h_key: Option<String>,
}

pub fn build_router(path: &str, service: PulseService) -> Router {
    Router::new()
        .route(path, get(pulse_handler).post(pulse_handler))
        .with_state(service)
}

async fn pulse_handler(
    State(service): State<PulseService>,
    uri: Uri,
    form: Result<Form<PulseParams>, FormRejection>,
) -> Response {
    let token = supplied_token(&uri, form.ok().map(|Form(params)| params));

    match service.respond(&token).await {
        Ok(record) => {
            let mut response = record.into_response();
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
            response
        }
        Err(ProbeError::AuthorizationFailure) => {
            warn!("rejected probe request");
            StatusCode::OK.into_response()
        }
        Err(err) => {
            warn!(kind = err.kind(), error = %err, "probe request failed");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

/// Form body first, then the query string; absent means empty.
fn supplied_token(uri: &Uri, form: Option<PulseParams>) -> String {
    form.and_then(|p| p.h_key)
        .or_else(|| {
            Query::<PulseParams>::try_from_uri(uri)
                .ok()
                .and_then(|Query(p)| p.h_key)
        })
        .unwrap_or_default()
}
