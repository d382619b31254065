use std::convert::Infallible;
use std::path::PathBuf;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    response::sse::{Event, KeepAlive, Sse},
    routing::post,
    Json, Router,
};
use futures::stream::{self, Stream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::middleware::{query_limiter, rate_limiter_middleware};
use crate::models::{AppState, ErrorResponse};
use crate::pipeline::{SessionEvent, SessionRequest, SessionRunner, SourceRequest};
use crate::sources::{OriginKind, UploadedFile};
use crate::types::{AppError, AppResult};

pub fn router(state: AppState) -> Router {
    let body_limit = state.config.server.max_upload_bytes;
    let mut router = Router::new().route("/api/query", post(start_query));
    if let Some(limiter) = query_limiter(state.config.server.query_rate_per_minute) {
        router = router.route_layer(from_fn_with_state(limiter, rate_limiter_middleware));
    }
    router
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Fields of the query form, as sent by the browser
#[derive(Debug, Default)]
struct QueryForm {
    api_key: Option<String>,
    source: Option<String>,
    folder_path: Option<String>,
    urls: Option<String>,
    question: Option<String>,
    files: Vec<UploadedFile>,
}

/// Browsers may send a full client-side path; keep only the last component
fn upload_file_name(raw: &str) -> &str {
    raw.rsplit(['/', '\\']).next().unwrap_or(raw)
}

async fn read_form(mut multipart: Multipart) -> AppResult<QueryForm> {
    let mut form = QueryForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidRequest(format!("Failed to read multipart field: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();

        if name == "files" {
            let file_name = upload_file_name(field.file_name().unwrap_or("")).to_string();
            let content = field
                .bytes()
                .await
                .map_err(|e| AppError::InvalidRequest(format!("Failed to read {}: {}", file_name, e)))?;
            // An empty file input still submits one nameless part
            if file_name.is_empty() {
                continue;
            }
            debug!(file = %file_name, bytes = content.len(), "Received upload");
            form.files.push(UploadedFile { file_name, content });
            continue;
        }

        let text = field
            .text()
            .await
            .map_err(|e| AppError::InvalidRequest(format!("Failed to read field {}: {}", name, e)))?;
        match name.as_str() {
            "api_key" => form.api_key = Some(text),
            "source" => form.source = Some(text),
            "folder_path" => form.folder_path = Some(text),
            "urls" => form.urls = Some(text),
            "question" => form.question = Some(text),
            other => debug!(field = %other, "Ignoring unknown form field"),
        }
    }

    Ok(form)
}

impl QueryForm {
    fn into_request(self) -> AppResult<SessionRequest> {
        let source_id = self.source.as_deref().map(str::trim).unwrap_or("upload");
        let origin = OriginKind::from_id(source_id)
            .ok_or_else(|| AppError::InvalidRequest(format!("unknown source {:?}", source_id)))?;

        let source = match origin {
            OriginKind::Upload => SourceRequest::Upload(self.files),
            OriginKind::Folder => SourceRequest::Folder(PathBuf::from(
                self.folder_path.as_deref().unwrap_or("").trim(),
            )),
            OriginKind::UrlList => SourceRequest::UrlList(self.urls.unwrap_or_default()),
            OriginKind::FixedRemote => SourceRequest::FixedRemote,
        };

        Ok(SessionRequest {
            api_key: self.api_key,
            source,
            question: self.question.unwrap_or_default(),
        })
    }
}

fn to_sse(event: &SessionEvent) -> Event {
    Event::default()
        .event(event.name())
        .json_data(event)
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to serialize session event");
            Event::default().event("notice").data(e.to_string())
        })
}

async fn start_query(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, Json<ErrorResponse>)> {
    let request = read_form(multipart)
        .await
        .and_then(QueryForm::into_request)
        .map_err(|e| {
            warn!(error = %e, "Rejected query request");
            (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: e.to_string() }))
        })?;

    info!(source = ?request.source_kind(), question_len = request.question.len(), "Starting query session");

    let (tx, rx) = mpsc::unbounded_channel();
    let runner = SessionRunner::new(state.config.clone(), state.http.clone());
    tokio::spawn(async move {
        runner.run(request, tx).await;
    });

    let events = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok(to_sse(&event)), rx))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    const BOUNDARY: &str = "XBOUNDARY";

    fn multipart_body(fields: &[(&str, &str)], files: &[(&str, &str)]) -> String {
        let mut body = String::new();
        for (name, value) in fields {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            ));
        }
        for (file_name, content) in files {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{file_name}\"\r\n\
                 Content-Type: text/csv\r\n\r\n{content}\r\n"
            ));
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        body
    }

    fn post(body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/query")
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    #[test]
    fn test_upload_file_name() {
        assert_eq!(upload_file_name("AE.csv"), "AE.csv");
        assert_eq!(upload_file_name("C:\\data\\AE.csv"), "AE.csv");
        assert_eq!(upload_file_name("dir/sub/lb.xpt"), "lb.xpt");
    }

    #[test]
    fn test_form_to_request() {
        let form = QueryForm {
            source: Some("folder".to_string()),
            folder_path: Some(" /data/trial ".to_string()),
            question: Some("how many subjects".to_string()),
            ..QueryForm::default()
        };
        let request = form.into_request().unwrap();
        assert!(matches!(request.source, SourceRequest::Folder(ref p) if p == &PathBuf::from("/data/trial")));
        assert_eq!(request.question, "how many subjects");

        let unknown = QueryForm {
            source: Some("ftp".to_string()),
            ..QueryForm::default()
        };
        assert!(matches!(unknown.into_request(), Err(AppError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_unknown_source_is_rejected() {
        let work = tempfile::tempdir().unwrap();
        let app = router(AppState::new(crate::config::Config::for_tests(work.path())));

        let response = app
            .oneshot(post(multipart_body(&[("source", "ftp")], &[])))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_upload_streams_session_events() {
        let work = tempfile::tempdir().unwrap();
        let app = router(AppState::new(crate::config::Config::for_tests(work.path())));

        let response = app
            .oneshot(post(multipart_body(
                &[("source", "upload"), ("question", "")],
                &[("sample.csv", "id,name\n1,alice\n2,bob\n")],
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("event: loaded"));
        assert!(text.contains("\"store\":\"temp_sample.db\""));
        assert!(text.contains("event: notice"));
        assert!(text.contains("event: done"));
    }
}
