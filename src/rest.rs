//! JSON-over-HTTP implementation of the backend service traits.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::backend::{
    BookmarkService, ContentQuery, ContentScope, ContentSource, ProgressService, ReferenceSource,
    VideoSource, VideoStream,
};
use crate::config::{ApiConfig, VideoQuality};
use crate::error::{Error, Result};
use crate::model::{Category, CompletionStatus, ContentId, ContentPage, Domain};
use crate::session::User;

#[derive(Serialize)]
struct ProgressBody {
    content_id: ContentId,
    progress: CompletionStatus,
}

#[derive(Serialize)]
struct BookmarkBody {
    content_id: ContentId,
}

/// Path and fixed filter for each listing.
const fn scope_route(scope: ContentScope) -> (&'static str, Option<&'static str>) {
    match scope {
        ContentScope::Library => ("contents", None),
        ContentScope::InProgress => ("contents", Some("in_progress")),
        ContentScope::Completed => ("contents", Some("completed")),
        ContentScope::Bookmarked => ("bookmarks", None),
    }
}

/// Client for the content API. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl RestClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.timeout())
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .tcp_keepalive(Duration::from_secs(30))
            .user_agent(concat!("coursedeck/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout(),
        })
    }

    fn request(&self, method: Method, path: &str, user: &User) -> RequestBuilder {
        self.http
            .request(method, format!("{}/{path}", self.base_url))
            .bearer_auth(&user.token)
            .header(ACCEPT, "application/json")
    }

    /// Sends a JSON request with the configured timeout.
    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.timeout(self.timeout).send().await?;
        check_status(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let body = self.send(builder).await?.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        body
    };
    Err(Error::Api {
        status: status.as_u16(),
        message,
    })
}

fn not_found_as(id: ContentId, e: Error) -> Error {
    match e {
        Error::Api { status, .. } if status == StatusCode::NOT_FOUND.as_u16() => Error::NotFound(id),
        other => other,
    }
}

#[async_trait]
impl ReferenceSource<Domain> for RestClient {
    async fn fetch(&self, user: &User) -> Result<Vec<Domain>> {
        self.get_json(self.request(Method::GET, "domains", user)).await
    }
}

#[async_trait]
impl ReferenceSource<Category> for RestClient {
    async fn fetch(&self, user: &User) -> Result<Vec<Category>> {
        self.get_json(self.request(Method::GET, "categories", user)).await
    }
}

#[async_trait]
impl ContentSource for RestClient {
    async fn contents(&self, user: &User, query: &ContentQuery) -> Result<ContentPage> {
        let (path, completion) = scope_route(query.scope);
        let mut params = vec![
            ("page[number]".to_string(), query.page.to_string()),
            ("page[size]".to_string(), query.per_page.to_string()),
        ];
        if let Some(completion) = completion {
            params.push(("filter[completion_status]".to_string(), completion.to_string()));
        }
        params.extend(query.params.iter().cloned());
        self.get_json(self.request(Method::GET, path, user).query(&params))
            .await
    }
}

#[async_trait]
impl ProgressService for RestClient {
    async fn set_progress(
        &self,
        user: &User,
        id: ContentId,
        status: CompletionStatus,
    ) -> Result<CompletionStatus> {
        let body = ProgressBody {
            content_id: id,
            progress: status,
        };
        self.get_json(self.request(Method::POST, "progressions", user).json(&body))
            .await
            .map_err(|e| not_found_as(id, e))
    }

    async fn remove_progress(&self, user: &User, id: ContentId) -> Result<()> {
        self.send(self.request(Method::DELETE, &format!("progressions/{id}"), user))
            .await
            .map_err(|e| not_found_as(id, e))?;
        Ok(())
    }
}

#[async_trait]
impl BookmarkService for RestClient {
    async fn add_bookmark(&self, user: &User, id: ContentId) -> Result<()> {
        let body = BookmarkBody { content_id: id };
        self.send(self.request(Method::POST, "bookmarks", user).json(&body))
            .await
            .map_err(|e| not_found_as(id, e))?;
        Ok(())
    }

    async fn remove_bookmark(&self, user: &User, id: ContentId) -> Result<()> {
        self.send(self.request(Method::DELETE, &format!("bookmarks/{id}"), user))
            .await
            .map_err(|e| not_found_as(id, e))?;
        Ok(())
    }
}

#[async_trait]
impl VideoSource for RestClient {
    async fn open_video(
        &self,
        user: &User,
        id: ContentId,
        quality: VideoQuality,
    ) -> Result<VideoStream> {
        // No overall timeout: the body may take far longer than a JSON call.
        let response = self
            .request(Method::GET, &format!("contents/{id}/video"), user)
            .query(&[("quality", quality.as_param())])
            .send()
            .await?;
        let response = check_status(response).await.map_err(|e| not_found_as(id, e))?;
        Ok(VideoStream {
            size: response.content_length(),
            body: response
                .bytes_stream()
                .map(|chunk| chunk.map_err(Error::from))
                .boxed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::extract::{Path, Query, State};
    use axum::http::HeaderMap;
    use axum::response::IntoResponse;
    use axum::routing::{delete, get, post};
    use serde_json::{Value, json};

    use crate::testing::user;

    type Seen = Arc<Mutex<Vec<Vec<(String, String)>>>>;

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|h| h.to_str().ok())
            .is_some_and(|h| h == "Bearer token-1")
    }

    async fn domains(headers: HeaderMap) -> axum::response::Response {
        if !authorized(&headers) {
            return (StatusCode::UNAUTHORIZED, "bad token").into_response();
        }
        axum::Json(json!([
            {"id": 1, "name": "iOS & Swift", "slug": "ios"},
            {"id": 2, "name": "Android & Kotlin", "slug": "android"}
        ]))
        .into_response()
    }

    async fn contents(
        State(seen): State<Seen>,
        Query(params): Query<Vec<(String, String)>>,
    ) -> axum::Json<Value> {
        seen.lock().unwrap().push(params);
        axum::Json(json!({
            "items": [{
                "id": 5,
                "name": "Async Rust",
                "kind": "screencast",
                "released_at": "2024-05-01T00:00:00Z",
                "domain_ids": [2]
            }],
            "total": 41
        }))
    }

    async fn progressions(axum::Json(body): axum::Json<Value>) -> axum::Json<Value> {
        axum::Json(body["progress"].clone())
    }

    async fn missing_bookmark(Path(id): Path<u64>) -> impl IntoResponse {
        (StatusCode::NOT_FOUND, format!("no bookmark {id}"))
    }

    async fn video() -> &'static [u8] {
        b"0123456789"
    }

    async fn serve() -> (RestClient, Seen) {
        let seen: Seen = Arc::default();
        let api = Router::new()
            .route("/domains", get(domains))
            .route("/contents", get(contents))
            .route("/progressions", post(progressions))
            .route("/bookmarks/{id}", delete(missing_bookmark))
            .route("/contents/{id}/video", get(video))
            .with_state(Arc::clone(&seen));
        let app = Router::new().nest("/api", api);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = ApiConfig {
            base_url: format!("http://{addr}/api/"),
            ..ApiConfig::default()
        };
        (RestClient::new(&config).unwrap(), seen)
    }

    #[tokio::test]
    async fn fetches_reference_data_with_bearer_token() {
        let (client, _) = serve().await;
        let domains: Vec<Domain> = client.fetch(&user(1)).await.unwrap();
        assert_eq!(domains.len(), 2);
        assert_eq!(domains[1].slug, "android");

        let denied: Result<Vec<Domain>> = client.fetch(&user(2)).await;
        assert!(matches!(denied, Err(Error::Api { status: 401, ref message }) if message == "bad token"));
    }

    #[tokio::test]
    async fn content_query_sends_paging_and_filters() {
        let (client, seen) = serve().await;
        let query = ContentQuery {
            scope: ContentScope::Completed,
            page: 3,
            per_page: 20,
            params: vec![("filter[domain_ids][]".into(), "2".into())],
        };
        let page = client.contents(&user(1), &query).await.unwrap();
        assert_eq!(page.total, 41);
        assert_eq!(page.items[0].id, ContentId(5));

        let sent = seen.lock().unwrap().pop().unwrap();
        for expected in [
            ("page[number]", "3"),
            ("page[size]", "20"),
            ("filter[completion_status]", "completed"),
            ("filter[domain_ids][]", "2"),
        ] {
            assert!(
                sent.iter().any(|(k, v)| k == expected.0 && v == expected.1),
                "missing {expected:?} in {sent:?}"
            );
        }
    }

    #[tokio::test]
    async fn progress_returns_stored_status() {
        let (client, _) = serve().await;
        let stored = client
            .set_progress(&user(1), ContentId(5), CompletionStatus::in_progress(35))
            .await
            .unwrap();
        assert_eq!(stored, CompletionStatus::in_progress(35));
    }

    #[tokio::test]
    async fn missing_item_maps_to_not_found() {
        let (client, _) = serve().await;
        let err = client.remove_bookmark(&user(1), ContentId(8)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(ContentId(8))));
    }

    #[tokio::test]
    async fn video_streams_body() {
        let (client, _) = serve().await;
        let stream = client
            .open_video(&user(1), ContentId(5), VideoQuality::Hd)
            .await
            .unwrap();
        assert_eq!(stream.size, Some(10));

        let mut body = Vec::new();
        let mut chunks = stream.body;
        while let Some(chunk) = chunks.next().await {
            body.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(body, b"0123456789");
    }
}
