mod dto;

use std::{
    sync::{PoisonError, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::{
    models::{AuthEvent, Task, TaskId, TaskInput, TaskUpdate},
    ports::outbound::RemoteTaskService,
    RemoteError,
};

use self::dto::{TaskDto, TimeSummaryRequest};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// REST client for the remote task store, authenticated with a bearer token.
///
/// A 401 or 403 from any call drops the token and publishes
/// [`AuthEvent::SignedOut`].
#[derive(Debug)]
pub struct HttpTaskService {
    client: Client,
    base_url: Url,
    token: RwLock<Option<String>>,
    events: broadcast::Sender<AuthEvent>,
}

impl HttpTaskService {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, RemoteError> {
        // A trailing slash keeps any path prefix when joining endpoints.
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized)
            .map_err(|e| RemoteError::Transport(format!("invalid API URL {base_url}: {e}")))?;

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RemoteError::Transport(format!("failed to build HTTP client: {e}")))?;

        let (events, _) = broadcast::channel(16);
        Ok(Self {
            client,
            base_url,
            token: RwLock::new(token.filter(|t| !t.trim().is_empty())),
            events,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn sign_in(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
        let _ = self.events.send(AuthEvent::SignedIn);
    }

    pub fn sign_out(&self) {
        let had_token = self
            .token
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        if had_token {
            let _ = self.events.send(AuthEvent::SignedOut);
        }
    }

    fn token(&self) -> Result<String, RemoteError> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(RemoteError::Unauthorized)
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        self.base_url
            .join(path)
            .map_err(|e| RemoteError::Transport(format!("failed to build URL for {path}: {e}")))
    }

    async fn send(
        &self,
        request: RequestBuilder,
        call_name: &str,
    ) -> Result<Response, RemoteError> {
        let token = self.token()?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(format!("{call_name}: {e}")))?;

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            warn!(call = call_name, %status, "Remote rejected credentials, signing out");
            self.sign_out();
            return Err(RemoteError::Unauthorized);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RemoteError::Server {
                status: status.as_u16(),
                message,
            });
        }

        debug!(call = call_name, %status, "Remote call succeeded");
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        call_name: &str,
    ) -> Result<T, RemoteError> {
        let response = self.send(request, call_name).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Decode(format!("{call_name}: {e}")))
    }

    async fn send_without_body(
        &self,
        request: RequestBuilder,
        call_name: &str,
    ) -> Result<(), RemoteError> {
        let response = self.send(request, call_name).await?;
        let _ = response.bytes().await;
        Ok(())
    }
}

#[async_trait]
impl RemoteTaskService for HttpTaskService {
    fn is_authenticated(&self) -> bool {
        self.token.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    async fn get_tasks(&self) -> Result<Vec<Task>, RemoteError> {
        let tasks: Vec<TaskDto> = self
            .get_json(self.client.get(self.endpoint("tasks")?), "GET /tasks")
            .await?;
        Ok(tasks.into_iter().map(Task::from).collect())
    }

    async fn create_task(&self, input: &TaskInput) -> Result<Task, RemoteError> {
        let task: TaskDto = self
            .get_json(
                self.client.post(self.endpoint("tasks")?).json(input),
                "POST /tasks",
            )
            .await?;
        Ok(task.into())
    }

    async fn update_task(&self, id: &TaskId, update: &TaskUpdate) -> Result<Task, RemoteError> {
        let task: TaskDto = self
            .get_json(
                self.client
                    .patch(self.endpoint(&format!("tasks/{id}"))?)
                    .json(update),
                "PATCH /tasks/{id}",
            )
            .await?;
        Ok(task.into())
    }

    async fn delete_task(&self, id: &TaskId) -> Result<(), RemoteError> {
        self.send_without_body(
            self.client.delete(self.endpoint(&format!("tasks/{id}"))?),
            "DELETE /tasks/{id}",
        )
        .await
    }

    async fn record_time_summary(&self, id: &TaskId, duration_ms: i64) -> Result<(), RemoteError> {
        self.send_without_body(
            self.client
                .post(self.endpoint(&format!("tasks/{id}/time-summary"))?)
                .json(&TimeSummaryRequest { duration_ms }),
            "POST /tasks/{id}/time-summary",
        )
        .await
    }

    fn subscribe_auth(&self) -> Option<broadcast::Receiver<AuthEvent>> {
        Some(self.events.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    /// Serve one canned HTTP response and hand back the raw request.
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let n = socket.read(&mut buf).await.unwrap();
            let response = format!(
                "HTTP/1.1 {status_line}\r\n\
                 content-type: application/json\r\n\
                 content-length: {}\r\n\
                 connection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });
        (url, handle)
    }

    #[test]
    fn endpoints_keep_the_path_prefix() {
        let service = HttpTaskService::new("https://tasks.example.com/api/", None).unwrap();
        assert_eq!(
            service.endpoint("tasks/7/time-summary").unwrap().as_str(),
            "https://tasks.example.com/api/tasks/7/time-summary"
        );
    }

    #[test]
    fn blank_token_means_signed_out() {
        let service =
            HttpTaskService::new("http://localhost:8080", Some("  ".to_string())).unwrap();
        assert!(!service.is_authenticated());
    }

    #[tokio::test]
    async fn sign_in_stores_token_and_broadcasts() {
        let service = HttpTaskService::new("http://localhost:8080/api", None).unwrap();
        let mut events = service.subscribe_auth().unwrap();
        assert_eq!(service.base_url().as_str(), "http://localhost:8080/api/");

        service.sign_in("fresh");

        assert!(service.is_authenticated());
        assert_eq!(events.recv().await.unwrap(), AuthEvent::SignedIn);
    }

    #[tokio::test]
    async fn calls_without_token_are_unauthorized() {
        let service = HttpTaskService::new("http://localhost:1", None).unwrap();
        assert_eq!(service.get_tasks().await, Err(RemoteError::Unauthorized));
    }

    #[tokio::test]
    async fn fetches_tasks_with_bearer_token() {
        let (url, server) = serve_once(
            "200 OK",
            r#"[{"id":1,"title":"Remote","createdAt":"2024-01-01T00:00:00Z"}]"#,
        )
        .await;
        let service = HttpTaskService::new(&url, Some("secret".to_string())).unwrap();

        let tasks = service.get_tasks().await.unwrap();

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, TaskId::from("1"));
        let request = server.await.unwrap();
        assert!(request.starts_with("GET /api/tasks "));
        assert!(request.to_lowercase().contains("authorization: bearer secret"));
    }

    #[tokio::test]
    async fn rejected_credentials_sign_out() {
        let (url, server) = serve_once("401 Unauthorized", "").await;
        let service = HttpTaskService::new(&url, Some("expired".to_string())).unwrap();
        let mut events = service.subscribe_auth().unwrap();

        let err = service.delete_task(&"5".into()).await.unwrap_err();

        assert_eq!(err, RemoteError::Unauthorized);
        assert!(!service.is_authenticated());
        assert_eq!(events.recv().await.unwrap(), AuthEvent::SignedOut);
        assert!(server.await.unwrap().starts_with("DELETE /api/tasks/5 "));
    }

    #[tokio::test]
    async fn server_errors_carry_status() {
        let (url, _server) = serve_once("500 Internal Server Error", "boom").await;
        let service = HttpTaskService::new(&url, Some("t".to_string())).unwrap();

        let err = service.record_time_summary(&"5".into(), 1_000).await.unwrap_err();

        assert_eq!(
            err,
            RemoteError::Server {
                status: 500,
                message: "boom".to_string()
            }
        );
        assert!(service.is_authenticated());
    }
}
