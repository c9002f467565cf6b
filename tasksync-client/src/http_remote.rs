//! [`RemoteSync`] over the task server's REST endpoints, with the change feed
//! on a websocket.

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use reqwest::{Response, StatusCode, Url};
use tasksync_core::{ChangeEvent, ErrorBody, SyncError, SyncResult, Task, TaskId};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::config::ClientConfig;
use crate::errors::{ClientError, ClientResult};
use crate::remote::{ChangeFeed, RemoteSync};

#[derive(Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    tasks_url: Url,
    feed_url: String,
}

impl HttpRemote {
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        let base_url = config.server_url.trim_end_matches('/').to_string();
        let feed_url = feed_url_for(&base_url)?;
        let tasks_url = tasks_url_for(&base_url)?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url,
            tasks_url,
            feed_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn tasks_url(&self) -> Url {
        self.tasks_url.clone()
    }

    /// The id is percent-encoded as a single path segment.
    fn task_url(&self, id: &TaskId) -> Url {
        let mut url = self.tasks_url.clone();
        // Always a base URL; checked in `tasks_url_for`.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(id.as_str());
        }
        url
    }
}

fn tasks_url_for(base_url: &str) -> ClientResult<Url> {
    let invalid = || ClientError::InvalidUrl(base_url.to_string());
    let mut url = Url::parse(base_url).map_err(|_| invalid())?;
    url.path_segments_mut()
        .map_err(|()| invalid())?
        .pop_if_empty()
        .push("tasks");
    Ok(url)
}

fn feed_url_for(base_url: &str) -> ClientResult<String> {
    let ws_base = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(ClientError::InvalidUrl(base_url.to_string()));
    };
    Ok(format!("{ws_base}/tasks/changes"))
}

/// Passes 2xx responses through and turns everything else into the error the
/// server described, falling back on the status code.
async fn check(response: Response) -> SyncResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.map_err(ClientError::from)?;
    if let Ok(body) = serde_json::from_str::<ErrorBody>(&text) {
        return Err(body.into());
    }

    let message = format!("{status}: {text}");
    Err(if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        SyncError::Transport(message)
    } else {
        SyncError::Validation(message)
    })
}

#[async_trait]
impl RemoteSync for HttpRemote {
    async fn fetch_all(&self) -> SyncResult<Vec<Task>> {
        tracing::debug!(url = %self.tasks_url(), "fetching tasks");
        let response = self
            .client
            .get(self.tasks_url())
            .send()
            .await
            .map_err(ClientError::from)?;
        let tasks = check(response)
            .await?
            .json::<Vec<Task>>()
            .await
            .map_err(ClientError::from)?;
        Ok(tasks)
    }

    async fn create(&self, task: &Task) -> SyncResult<Task> {
        task.validate_new()?;
        let response = self
            .client
            .post(self.tasks_url())
            .json(task)
            .send()
            .await
            .map_err(ClientError::from)?;
        let created = check(response)
            .await?
            .json::<Task>()
            .await
            .map_err(ClientError::from)?;
        tracing::debug!(task_id = ?created.id(), "task created");
        Ok(created)
    }

    async fn update(&self, task: &Task) -> SyncResult<Task> {
        let id = task.validate_update()?;
        let response = self
            .client
            .put(self.task_url(id))
            .json(task)
            .send()
            .await
            .map_err(ClientError::from)?;
        let updated = check(response)
            .await?
            .json::<Task>()
            .await
            .map_err(ClientError::from)?;
        Ok(updated)
    }

    async fn delete(&self, id: &TaskId) -> SyncResult<()> {
        let response = self
            .client
            .delete(self.task_url(id))
            .send()
            .await
            .map_err(ClientError::from)?;
        check(response).await?;
        Ok(())
    }

    async fn delete_all(&self) -> SyncResult<()> {
        let response = self
            .client
            .delete(self.tasks_url())
            .send()
            .await
            .map_err(ClientError::from)?;
        check(response).await?;
        Ok(())
    }

    async fn open_change_feed(&self) -> SyncResult<ChangeFeed> {
        let (ws_stream, _) = connect_async(self.feed_url.as_str())
            .await
            .map_err(ClientError::from)?;
        tracing::info!(url = %self.feed_url, "change feed connected");

        let feed = stream::unfold(ws_stream, |mut ws_stream| async move {
            loop {
                match ws_stream.next().await? {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ChangeEvent>(&text) {
                        Ok(event) => return Some((event, ws_stream)),
                        Err(err) => {
                            tracing::warn!(%err, "ignoring malformed change frame");
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        tracing::info!(?frame, "change feed closed by server");
                        return None;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(%err, "change feed connection error");
                        return None;
                    }
                }
            }
        });
        Ok(feed.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_url_follows_scheme() {
        assert_eq!(
            feed_url_for("http://localhost:8080").unwrap(),
            "ws://localhost:8080/tasks/changes"
        );
        assert_eq!(
            feed_url_for("https://tasks.example.com").unwrap(),
            "wss://tasks.example.com/tasks/changes"
        );
        assert!(matches!(
            feed_url_for("ftp://tasks.example.com"),
            Err(ClientError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let config = ClientConfig::default().with_server_url("http://localhost:8080/");
        let remote = HttpRemote::new(&config).unwrap();
        assert_eq!(remote.base_url(), "http://localhost:8080");
        assert_eq!(
            remote.task_url(&TaskId::from("t1")).as_str(),
            "http://localhost:8080/tasks/t1"
        );
    }

    #[test]
    fn test_task_id_is_one_escaped_segment() {
        let config = ClientConfig::default().with_server_url("http://localhost:8080/api");
        let remote = HttpRemote::new(&config).unwrap();
        assert_eq!(remote.tasks_url().as_str(), "http://localhost:8080/api/tasks");
        assert_eq!(
            remote.task_url(&TaskId::from("a/b?c#d")).as_str(),
            "http://localhost:8080/api/tasks/a%2Fb%3Fc%23d"
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let config = ClientConfig::default().with_server_url("http://127.0.0.1:9");
        let remote = HttpRemote::new(&config).unwrap();

        let err = remote.fetch_all().await.unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {err:?}");
    }

    #[tokio::test]
    async fn test_invalid_update_makes_no_request() {
        let config = ClientConfig::default().with_server_url("http://127.0.0.1:9");
        let remote = HttpRemote::new(&config).unwrap();

        let err = remote
            .update(&Task::new("no id", tasksync_core::Priority::Low, ""))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }
}
