//! HTTP session repository.
//!
//! `PATCH {base_url}/sessions/{id}` with the camelCase update as JSON body.

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use super::repository::SessionRepository;
use super::types::SyncError;
use crate::session::SessionUpdate;

pub struct HttpSessionRepository {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpSessionRepository {
    /// # Errors
    /// Returns an error if `base_url` does not parse or the client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SyncError> {
        let mut base_url = Url::parse(base_url)?;
        // Url::join drops the last path segment unless it ends with a slash.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    fn session_url(&self, session_id: &str) -> Result<Url, SyncError> {
        let mut url = self.base_url.join("sessions/")?;
        url.path_segments_mut()
            .map_err(|_| {
                SyncError::Unavailable(format!("base url cannot hold a path: {}", self.base_url))
            })?
            .pop_if_empty()
            .push(session_id);
        Ok(url)
    }
}

#[async_trait]
impl SessionRepository for HttpSessionRepository {
    async fn update(&self, session_id: &str, update: &SessionUpdate) -> Result<(), SyncError> {
        let url = self.session_url(session_id)?;
        let response = self.client.patch(url).json(update).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SyncError::SessionNotFound(session_id.to_string()));
        }
        let message = response.text().await.unwrap_or_default();
        Err(SyncError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[test]
    fn session_url_escapes_ids_and_keeps_base_path() {
        let repo =
            HttpSessionRepository::new("https://clinic.example/api/v1", Duration::from_secs(1))
                .unwrap();
        assert_eq!(
            repo.session_url("appt 7").unwrap().as_str(),
            "https://clinic.example/api/v1/sessions/appt%207"
        );
    }

    #[test]
    fn rejects_unparseable_base_url() {
        assert!(matches!(
            HttpSessionRepository::new("not a url", Duration::from_secs(1)),
            Err(SyncError::InvalidEndpoint(_))
        ));
    }

    #[tokio::test]
    async fn patches_progress_as_camel_case_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PATCH", "/sessions/appt-1")
            .match_body(Matcher::Json(serde_json::json!({ "elapsedSeconds": 30 })))
            .with_status(204)
            .create_async()
            .await;

        let repo = HttpSessionRepository::new(&server.url(), Duration::from_secs(5)).unwrap();
        repo.update("appt-1", &SessionUpdate::progress(30)).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn maps_error_statuses() {
        let mut server = mockito::Server::new_async().await;
        let _missing = server
            .mock("PATCH", "/sessions/gone")
            .with_status(404)
            .create_async()
            .await;
        let _broken = server
            .mock("PATCH", "/sessions/appt-1")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let repo = HttpSessionRepository::new(&server.url(), Duration::from_secs(5)).unwrap();
        let err = repo.update("gone", &SessionUpdate::progress(1)).await.unwrap_err();
        assert!(matches!(err, SyncError::SessionNotFound(_)));

        let err = repo.update("appt-1", &SessionUpdate::progress(1)).await.unwrap_err();
        match err {
            SyncError::Api { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message, "maintenance");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
