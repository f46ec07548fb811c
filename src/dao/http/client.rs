use std::sync::Arc;

use futures::{FutureExt, future::BoxFuture};
use reqwest::{Client, Method, RequestBuilder};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::{
    dao::{
        LiveGameBackend,
        error::{BackendError, BackendResult},
    },
    dto::{
        answer::{AnswerOutcome, SubmitAnswerRequest},
        leaderboard::LeaderboardRow,
        session::{GameSession, ServerTime},
    },
    state::session_machine::SessionStatus,
};

use super::config::BackendConfig;

/// [`LiveGameBackend`] calling the service's RPC endpoints over HTTP.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Arc<str>,
    api_key: Option<Arc<str>>,
}

impl HttpBackend {
    /// Build the HTTP client for the configured service.
    pub fn connect(config: BackendConfig) -> BackendResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| BackendError::ClientBuilder {
                source: Box::new(source),
            })?;

        Ok(Self {
            client,
            base_url: Arc::<str>::from(config.base_url.trim_end_matches('/')),
            api_key: config.api_key.map(Arc::<str>::from),
        })
    }

    /// Base URL without trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        let builder = self.client.request(method, url);
        if let Some(ref key) = self.api_key {
            builder
                .header("apikey", key.as_ref())
                .bearer_auth(key.as_ref())
        } else {
            builder
        }
    }

    async fn call<B, T>(&self, function: &str, body: &B) -> BackendResult<T>
    where
        B: ?Sized + Serialize,
        T: DeserializeOwned,
    {
        let path = format!("rpc/{function}");
        debug!(%path, "calling live game service");

        let response = self
            .request(Method::POST, &path)
            .json(body)
            .send()
            .await
            .map_err(|source| BackendError::transport(path.clone(), source))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|source| BackendError::decode(path, source));
        }

        if status.is_client_error() {
            let message = response.text().await.unwrap_or_default();
            return Err(BackendError::Rejected {
                path,
                status: status.as_u16(),
                message,
            });
        }

        Err(BackendError::Status {
            path,
            status: status.as_u16(),
        })
    }
}

impl LiveGameBackend for HttpBackend {
    fn server_time(&self) -> BoxFuture<'static, BackendResult<i64>> {
        let this = self.clone();
        async move {
            let time: ServerTime = this.call("get_server_time", &json!({})).await?;
            Ok(time.server_time_ms)
        }
        .boxed()
    }

    fn get_live_game_state(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, BackendResult<Option<GameSession>>> {
        let this = self.clone();
        async move {
            this.call("get_live_game_state", &json!({ "game_id": game_id }))
                .await
        }
        .boxed()
    }

    fn start_game(&self, game_id: Uuid) -> BoxFuture<'static, BackendResult<bool>> {
        let this = self.clone();
        async move { this.call("start_game", &json!({ "game_id": game_id })).await }.boxed()
    }

    fn advance_game_state(
        &self,
        game_id: Uuid,
        force_state: Option<SessionStatus>,
    ) -> BoxFuture<'static, BackendResult<bool>> {
        let this = self.clone();
        async move {
            this.call(
                "advance_game_state",
                &json!({ "game_id": game_id, "force_state": force_state }),
            )
            .await
        }
        .boxed()
    }

    fn run_state_manager_sweep(&self) -> BoxFuture<'static, BackendResult<bool>> {
        let this = self.clone();
        async move { this.call("run_state_manager", &json!({})).await }.boxed()
    }

    fn check_scheduled_games(&self) -> BoxFuture<'static, BackendResult<bool>> {
        let this = self.clone();
        async move { this.call("check_scheduled_games", &json!({})).await }.boxed()
    }

    fn submit_answer(
        &self,
        request: SubmitAnswerRequest,
    ) -> BoxFuture<'static, BackendResult<AnswerOutcome>> {
        let this = self.clone();
        async move { this.call("submit_answer", &request).await }.boxed()
    }

    fn get_leaderboard(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, BackendResult<Vec<LeaderboardRow>>> {
        let this = self.clone();
        async move {
            this.call("get_leaderboard", &json!({ "game_id": game_id }))
                .await
        }
        .boxed()
    }
}
