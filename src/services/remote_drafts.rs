use reqwest::Method;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::{
    error::{DraftServiceError, RemoteCause},
    models::draft::{Draft, DraftPatch, NewDraft},
    services::supabase::SupabaseClient,
};

const DRAFTS_TABLE: &str = "rest/v1/drafts";

/// Mirror of the local drafts in the hosted `drafts` table. Row ownership is
/// enforced by the backend through the bearer token.
#[derive(Clone)]
pub struct RemoteDraftService {
    client: SupabaseClient,
    access_token: Option<String>,
}

impl RemoteDraftService {
    pub fn new(client: SupabaseClient) -> Self {
        Self {
            client,
            access_token: None,
        }
    }

    pub fn with_token(&self, access_token: impl Into<String>) -> Self {
        Self {
            client: self.client.clone(),
            access_token: Some(access_token.into()),
        }
    }

    pub fn client(&self) -> &SupabaseClient {
        &self.client
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Newest updated first.
    pub async fn get_drafts(&self, user_id: &str) -> Result<Vec<Draft>, DraftServiceError> {
        let mut url = self.table().map_err(DraftServiceError::Fetch)?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("user_id", &format!("eq.{user_id}"))
            .append_pair("order", "updated_at.desc");
        let drafts = self
            .rows(Method::GET, url, None::<&()>)
            .await
            .map_err(DraftServiceError::Fetch)?;
        debug!(user_id, count = drafts.len(), "fetched remote drafts");
        Ok(drafts)
    }

    pub async fn get_draft(&self, id: &str) -> Result<Option<Draft>, DraftServiceError> {
        let url = self.by_id(id).map_err(DraftServiceError::Fetch)?;
        let rows = self
            .rows(Method::GET, url, None::<&()>)
            .await
            .map_err(DraftServiceError::Fetch)?;
        Ok(rows.into_iter().next())
    }

    pub async fn create_draft(&self, input: &NewDraft) -> Result<Draft, DraftServiceError> {
        let url = self.table().map_err(DraftServiceError::Write)?;
        let created = self
            .rows(Method::POST, url, Some(input))
            .await
            .and_then(single_row)
            .map_err(DraftServiceError::Write)?;
        debug!(id = %created.id, "created remote draft");
        Ok(created)
    }

    /// Only the fields set in `patch` change.
    pub async fn update_draft(&self, id: &str, patch: &DraftPatch) -> Result<Draft, DraftServiceError> {
        let url = self.by_id(id).map_err(DraftServiceError::Write)?;
        self.rows(Method::PATCH, url, Some(patch))
            .await
            .and_then(single_row)
            .map_err(DraftServiceError::Write)
    }

    pub async fn delete_draft(&self, id: &str) -> Result<(), DraftServiceError> {
        let url = self.by_id(id).map_err(DraftServiceError::Write)?;
        let removed = self
            .rows(Method::DELETE, url, None::<&()>)
            .await
            .map_err(DraftServiceError::Write)?;
        debug!(id, removed = removed.len(), "deleted remote draft");
        Ok(())
    }

    fn table(&self) -> Result<Url, RemoteCause> {
        Ok(self.client.endpoint(DRAFTS_TABLE)?)
    }

    fn by_id(&self, id: &str) -> Result<Url, RemoteCause> {
        let mut url = self.table()?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("id", &format!("eq.{id}"));
        Ok(url)
    }

    async fn rows<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<Vec<Draft>, RemoteCause> {
        let mut request = self
            .client
            .request(method.clone(), url, self.access_token.as_deref())
            .header("Prefer", "return=representation");
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(%method, %status, "drafts table rejected request");
            return Err(RemoteCause::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&text)?)
    }
}

fn single_row(rows: Vec<Draft>) -> Result<Draft, RemoteCause> {
    rows.into_iter().next().ok_or(RemoteCause::MissingRow)
}
