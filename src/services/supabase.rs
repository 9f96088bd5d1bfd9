use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::{config::SupabaseConfig, error::AppError};

/// Thin client for the hosted backend: REST tables, auth and the realtime
/// socket all hang off the same project URL and anon key.
#[derive(Clone)]
pub struct SupabaseClient {
    http: Client,
    base: Url,
    anon_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub user: AuthUser,
}

#[derive(Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

impl SupabaseClient {
    pub fn new(config: &SupabaseConfig) -> Self {
        let mut base = config.url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self {
            http: Client::new(),
            base,
            anon_key: config.anon_key.clone(),
        }
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base.join(path)
    }

    /// Requests carry the anon key and either the user's token or, when
    /// anonymous, the anon key as bearer.
    pub fn request(&self, method: Method, url: Url, access_token: Option<&str>) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token.unwrap_or(&self.anon_key))
    }

    pub fn realtime_url(&self) -> Result<Url, url::ParseError> {
        let http = self.endpoint("realtime/v1/websocket")?;
        let mut url = Url::parse(&http.as_str().replacen("http", "ws", 1))?;
        url.query_pairs_mut()
            .append_pair("apikey", &self.anon_key)
            .append_pair("vsn", "1.0.0");
        Ok(url)
    }

    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthSession, AppError> {
        let mut url = self
            .endpoint("auth/v1/token")
            .map_err(|err| AppError::Config(err.to_string()))?;
        url.query_pairs_mut().append_pair("grant_type", "password");
        let response = self
            .request(Method::POST, url, None)
            .json(&PasswordGrant { email, password })
            .send()
            .await
            .map_err(|err| AppError::Other(err.into()))?;
        match response.status() {
            status if status.is_success() => response
                .json::<AuthSession>()
                .await
                .map_err(|err| AppError::Other(err.into())),
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => Err(AppError::Unauthorized),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(AppError::Other(anyhow::anyhow!("sign-in failed ({status}): {body}")))
            }
        }
    }

    /// `None` when the token is expired or unknown.
    pub async fn get_user(&self, access_token: &str) -> Result<Option<AuthUser>, AppError> {
        let url = self
            .endpoint("auth/v1/user")
            .map_err(|err| AppError::Config(err.to_string()))?;
        let response = self
            .request(Method::GET, url, Some(access_token))
            .send()
            .await
            .map_err(|err| AppError::Other(err.into()))?;
        match response.status() {
            status if status.is_success() => Ok(Some(
                response
                    .json::<AuthUser>()
                    .await
                    .map_err(|err| AppError::Other(err.into()))?,
            )),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(None),
            status => {
                warn!(%status, "unexpected response from auth user endpoint");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(url: &str) -> SupabaseClient {
        SupabaseClient::new(&SupabaseConfig {
            url: Url::parse(url).unwrap(),
            anon_key: "anon".into(),
        })
    }

    #[test]
    fn builds_endpoints_under_project_url() {
        let client = client("https://demo.supabase.co");
        assert_eq!(
            client.endpoint("rest/v1/drafts").unwrap().as_str(),
            "https://demo.supabase.co/rest/v1/drafts"
        );
        assert_eq!(
            client.realtime_url().unwrap().as_str(),
            "wss://demo.supabase.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );
    }

    #[test]
    fn keeps_path_prefix() {
        let client = client("http://127.0.0.1:54321/project");
        assert_eq!(
            client.endpoint("rest/v1/drafts").unwrap().as_str(),
            "http://127.0.0.1:54321/project/rest/v1/drafts"
        );
        assert!(client.realtime_url().unwrap().as_str().starts_with("ws://127.0.0.1:54321/project/"));
    }
}
