use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::resource::{move_path, Resource};
use super::types::{decode_body, extract_message};
use crate::cache::{ListQuery, Nested, Patch};
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::model::{EntityKind, Page};

/// REST client for the campus API
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base: Url,
  token: Option<String>,
}

impl ApiClient {
  pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
    // Url::join drops the last segment unless the base ends with a slash.
    let base = if base_url.ends_with('/') {
      Url::parse(base_url)?
    } else {
      Url::parse(&format!("{}/", base_url))?
    };

    let http = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("campus-sync/", env!("CARGO_PKG_VERSION")))
      .build()?;

    Ok(Self { http, base, token })
  }

  pub fn from_config(config: &Config) -> Result<Self> {
    Self::new(&config.api.url, Config::api_token(), config.timeout())
  }

  pub fn base_url(&self) -> &Url {
    &self.base
  }

  pub fn url(&self, path: &str) -> Result<Url> {
    Ok(self.base.join(path.trim_start_matches('/'))?)
  }

  fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
    let url = self.url(path)?;
    debug!(%method, %url, "api request");

    let builder = self.http.request(method, url);
    Ok(match &self.token {
      Some(token) => builder.bearer_auth(token),
      None => builder,
    })
  }

  async fn send(&self, request: RequestBuilder) -> Result<String> {
    let response = request.send().await?;
    Self::read_body(response).await
  }

  async fn read_body(response: Response) -> Result<String> {
    let status = response.status();
    let body = response.text().await?;

    if status.is_success() {
      return Ok(body);
    }

    let reason = status.canonical_reason().unwrap_or("Request failed");
    Err(SyncError::Api {
      status: status.as_u16(),
      message: extract_message(&body, reason),
    })
  }

  async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
    let body = self.send(request).await?;
    decode_body(&body)
  }

  // ==========================================================================
  // Reads
  // ==========================================================================

  /// Get one page of a collection
  pub async fn list<T: Resource>(&self, query: &ListQuery) -> Result<Page<T>> {
    let request = self
      .request(Method::GET, &T::collection_path())?
      .query(&query.to_pairs());
    self.send_json(request).await
  }

  /// Get a single entity by id
  pub async fn get<T: Resource>(&self, id: &str) -> Result<T> {
    let request = self.request(Method::GET, &T::item_path(id))?;
    self.send_json(request).await
  }

  /// Get the aggregate stats of a collection
  pub async fn stats(&self, kind: EntityKind, params: &[(String, String)]) -> Result<Value> {
    let request = self
      .request(Method::GET, &format!("{}/stats", kind.collection()))?
      .query(params);
    self.send_json(request).await
  }

  // ==========================================================================
  // Mutations
  // ==========================================================================

  pub async fn create<T: Resource>(&self, parent: Option<&str>, body: &impl Serialize) -> Result<T> {
    let request = self
      .request(Method::POST, &T::create_path(parent))?
      .json(body);
    self.send_json(request).await
  }

  pub async fn update<T: Resource>(&self, id: &str, patch: &Patch) -> Result<T> {
    let request = self.request(Method::PATCH, &T::item_path(id))?.json(patch);
    self.send_json(request).await
  }

  /// Move a child to the container `to`; returns the moved entity.
  pub async fn move_to<T: Resource + Nested>(&self, id: &str, to: &str) -> Result<T> {
    let body = Patch::new().set(T::CONTAINER_FIELD, to);
    let request = self.request(Method::PATCH, &move_path::<T>(id))?.json(&body);
    self.send_json(request).await
  }

  pub async fn delete<T: Resource>(&self, id: &str) -> Result<()> {
    let request = self.request(Method::DELETE, &T::item_path(id))?;
    // Body, if any, is ignored
    self.send(request).await?;
    Ok(())
  }
}
