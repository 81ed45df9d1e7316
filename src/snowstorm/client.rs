//! Snowstorm HTTP client
//!
//! Thin reqwest wrapper over the concept search, member search and bulk
//! member endpoints of one branch.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{COOKIE, LOCATION};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use super::types::*;
use super::{Result, TerminologyStore};
use crate::config::RefsetConfig;
use crate::error::StoreError;
use crate::reconcile::MutationRecord;

#[derive(Debug, Clone)]
pub struct SnowstormClient {
    http: Client,
    base_url: Url,
    branch: String,
    auth_cookie: Option<String>,
}

impl SnowstormClient {
    pub fn new(
        base_url: &str,
        branch: impl Into<String>,
        auth_cookie: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ecl-refset/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_http_client(
            Url::parse(base_url.trim_end_matches('/'))?,
            branch,
            auth_cookie,
            http,
        ))
    }

    pub fn from_config(config: &RefsetConfig) -> Result<Self> {
        Self::new(
            &config.snowstorm_url,
            config.branch.clone(),
            config.auth_cookie.clone(),
            config.request_timeout(),
        )
    }

    pub fn with_http_client(
        base_url: Url,
        branch: impl Into<String>,
        auth_cookie: Option<String>,
        http: Client,
    ) -> Self {
        Self {
            http,
            base_url,
            branch: branch.into(),
            auth_cookie,
        }
    }

    /// `{base}/{branch}/{path}`
    fn branch_url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            self.branch.trim_matches('/'),
            path
        )
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.auth_cookie {
            Some(cookie) => builder.header(COOKIE, cookie.as_str()),
            None => builder,
        }
    }

    async fn decode<T: DeserializeOwned>(url: &str, response: Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| StoreError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl TerminologyStore for SnowstormClient {
    async fn search(
        &self,
        ecl: &str,
        active_filter: Option<bool>,
        offset: u64,
        limit: u64,
    ) -> Result<Page<ConceptMini>> {
        let url = self.branch_url("concepts");
        let mut params: Vec<(&str, String)> = vec![
            ("ecl", ecl.to_string()),
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
            ("form", "inferred".to_string()),
            ("includeLeafFlag", "false".to_string()),
        ];
        if let Some(active) = active_filter {
            params.push(("activeFilter", active.to_string()));
        }

        debug!(%url, offset, limit, "searching concepts");
        let response = self
            .authorize(self.http.get(&url).query(&params))
            .send()
            .await?;
        Self::decode(&url, response).await
    }

    async fn find_members(&self, query: &MemberQuery) -> Result<Page<ReferenceSetMember>> {
        let url = self.branch_url("members");
        let mut params: Vec<(&str, String)> = vec![
            ("referenceSet", query.reference_set.clone()),
            ("offset", query.offset.to_string()),
            ("limit", query.limit.to_string()),
        ];
        if let Some(component) = &query.referenced_component_id {
            params.push(("referencedComponentId", component.clone()));
        }
        if let Some(active) = query.active {
            params.push(("active", active.to_string()));
        }

        let response = self
            .authorize(self.http.get(&url).query(&params))
            .send()
            .await?;
        Self::decode(&url, response).await
    }

    async fn concept_exists(&self, concept_id: &str) -> Result<bool> {
        let url = self.branch_url(&format!("concepts/{}", concept_id));
        let response = self.authorize(self.http.get(&url)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let _: ConceptMini = Self::decode(&url, response).await?;
        Ok(true)
    }

    async fn bulk_mutate_members(&self, records: &[MutationRecord]) -> Result<Option<String>> {
        let url = self.branch_url("members/bulk");
        let body: Vec<BulkMember> = records.iter().map(BulkMember::from).collect();

        let response = self
            .authorize(self.http.post(&url).json(&body))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                url,
                body,
            });
        }

        let location = match response.headers().get(LOCATION) {
            Some(value) => match value.to_str() {
                Ok(location) => location.to_string(),
                Err(_) => {
                    warn!(%url, "bulk response carried a non-text Location header");
                    return Ok(None);
                }
            },
            None => return Ok(None),
        };
        // Location may be relative to the server root
        Ok(Some(self.base_url.join(&location)?.to_string()))
    }

    async fn job_status(&self, location: &str) -> Result<BulkJobStatus> {
        let response = self.authorize(self.http.get(location)).send().await?;
        Self::decode(location, response).await
    }
}
