//! Ticketing REST client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::COOKIE;
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use url::Url;

use super::{ExternalProcess, ReportSink};
use crate::error::TicketingError;
use crate::reconcile::RunReport;

const EXTERNAL_PROCESSES_PATH: &str = "api/tickets/external-processes";
const JOB_RESULTS_PATH: &str = "api/tickets/jobResults";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobResultBody<'a> {
    #[serde(flatten)]
    report: &'a RunReport,
    acknowledged: bool,
}

#[derive(Debug, Clone)]
pub struct TicketingClient {
    http: Client,
    base_url: Url,
    auth_cookie: Option<String>,
}

impl TicketingClient {
    pub fn new(
        base_url: &str,
        auth_cookie: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TicketingError> {
        let http = Client::builder().timeout(timeout).build()?;
        // Trailing slash so relative joins keep the base path
        let base_url = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))?;
        Ok(Self {
            http,
            base_url,
            auth_cookie,
        })
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.auth_cookie {
            Some(cookie) => builder.header(COOKIE, cookie.as_str()),
            None => builder,
        }
    }
}

#[async_trait]
impl ReportSink for TicketingClient {
    async fn external_processes(&self) -> Result<Vec<ExternalProcess>, TicketingError> {
        let url = self.base_url.join(EXTERNAL_PROCESSES_PATH)?;
        let response = self.authorize(self.http.get(url.clone())).send().await?;
        if !response.status().is_success() {
            return Err(TicketingError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.json().await?)
    }

    async fn post_job_result(&self, report: &RunReport) -> Result<(), TicketingError> {
        let url = self.base_url.join(JOB_RESULTS_PATH)?;
        let body = JobResultBody {
            report,
            acknowledged: false,
        };
        let response = self
            .authorize(self.http.post(url.clone()).json(&body))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TicketingError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(())
    }
}
