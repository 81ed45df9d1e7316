//! Shared fixtures for the HTTP integration tests
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use ecl_refset::config::{RefsetConfig, QUERY_SPECIFICATION_REFSET};
use ecl_refset::snowstorm::SnowstormClient;

pub const BRANCH: &str = "MAIN/SNOMEDCT-AU";
pub const MODULE: &str = "32506021000036107";
pub const COOKIE: &str = "dev-ims-ihtsdo=test-session";

pub fn branch_path(rest: &str) -> String {
    format!("/{}/{}", BRANCH, rest)
}

pub fn client(server: &MockServer) -> SnowstormClient {
    SnowstormClient::new(
        &server.uri(),
        BRANCH,
        Some(COOKIE.to_string()),
        Duration::from_secs(5),
    )
    .unwrap()
}

pub fn config(server: &MockServer, threshold_log: &std::path::Path) -> RefsetConfig {
    RefsetConfig {
        snowstorm_url: server.uri(),
        branch: BRANCH.to_string(),
        auth_cookie: Some(COOKIE.to_string()),
        poll_delay_ms: 10,
        max_poll_attempts: 50,
        page_size: 100,
        threshold_log: threshold_log.to_path_buf(),
        ..Default::default()
    }
}

pub fn concept(id: &str, term: &str) -> Value {
    json!({
        "conceptId": id,
        "active": true,
        "moduleId": MODULE,
        "pt": {"term": term, "lang": "en"}
    })
}

pub fn page(items: Vec<Value>) -> Value {
    let total = items.len();
    json!({"items": items, "total": total, "offset": 0, "limit": 100})
}

pub fn definition_member(set_id: &str, term: &str, ecl: &str) -> Value {
    json!({
        "memberId": format!("definition-{}", set_id),
        "active": true,
        "moduleId": MODULE,
        "refsetId": QUERY_SPECIFICATION_REFSET,
        "referencedComponentId": set_id,
        "referencedComponent": {"conceptId": set_id, "pt": {"term": term}},
        "additionalFields": {"query": ecl}
    })
}

pub async fn mount_definitions(server: &MockServer, members: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path(branch_path("members")))
        .and(query_param("referenceSet", QUERY_SPECIFICATION_REFSET))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(members)))
        .mount(server)
        .await;
}

/// Every member lookup for `set_id` comes back empty
pub async fn mount_empty_set(server: &MockServer, set_id: &str) {
    Mock::given(method("GET"))
        .and(path(branch_path("members")))
        .and(query_param("referenceSet", set_id))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(vec![])))
        .mount(server)
        .await;
}

/// Answers concept searches by the shape of the generated ECL: the stale
/// and remove searches start from the set's members, everything else is
/// the add side.
pub struct DiffResponder {
    pub to_add: Vec<Value>,
}

impl Respond for DiffResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let ecl = request
            .url
            .query_pairs()
            .find(|(k, _)| k == "ecl")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();
        if ecl.starts_with('^') || ecl.starts_with("(^") {
            ResponseTemplate::new(200).set_body_json(page(vec![]))
        } else {
            ResponseTemplate::new(200).set_body_json(page(self.to_add.clone()))
        }
    }
}

/// Records member ids posted to the bulk endpoint and reports them back
/// when the job is polled
#[derive(Clone, Default)]
pub struct BulkJobs {
    pub submitted: Arc<Mutex<Vec<Vec<Value>>>>,
}

impl BulkJobs {
    pub fn submitted(&self) -> Vec<Vec<Value>> {
        self.submitted.lock().unwrap().clone()
    }

    pub async fn mount(&self, server: &MockServer) {
        Mock::given(method("POST"))
            .and(path(branch_path("members/bulk")))
            .respond_with(BulkSubmit(self.clone()))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/MAIN/SNOMEDCT-AU/members/bulk/job-\d+$"))
            .respond_with(BulkStatus(self.clone()))
            .mount(server)
            .await;
    }
}

struct BulkSubmit(BulkJobs);

impl Respond for BulkSubmit {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Vec<Value> = serde_json::from_slice(&request.body).unwrap_or_default();
        let mut submitted = self.0.submitted.lock().unwrap();
        submitted.push(body);
        ResponseTemplate::new(201).insert_header(
            "Location",
            format!("/{}/members/bulk/job-{}", BRANCH, submitted.len()).as_str(),
        )
    }
}

struct BulkStatus(BulkJobs);

impl Respond for BulkStatus {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let job: usize = request
            .url
            .path()
            .rsplit("job-")
            .next()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        let submitted = self.0.submitted.lock().unwrap();
        let member_ids: Vec<Value> = submitted
            .get(job.saturating_sub(1))
            .map(|batch| batch.iter().map(|m| m["memberId"].clone()).collect())
            .unwrap_or_default();
        ResponseTemplate::new(200).set_body_json(json!({
            "status": "COMPLETED",
            "memberIds": member_ids,
            "secondsDuration": 0.4
        }))
    }
}
