//! Jira ticket export (REST API v2).
//!
//! One Story summarises the whole review; one Sub-task per nature present
//! lists its defects, and every defect's crop is attached to its Sub-task.
//! UI defects come first. Records without a nature count toward the Story
//! total but are not listed in any Sub-task.
//!
//! Ticket text is planned by the pure [`plan_tickets`] so it can be checked
//! without a Jira instance; [`JiraClient`] only sends what the plan says.

use crate::error::ExportError;
use crate::output::{AnnotationRecord, AnnotationSet, Nature};
use crate::pipeline::encode::decode_base64;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, info};

const SERVICE: &str = "Jira";

/// Connection settings, read from `JIRA_URL`, `JIRA_USERNAME`,
/// `JIRA_API_TOKEN` and `JIRA_PROJECT_KEY`.
#[derive(Clone)]
pub struct JiraConfig {
    pub base_url: String,
    pub username: String,
    pub api_token: String,
    pub project_key: String,
}

impl std::fmt::Debug for JiraConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JiraConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("api_token", &"<redacted>")
            .field("project_key", &self.project_key)
            .finish()
    }
}

impl JiraConfig {
    pub fn from_env() -> Result<Self, ExportError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as missing.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ExportError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let base_url = get("JIRA_URL");
        let username = get("JIRA_USERNAME");
        let api_token = get("JIRA_API_TOKEN");
        let project_key = get("JIRA_PROJECT_KEY");

        let missing: Vec<&str> = [
            ("JIRA_URL", base_url.is_none()),
            ("JIRA_USERNAME", username.is_none()),
            ("JIRA_API_TOKEN", api_token.is_none()),
            ("JIRA_PROJECT_KEY", project_key.is_none()),
        ]
        .iter()
        .filter(|(_, absent)| *absent)
        .map(|(name, _)| *name)
        .collect();

        match (base_url, username, api_token, project_key) {
            (Some(base_url), Some(username), Some(api_token), Some(project_key)) => Ok(Self {
                base_url: base_url.trim_end_matches('/').to_string(),
                username,
                api_token,
                project_key,
            }),
            _ => Err(ExportError::MissingCredentials {
                service: SERVICE.to_string(),
                missing: missing.join(", "),
            }),
        }
    }
}

// ── Planning ─────────────────────────────────────────────────────────────

/// Summary and description of one issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueDraft {
    pub summary: String,
    pub description: String,
}

/// A crop to upload to a Sub-task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub record_id: u32,
    /// `defect_{id}_page_{page}.png`
    pub file_name: String,
    pub image_base64: String,
}

/// One Sub-task and the crops that go with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtaskPlan {
    pub nature: Nature,
    pub draft: IssueDraft,
    pub attachments: Vec<Attachment>,
}

/// Everything [`export_to_jira`] will create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketPlan {
    pub story: IssueDraft,
    pub subtasks: Vec<SubtaskPlan>,
}

/// Plan the Story and Sub-tasks for `records`, dated `date`.
pub fn plan_tickets(records: &[AnnotationRecord], date: NaiveDate) -> TicketPlan {
    let story = IssueDraft {
        summary: format!("UAT Feedback Analysis - {}", date.format("%Y-%m-%d")),
        description: format!(
            "Analysis of UAT feedback containing {} defects across UI and Content categories",
            records.len()
        ),
    };

    let subtasks = [Nature::Ui, Nature::Content]
        .into_iter()
        .filter_map(|nature| {
            let defects: Vec<&AnnotationRecord> =
                records.iter().filter(|r| r.nature == Some(nature)).collect();
            if defects.is_empty() {
                return None;
            }
            Some(SubtaskPlan {
                nature,
                draft: IssueDraft {
                    summary: format!("{} Defects - {} issues identified", nature, defects.len()),
                    description: subtask_description(nature, &defects),
                },
                attachments: defects
                    .iter()
                    .filter(|r| !r.image.is_empty())
                    .map(|r| Attachment {
                        record_id: r.id,
                        file_name: attachment_name(r),
                        image_base64: r.image.clone(),
                    })
                    .collect(),
            })
        })
        .collect();

    TicketPlan { story, subtasks }
}

fn subtask_description(nature: Nature, defects: &[&AnnotationRecord]) -> String {
    let mut out = format!("{} Defects Summary:\n\n", nature);
    for d in defects {
        out.push_str(&format!("Defect ID: {}\n", d.id));
        out.push_str(&format!("Page: {}\n", d.page));
        out.push_str(&format!("Content: {}\n", d.contents.join(", ")));
        out.push_str(&format!("Reporter: {}\n", d.authors.join(", ")));
        out.push_str(&format!(
            "Type: {}\n\n--",
            d.defect_type.map(|t| t.as_str()).unwrap_or("Unclassified")
        ));
    }
    out
}

pub fn attachment_name(record: &AnnotationRecord) -> String {
    format!("defect_{}_page_{}.png", record.id, record.page)
}

// ── HTTP client ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CreatedIssue {
    key: String,
}

/// Keys of the issues created by one export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JiraExport {
    pub story_key: String,
    pub subtask_keys: Vec<String>,
    pub attachments: usize,
}

/// Minimal Jira REST v2 client (HTTP Basic auth).
pub struct JiraClient {
    client: reqwest::Client,
    config: JiraConfig,
}

impl JiraClient {
    pub fn new(config: JiraConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Create an issue and return its key. Expects HTTP 201.
    pub async fn create_issue(
        &self,
        draft: &IssueDraft,
        issue_type: &str,
        parent: Option<&str>,
    ) -> Result<String, ExportError> {
        let mut fields = serde_json::json!({
            "project": { "key": self.config.project_key },
            "summary": draft.summary,
            "description": draft.description,
            "issuetype": { "name": issue_type },
        });
        if let Some(parent) = parent {
            fields["parent"] = serde_json::json!({ "key": parent });
        }

        let response = self
            .client
            .post(format!("{}/rest/api/2/issue", self.config.base_url))
            .basic_auth(&self.config.username, Some(&self.config.api_token))
            .header("Accept", "application/json")
            .json(&serde_json::json!({ "fields": fields }))
            .send()
            .await
            .map_err(http_err)?;

        let response = expect_status(response, 201).await?;
        let created: CreatedIssue = response.json().await.map_err(http_err)?;
        info!("Created Jira {} {}", issue_type, created.key);
        Ok(created.key)
    }

    /// Upload one crop to `issue_key`. Expects HTTP 200.
    pub async fn attach_image(&self, issue_key: &str, attachment: &Attachment) -> Result<(), ExportError> {
        let bytes = decode_base64(&attachment.image_base64).map_err(|e| ExportError::Image {
            record_id: attachment.record_id,
            detail: e.to_string(),
        })?;
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(attachment.file_name.clone())
            .mime_str("image/png")
            .map_err(http_err)?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(format!(
                "{}/rest/api/2/issue/{}/attachments",
                self.config.base_url, issue_key
            ))
            .basic_auth(&self.config.username, Some(&self.config.api_token))
            .header("Accept", "application/json")
            .header("X-Atlassian-Token", "no-check")
            .multipart(form)
            .send()
            .await
            .map_err(http_err)?;

        expect_status(response, 200).await?;
        debug!("Attached {} to {}", attachment.file_name, issue_key);
        Ok(())
    }
}

fn http_err(source: reqwest::Error) -> ExportError {
    ExportError::Http {
        service: SERVICE.to_string(),
        source,
    }
}

async fn expect_status(response: reqwest::Response, expected: u16) -> Result<reqwest::Response, ExportError> {
    let status = response.status().as_u16();
    if status == expected {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ExportError::UnexpectedStatus {
        service: SERVICE.to_string(),
        status,
        body,
    })
}

/// Create the Story, its Sub-tasks and attachments for `set`, dated today.
pub async fn export_to_jira(set: &AnnotationSet, config: JiraConfig) -> Result<JiraExport, ExportError> {
    let plan = plan_tickets(&set.records, chrono::Local::now().date_naive());
    let client = JiraClient::new(config);

    let story_key = client.create_issue(&plan.story, "Story", None).await?;
    let mut export = JiraExport {
        story_key,
        subtask_keys: Vec::new(),
        attachments: 0,
    };

    for subtask in &plan.subtasks {
        let key = client
            .create_issue(&subtask.draft, "Sub-task", Some(&export.story_key))
            .await?;
        for attachment in &subtask.attachments {
            client.attach_image(&key, attachment).await?;
            export.attachments += 1;
        }
        export.subtask_keys.push(key);
    }

    Ok(export)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{DefectType, Rect};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn record(id: u32, page: usize, nature: Option<Nature>) -> AnnotationRecord {
        AnnotationRecord {
            id,
            page,
            contents: vec![format!("issue {id}"), "agreed".into()],
            authors: vec!["Bob".into(), "Carol".into()],
            coordinates: Rect::new(0.0, 0.0, 1.0, 1.0),
            image: "aGk=".into(),
            nature,
            defect_type: nature.map(|_| DefectType::Bug),
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
    }

    #[test]
    fn story_counts_every_record() {
        let records = vec![
            record(1, 1, Some(Nature::Content)),
            record(2, 2, Some(Nature::Ui)),
            record(3, 2, None),
        ];
        let plan = plan_tickets(&records, date());
        assert_eq!(plan.story.summary, "UAT Feedback Analysis - 2024-03-09");
        assert_eq!(
            plan.story.description,
            "Analysis of UAT feedback containing 3 defects across UI and Content categories"
        );
    }

    #[test]
    fn subtasks_ui_first_and_skip_unlabelled() {
        let records = vec![
            record(1, 1, Some(Nature::Content)),
            record(2, 2, Some(Nature::Ui)),
            record(3, 2, None),
            record(4, 3, Some(Nature::Content)),
        ];
        let plan = plan_tickets(&records, date());
        assert_eq!(plan.subtasks.len(), 2);
        assert_eq!(plan.subtasks[0].nature, Nature::Ui);
        assert_eq!(plan.subtasks[0].draft.summary, "UI Defects - 1 issues identified");
        assert_eq!(plan.subtasks[1].draft.summary, "Content Defects - 2 issues identified");
        let names: Vec<&str> = plan.subtasks[1].attachments.iter().map(|a| a.file_name.as_str()).collect();
        assert_eq!(names, vec!["defect_1_page_1.png", "defect_4_page_3.png"]);
    }

    #[test]
    fn subtask_description_layout() {
        let plan = plan_tickets(&[record(2, 5, Some(Nature::Ui))], date());
        assert_eq!(
            plan.subtasks[0].draft.description,
            "UI Defects Summary:\n\nDefect ID: 2\nPage: 5\nContent: issue 2, agreed\nReporter: Bob, Carol\nType: Bug\n\n--"
        );
    }

    #[test]
    fn no_subtasks_without_labels() {
        let plan = plan_tickets(&[record(1, 1, None)], date());
        assert!(plan.subtasks.is_empty());
    }

    #[test]
    fn config_reports_every_missing_variable() {
        let env: HashMap<&str, &str> = [("JIRA_URL", "https://jira.test/"), ("JIRA_USERNAME", "")].into();
        let err = JiraConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Jira credentials are not set: missing JIRA_USERNAME, JIRA_API_TOKEN, JIRA_PROJECT_KEY"
        );
    }

    #[test]
    fn config_trims_trailing_slash() {
        let env: HashMap<&str, &str> = [
            ("JIRA_URL", "https://jira.test/"),
            ("JIRA_USERNAME", "qa"),
            ("JIRA_API_TOKEN", "secret"),
            ("JIRA_PROJECT_KEY", "UAT"),
        ]
        .into();
        let cfg = JiraConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.base_url, "https://jira.test");
        assert!(!format!("{cfg:?}").contains("secret"));
    }
}
