use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Moderation state of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Approved => "approved",
            SubmissionStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for SubmissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SubmissionStatus::Pending),
            "approved" => Ok(SubmissionStatus::Approved),
            "rejected" => Ok(SubmissionStatus::Rejected),
            other => Err(format!("unknown submission status: {other}")),
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored resource submission. Field names on the wire match what the
/// browser client and the KV namespace already use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub disciplines: Vec<String>,
    #[serde(default)]
    pub contact: String,
    #[serde(default)]
    pub page: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub user_agent: String,
    pub ts: DateTime<Utc>,
    #[serde(default)]
    pub status: SubmissionStatus,
    #[serde(default)]
    pub admin_note: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_at: Option<DateTime<Utc>>,
}

/// Validated, normalized user input. Server-side fields are added by
/// [`SubmissionDraft::into_submission`].
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionDraft {
    pub name: String,
    pub url: String,
    pub description: String,
    pub tags: Vec<String>,
    pub disciplines: Vec<String>,
    pub contact: String,
    pub page: String,
}

impl SubmissionDraft {
    pub fn into_submission(
        self,
        id: String,
        ip: String,
        user_agent: String,
        ts: DateTime<Utc>,
    ) -> Submission {
        Submission {
            id,
            name: self.name,
            url: self.url,
            description: self.description,
            tags: self.tags,
            disciplines: self.disciplines,
            contact: self.contact,
            page: self.page,
            ip,
            user_agent,
            ts,
            status: SubmissionStatus::Pending,
            admin_note: String::new(),
            admin_at: None,
        }
    }
}
