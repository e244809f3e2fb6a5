use serde::{Deserialize, Serialize};

use super::{Entity, EntityKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
  #[default]
  Open,
  Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
  #[default]
  Pending,
  Reviewed,
  Accepted,
  Rejected,
}

/// A job or internship posting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
  pub id: String,
  pub title: String,
  #[serde(default)]
  pub company: String,
  #[serde(default)]
  pub location: String,
  /// "FULL_TIME", "PART_TIME", "INTERNSHIP", ...
  #[serde(default)]
  pub job_type: String,
  #[serde(default)]
  pub status: JobStatus,
  #[serde(default)]
  pub salary: Option<String>,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub created_at: Option<String>,
  #[serde(default)]
  pub updated_at: Option<String>,
}

/// A student's application to a job posting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
  pub id: String,
  pub job_id: String,
  #[serde(default)]
  pub applicant_name: String,
  #[serde(default)]
  pub email: String,
  #[serde(default)]
  pub status: ApplicationStatus,
  #[serde(default)]
  pub cover_letter: Option<String>,
  #[serde(default)]
  pub resume_url: Option<String>,
  #[serde(default)]
  pub created_at: Option<String>,
  #[serde(default)]
  pub updated_at: Option<String>,
}

impl Entity for Job {
  const KIND: EntityKind = EntityKind::Job;

  fn id(&self) -> &str {
    &self.id
  }

  fn updated_at(&self) -> Option<&str> {
    self.updated_at.as_deref()
  }

  fn stats_kinds() -> &'static [EntityKind] {
    &[EntityKind::Job]
  }

  fn dependents() -> &'static [EntityKind] {
    &[EntityKind::Application]
  }
}

impl Entity for Application {
  const KIND: EntityKind = EntityKind::Application;

  fn id(&self) -> &str {
    &self.id
  }

  fn updated_at(&self) -> Option<&str> {
    self.updated_at.as_deref()
  }

  // Job statistics count applications per status.
  fn stats_kinds() -> &'static [EntityKind] {
    &[EntityKind::Application, EntityKind::Job]
  }
}
