use chrono::{DateTime, Utc};
use strum::{Display, EnumString, IntoStaticStr};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of an image generation job.
///
/// Moves forward only: `pending -> processing -> {completed, failed}`.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether a job in `self` may be moved to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

/// A status write together with the fields that may accompany it.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: JobStatus,
    pub animal: Option<String>,
    pub image_urls: Option<Vec<String>>,
    pub error: Option<String>,
}

impl StatusUpdate {
    /// The claim write.
    pub fn processing() -> Self {
        Self {
            status: JobStatus::Processing,
            animal: None,
            image_urls: None,
            error: None,
        }
    }

    pub fn completed(animal: impl Into<String>, image_urls: Vec<String>) -> Self {
        Self {
            status: JobStatus::Completed,
            animal: Some(animal.into()),
            image_urls: Some(image_urls),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            animal: None,
            image_urls: None,
            error: Some(error.into()),
        }
    }
}

/// Why a status write was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("cannot move job from {from} to {to}")]
    Illegal { from: JobStatus, to: JobStatus },

    #[error("completed job needs {expected} image urls, got {actual}")]
    ImageCount { expected: i32, actual: usize },

    #[error("completed job needs a non-empty animal")]
    MissingAnimal,

    #[error("failed job needs a non-empty error message")]
    MissingError,

    #[error("field `{field}` cannot be written with status {status}")]
    UnexpectedField {
        field: &'static str,
        status: JobStatus,
    },
}

/// A batch image generation job.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub num_images: i32,
    pub animal: Option<String>,
    pub image_urls: Vec<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A fresh pending job with a generated id.
    pub fn new(num_images: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Pending,
            num_images,
            animal: None,
            image_urls: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check `update` against the state machine and the terminal-field rules
    /// without touching the job.
    pub fn check(&self, update: &StatusUpdate) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(update.status) {
            return Err(TransitionError::Illegal {
                from: self.status,
                to: update.status,
            });
        }

        match update.status {
            JobStatus::Completed => {
                if update.error.is_some() {
                    return Err(TransitionError::UnexpectedField {
                        field: "error",
                        status: update.status,
                    });
                }
                if update.animal.as_deref().map_or(true, |a| a.trim().is_empty()) {
                    return Err(TransitionError::MissingAnimal);
                }
                let actual = update.image_urls.as_ref().map_or(0, Vec::len);
                if actual != self.num_images as usize {
                    return Err(TransitionError::ImageCount {
                        expected: self.num_images,
                        actual,
                    });
                }
            }
            JobStatus::Failed => {
                if update.error.as_deref().map_or(true, |e| e.trim().is_empty()) {
                    return Err(TransitionError::MissingError);
                }
                if update.image_urls.as_ref().is_some_and(|urls| !urls.is_empty()) {
                    return Err(TransitionError::UnexpectedField {
                        field: "image_urls",
                        status: update.status,
                    });
                }
            }
            JobStatus::Pending | JobStatus::Processing => {
                let field = if update.animal.is_some() {
                    Some("animal")
                } else if update.image_urls.is_some() {
                    Some("image_urls")
                } else if update.error.is_some() {
                    Some("error")
                } else {
                    None
                };
                if let Some(field) = field {
                    return Err(TransitionError::UnexpectedField {
                        field,
                        status: update.status,
                    });
                }
            }
        }

        Ok(())
    }

    /// Apply a status write. `updated_at` never moves backwards.
    pub fn apply(&mut self, update: StatusUpdate, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.check(&update)?;

        self.status = update.status;
        if let Some(animal) = update.animal {
            self.animal = Some(animal);
        }
        if let Some(urls) = update.image_urls {
            self.image_urls = urls;
        }
        if let Some(error) = update.error {
            self.error = Some(error);
        }
        self.updated_at = now.max(self.updated_at);

        Ok(())
    }
}
