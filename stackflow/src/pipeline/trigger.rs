//! What starts a release run.

use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};

/// Which repository an image was pushed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryRole {
    /// The deployable service image.
    Service,
    /// The integration-test harness image.
    TestHarness,
}

/// A new tag appeared in the image registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePublished {
    /// Repository name.
    pub repository: String,
    /// Tag pushed.
    pub tag: String,
    /// Role of the repository.
    pub role: RepositoryRole,
    /// When the push was observed.
    pub published_at: Timestamp,
}

impl ImagePublished {
    /// A push observed now.
    #[must_use]
    pub fn new(
        repository: impl Into<String>,
        tag: impl Into<String>,
        role: RepositoryRole,
    ) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
            role,
            published_at: crate::utils::now_utc(),
        }
    }
}

/// The cause of a release run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineTrigger {
    /// An image push; the run tracks the configured source tag of both repositories.
    ImagePublished(ImagePublished),
    /// A separately triggered run of a prior image, pinned to explicit tags.
    Rollback {
        /// Service image tag to redeploy.
        service_tag: String,
        /// Test-harness tag to verify with.
        test_tag: String,
    },
}

impl PipelineTrigger {
    /// A service image push of `tag`.
    #[must_use]
    pub fn service_push(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self::ImagePublished(ImagePublished::new(repository, tag, RepositoryRole::Service))
    }

    /// A rollback to the given tags.
    #[must_use]
    pub fn rollback(service_tag: impl Into<String>, test_tag: impl Into<String>) -> Self {
        Self::Rollback {
            service_tag: service_tag.into(),
            test_tag: test_tag.into(),
        }
    }

    /// Tags the Source stage resolves, as `(service, test)`.
    #[must_use]
    pub fn source_tags<'a>(&'a self, tracked: &'a str) -> (&'a str, &'a str) {
        match self {
            Self::ImagePublished(_) => (tracked, tracked),
            Self::Rollback { service_tag, test_tag } => (service_tag, test_tag),
        }
    }

    /// Short description for events and logs.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::ImagePublished(push) => format!("push {}:{}", push.repository, push.tag),
            Self::Rollback { service_tag, .. } => format!("rollback to {service_tag}"),
        }
    }
}
