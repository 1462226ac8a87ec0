// src/coordinator/custom.rs

use std::future::Future;
use std::pin::Pin;

use tracing::{debug, warn};

use super::{Coordinator, RunCoordinator};
use crate::errors::SubmissionHookError;
use crate::run::{RunId, RunRequest, SubmissionContext, SubmittedRun, Tags};

/// Longest tag value a hook may derive.
pub const MAX_TAG_VALUE_LEN: usize = 256;

/// Derives extra run tags from a submission before it is delegated.
pub trait SubmissionHook: Send + Sync {
    fn name(&self) -> &str;

    fn derive_tags(
        &self,
        request: &RunRequest,
        context: &SubmissionContext,
    ) -> Result<Tags, SubmissionHookError>;
}

/// Copies an HTTP header forwarded in the submission context into a tag.
///
/// A missing header derives nothing. A malformed one is an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderTagHook {
    header: String,
    tag: String,
    name: String,
}

impl HeaderTagHook {
    pub fn new(header: impl Into<String>, tag: impl Into<String>) -> Self {
        let header = header.into();
        let tag = tag.into();
        let name = format!("header:{header}");
        Self { header, tag, name }
    }

    fn error(&self, message: impl Into<String>) -> SubmissionHookError {
        SubmissionHookError {
            hook: self.name.clone(),
            message: message.into(),
        }
    }
}

impl SubmissionHook for HeaderTagHook {
    fn name(&self) -> &str {
        &self.name
    }

    fn derive_tags(
        &self,
        _request: &RunRequest,
        context: &SubmissionContext,
    ) -> Result<Tags, SubmissionHookError> {
        let Some(raw) = context.header(&self.header) else {
            return Ok(Tags::new());
        };
        let value = raw.trim();
        if value.is_empty() {
            return Err(self.error(format!("header '{}' is empty", self.header)));
        }
        if value.len() > MAX_TAG_VALUE_LEN {
            return Err(self.error(format!(
                "header '{}' is longer than {MAX_TAG_VALUE_LEN} characters",
                self.header
            )));
        }
        if !value.chars().all(|c| c.is_ascii_graphic() || c == ' ') {
            return Err(self.error(format!(
                "header '{}' contains non-printable or non-ASCII characters",
                self.header
            )));
        }
        Ok(Tags::from([(self.tag.clone(), value.to_string())]))
    }
}

/// Runs its hooks in order, then delegates to the wrapped coordinator.
///
/// A failing hook is logged and skipped. Tags already on the request are
/// never overwritten; among hooks the first to set a key wins.
pub struct CustomRunCoordinator {
    inner: Box<Coordinator>,
    hooks: Vec<Box<dyn SubmissionHook>>,
}

impl CustomRunCoordinator {
    pub fn new(inner: Coordinator) -> Self {
        Self {
            inner: Box::new(inner),
            hooks: Vec::new(),
        }
    }

    pub fn with_hook(mut self, hook: impl SubmissionHook + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    pub fn inner(&self) -> &Coordinator {
        &self.inner
    }

    fn apply_hooks(&self, mut request: RunRequest, context: &SubmissionContext) -> RunRequest {
        for hook in &self.hooks {
            match hook.derive_tags(&request, context) {
                Ok(tags) => {
                    for (key, value) in tags {
                        if request.tags.contains_key(&key) {
                            debug!(hook = hook.name(), tag = %key, "tag already set; keeping existing value");
                            continue;
                        }
                        request.tags.insert(key, value);
                    }
                }
                Err(e) => {
                    warn!(hook = %e.hook, error = %e.message, "submission hook failed; continuing without its tags");
                }
            }
        }
        request
    }
}

impl RunCoordinator for CustomRunCoordinator {
    fn submit_run<'a>(
        &'a self,
        request: RunRequest,
        context: &'a SubmissionContext,
    ) -> Pin<Box<dyn Future<Output = SubmittedRun> + Send + 'a>> {
        let request = self.apply_hooks(request, context);
        self.inner.submit_run(request, context)
    }

    fn cancel_run(&self, run_id: &RunId) -> bool {
        self.inner.cancel_run(run_id)
    }
}
