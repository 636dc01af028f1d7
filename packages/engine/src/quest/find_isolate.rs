//! Build stage: find an isolate for a change, building it if necessary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use crate::args::{ArgumentError, JobArguments};
use crate::kernel::{EngineDeps, IsolateRef};
use crate::model::Change;
use crate::quest::execution::StepResult;
use crate::quest::ResultArguments;
use crate::services::buildbucket::{BuildRequest, BUILD_COMPLETED, BUILD_SUCCESS};

/// The bucket builds are dispatched to.
pub const BUCKET: &str = "perf.try";

#[derive(Debug, Error)]
#[error("build {build_id} completed with result \"{result}\"")]
pub struct BuildError {
    pub build_id: String,
    pub result: String,
}

#[derive(Debug, Error)]
#[error("build {build_id} succeeded but did not upload an isolate for target \"{target}\"")]
pub struct IsolateNotFoundError {
    pub build_id: String,
    pub target: String,
}

/// Quest: produce an isolate for (builder, change, target).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindIsolate {
    builder: String,
    target: String,
}

impl FindIsolate {
    pub fn new(builder: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            builder: builder.into(),
            target: target.into(),
        }
    }

    pub fn from_args(arguments: &JobArguments) -> Result<Option<Self>, ArgumentError> {
        let builder = arguments
            .builder
            .as_deref()
            .ok_or(ArgumentError::Missing("builder"))?;
        let target = arguments
            .target
            .as_deref()
            .ok_or(ArgumentError::Missing("target"))?;
        Ok(Some(Self::new(builder, target)))
    }

    pub(crate) fn start(&self, change: &Change) -> FindIsolateRun {
        FindIsolateRun {
            change: change.clone(),
            build_id: None,
            build_url: None,
        }
    }
}

/// Execution state for one build lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindIsolateRun {
    change: Change,
    build_id: Option<String>,
    build_url: Option<String>,
}

impl FindIsolateRun {
    pub(crate) async fn poll(
        &mut self,
        quest: &FindIsolate,
        deps: &EngineDeps,
    ) -> Result<StepResult> {
        let change_id = self.change.id_string();
        let pending_key = format!("{}/{}/{}", quest.builder, change_id, quest.target);

        let build_id = match &self.build_id {
            None => {
                // A build may already have produced this isolate.
                if let Some(isolate) = deps
                    .isolate_cache
                    .get(&quest.builder, &change_id, &quest.target)
                    .await?
                {
                    return Ok(complete_with(isolate));
                }

                // Or one may already be in flight for this exact key.
                if let Some(build_id) = deps.pending_builds.get(&pending_key).await? {
                    debug!(build_id = %build_id, "reusing in-flight build");
                    self.build_id = Some(build_id);
                    return Ok(StepResult::Pending);
                }

                let request = self.build_request(quest, deps)?;
                let build_id = deps
                    .builds
                    .put(BUCKET, &request)
                    .await
                    .context("requesting build")?;
                // First writer wins; a racing job's build id is as good as
                // ours.
                let build_id = deps
                    .pending_builds
                    .put_if_absent(&pending_key, &build_id)
                    .await?;
                info!(build_id = %build_id, builder = %quest.builder, change = %self.change, "build requested");
                self.build_id = Some(build_id);
                return Ok(StepResult::Pending);
            }
            Some(build_id) => build_id.clone(),
        };

        let status = deps
            .builds
            .status(&build_id)
            .await
            .context("polling build status")?;
        if status.url.is_some() {
            self.build_url = status.url;
        }
        if status.status != BUILD_COMPLETED {
            return Ok(StepResult::Pending);
        }

        deps.pending_builds.remove(&pending_key).await?;

        let result = status.result.unwrap_or_default();
        if result != BUILD_SUCCESS {
            return Err(BuildError { build_id, result }.into());
        }

        match deps
            .isolate_cache
            .get(&quest.builder, &change_id, &quest.target)
            .await?
        {
            Some(isolate) => Ok(complete_with(isolate)),
            None => Err(IsolateNotFoundError {
                build_id,
                target: quest.target.clone(),
            }
            .into()),
        }
    }

    fn build_request(&self, quest: &FindIsolate, deps: &EngineDeps) -> Result<BuildRequest> {
        let mut properties = serde_json::Map::new();
        properties.insert("clobber".into(), json!(true));
        properties.insert(
            "parent_got_revision".into(),
            json!(self.change.base_commit().git_hash),
        );

        if !self.change.deps().is_empty() {
            let mut overrides = serde_json::Map::new();
            for dep in self.change.deps() {
                let url = dep.repository_url(&deps.repositories)?;
                overrides.insert(url.to_string(), json!(dep.git_hash));
            }
            properties.insert("deps_revision_overrides".into(), overrides.into());
        }

        if let Some(patch) = self.change.patch() {
            properties.extend(patch.build_parameters());
        }

        Ok(BuildRequest {
            builder_name: quest.builder.clone(),
            properties: properties.into(),
        })
    }

    pub(crate) fn details(&self) -> serde_json::Value {
        json!({
            "build": self.build_id,
            "build_url": self.build_url,
        })
    }
}

fn complete_with(isolate: IsolateRef) -> StepResult {
    let mut arguments = ResultArguments::new();
    arguments.insert("isolate_server".to_string(), isolate.isolate_server);
    arguments.insert("isolate_hash".to_string(), isolate.isolate_hash);
    StepResult::Complete {
        values: Vec::new(),
        arguments,
    }
}
