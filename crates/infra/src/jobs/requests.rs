//! Request generation: turning a claimed job into an engine execution description.
//!
//! Generators are registered per job type in a [`JobTypeRegistry`] and resolved by
//! exact name, then by the longest matching `"prefix.*"` pattern, then by `"*"`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::types::Job;

/// Request generation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("no request generator registered for job type '{0}'")]
    UnknownJobType(String),
    #[error("cannot build request for job: {0}")]
    InvalidJob(String),
}

/// Builds the execution request for one job type.
pub trait RequestGenerator: Send + Sync {
    fn generate(&self, job: &Job) -> Result<JsonValue, RequestError>;
}

impl<F> RequestGenerator for F
where
    F: Fn(&Job) -> Result<JsonValue, RequestError> + Send + Sync,
{
    fn generate(&self, job: &Job) -> Result<JsonValue, RequestError> {
        self(job)
    }
}

/// Job type name → request generator.
#[derive(Clone, Default)]
pub struct JobTypeRegistry {
    generators: HashMap<String, Arc<dyn RequestGenerator>>,
}

impl JobTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that routes every job type to the engine generator.
    pub fn with_engine_default() -> Self {
        let mut registry = Self::new();
        registry.register("*", EngineRequestGenerator::default());
        registry
    }

    /// Register a generator under an exact name, a `"prefix.*"` pattern or `"*"`.
    pub fn register<G>(&mut self, pattern: impl Into<String>, generator: G)
    where
        G: RequestGenerator + 'static,
    {
        self.generators.insert(pattern.into(), Arc::new(generator));
    }

    pub fn resolve(&self, job_type: &str) -> Option<&dyn RequestGenerator> {
        if let Some(g) = self.generators.get(job_type) {
            return Some(g.as_ref());
        }

        let category = self
            .generators
            .iter()
            .filter_map(|(pattern, g)| {
                let prefix = pattern.strip_suffix(".*")?;
                let rest = job_type.strip_prefix(prefix)?;
                rest.starts_with('.').then_some((prefix.len(), g))
            })
            .max_by_key(|(len, _)| *len);
        if let Some((_, g)) = category {
            return Some(g.as_ref());
        }

        self.generators.get("*").map(|g| g.as_ref())
    }

    /// Resolve the job's type and generate its request.
    pub fn generate(&self, job: &Job) -> Result<JsonValue, RequestError> {
        self.resolve(&job.name)
            .ok_or_else(|| RequestError::UnknownJobType(job.name.clone()))?
            .generate(job)
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }
}

impl core::fmt::Debug for JobTypeRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut patterns: Vec<&String> = self.generators.keys().collect();
        patterns.sort();
        f.debug_struct("JobTypeRegistry")
            .field("patterns", &patterns)
            .finish()
    }
}

const ENGINE_ROOT: &str = "/flywheel/v0";

/// One file or directory transfer in an engine request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    #[serde(rename = "type")]
    pub kind: String,
    pub uri: String,
    pub location: String,
}

impl Transfer {
    fn api(uri: String, location: String) -> Self {
        Self {
            kind: "scitran".to_string(),
            uri,
            location,
        }
    }
}

/// What the engine runs once inputs are in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub command: Vec<String>,
    pub env: HashMap<String, String>,
    pub dir: String,
}

/// Execution description handed to an engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineRequest {
    pub inputs: Vec<Transfer>,
    pub target: Target,
    pub outputs: Vec<Transfer>,
}

/// Default generator: fetch the job type's bundle and every named input, run
/// `config.command` (or the bundle's `run` script), upload outputs to the
/// destination container.
#[derive(Debug, Clone)]
pub struct EngineRequestGenerator {
    root: String,
    path_env: String,
}

impl Default for EngineRequestGenerator {
    fn default() -> Self {
        Self {
            root: ENGINE_ROOT.to_string(),
            path_env: "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string(),
        }
    }
}

impl EngineRequestGenerator {
    pub fn build(&self, job: &Job) -> Result<EngineRequest, RequestError> {
        let destination = job
            .destination
            .as_ref()
            .ok_or_else(|| RequestError::InvalidJob(format!("job '{}' has no destination", job.name)))?;

        let mut inputs = vec![Transfer::api(
            format!("/gears/{}", job.name),
            self.root.clone(),
        )];
        inputs.extend(job.inputs.iter().map(|(key, input)| {
            Transfer::api(
                input.file_path(),
                format!("{}/input/{}", self.root, key),
            )
        }));

        let command = match job.config.get("command") {
            None | Some(JsonValue::Null) => vec![format!("{}/run", self.root)],
            Some(JsonValue::Array(parts)) if !parts.is_empty() => parts
                .iter()
                .map(|p| {
                    p.as_str().map(str::to_string).ok_or_else(|| {
                        RequestError::InvalidJob("config.command must be a list of strings".to_string())
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => {
                return Err(RequestError::InvalidJob(
                    "config.command must be a non-empty list of strings".to_string(),
                ));
            }
        };

        let mut env = HashMap::new();
        env.insert("PATH".to_string(), self.path_env.clone());

        Ok(EngineRequest {
            inputs,
            target: Target {
                command,
                env,
                dir: self.root.clone(),
            },
            outputs: vec![Transfer::api(
                destination.path(),
                format!("{}/output", self.root),
            )],
        })
    }
}

impl RequestGenerator for EngineRequestGenerator {
    fn generate(&self, job: &Job) -> Result<JsonValue, RequestError> {
        let request = self.build(job)?;
        serde_json::to_value(request).map_err(|e| RequestError::InvalidJob(e.to_string()))
    }
}

/// A generator that produces a fixed document; handy for job types with no inputs.
pub fn static_request(request: JsonValue) -> impl RequestGenerator {
    move |_: &Job| -> Result<JsonValue, RequestError> { Ok(request.clone()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::{JobInput, NewJob};
    use chrono::Utc;
    use labstore_core::{ContainerId, ContainerKind, ContainerRef};
    use serde_json::json;

    fn job_named(name: &str) -> Job {
        NewJob::named(name).into_job(Utc::now())
    }

    fn tagging(tag: &'static str) -> impl RequestGenerator {
        move |_: &Job| -> Result<JsonValue, RequestError> { Ok(json!({ "via": tag })) }
    }

    #[test]
    fn resolves_exact_then_category_then_wildcard() {
        let mut registry = JobTypeRegistry::new();
        registry.register("dicom.convert", tagging("exact"));
        registry.register("dicom.*", tagging("category"));
        registry.register("*", tagging("wildcard"));

        let via = |name: &str| registry.generate(&job_named(name)).unwrap()["via"].clone();
        assert_eq!(via("dicom.convert"), "exact");
        assert_eq!(via("dicom.classify"), "category");
        assert_eq!(via("qa-report"), "wildcard");
        // prefix must end at a dot boundary
        assert_eq!(via("dicomx.convert"), "wildcard");
    }

    #[test]
    fn longest_category_wins() {
        let mut registry = JobTypeRegistry::new();
        registry.register("mri.*", tagging("short"));
        registry.register("mri.dwi.*", tagging("long"));

        let out = registry.generate(&job_named("mri.dwi.eddy")).unwrap();
        assert_eq!(out["via"], "long");
    }

    #[test]
    fn unknown_type_is_reported() {
        let registry = JobTypeRegistry::new();
        let err = registry.generate(&job_named("mystery")).unwrap_err();
        assert_eq!(err, RequestError::UnknownJobType("mystery".to_string()));
    }

    #[test]
    fn engine_request_maps_inputs_and_destination() {
        let acq = ContainerId::new();
        let session = ContainerId::new();
        let job = NewJob::named("dcm2niix")
            .with_input(
                "dicom",
                JobInput::new(ContainerRef::new(ContainerKind::Acquisition, acq), "t1.zip"),
            )
            .with_destination(ContainerRef::new(ContainerKind::Session, session))
            .into_job(Utc::now());

        let request = EngineRequestGenerator::default().build(&job).unwrap();

        assert_eq!(request.inputs.len(), 2);
        assert_eq!(request.inputs[0].uri, "/gears/dcm2niix");
        assert_eq!(request.inputs[1].uri, format!("/acquisitions/{acq}/files/t1.zip"));
        assert_eq!(request.inputs[1].location, "/flywheel/v0/input/dicom");
        assert_eq!(request.target.command, vec!["/flywheel/v0/run".to_string()]);
        assert_eq!(request.target.dir, "/flywheel/v0");
        assert!(request.target.env.contains_key("PATH"));
        assert_eq!(request.outputs[0].uri, format!("/sessions/{session}"));
        assert_eq!(request.outputs[0].location, "/flywheel/v0/output");
    }

    #[test]
    fn engine_request_honours_config_command() {
        let job = NewJob::named("qa")
            .with_destination(ContainerRef::new(ContainerKind::Project, ContainerId::new()))
            .with_config(json!({ "command": ["python", "qa.py", "--strict"] }))
            .into_job(Utc::now());

        let value = EngineRequestGenerator::default().generate(&job).unwrap();
        assert_eq!(value["target"]["command"], json!(["python", "qa.py", "--strict"]));
        assert_eq!(value["outputs"][0]["type"], "scitran");
    }

    #[test]
    fn engine_request_rejects_bad_jobs() {
        let no_destination = job_named("qa");
        assert!(matches!(
            EngineRequestGenerator::default().build(&no_destination),
            Err(RequestError::InvalidJob(_))
        ));

        let bad_command = NewJob::named("qa")
            .with_destination(ContainerRef::new(ContainerKind::Project, ContainerId::new()))
            .with_config(json!({ "command": "run.sh" }))
            .into_job(Utc::now());
        assert!(matches!(
            EngineRequestGenerator::default().build(&bad_command),
            Err(RequestError::InvalidJob(_))
        ));
    }
}
