//! Script acquisition and execution pipeline
//!
//! Discovery resolves the references found in metadata into files in the
//! working directory; the runner then executes them one after another.
//! Failures of individual scripts are logged and never stop the batch.

pub mod discovery;
pub mod resolver;
pub mod runner;

pub use discovery::{AttributeKind, discover};
pub use resolver::{ResolvedScript, SourceResolver};
pub use runner::ScriptRunner;

use tracing::{error, info};

use crate::{MetadataMap, ScriptType};

/// Result of running a single script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub script: String,
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// What happened during one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub outcomes: Vec<ExecutionOutcome>,
}

impl RunSummary {
    pub fn discovered(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.discovered() - self.succeeded()
    }
}

/// Discovers, resolves and runs the scripts for one script type
pub struct ScriptPipeline {
    script_type: ScriptType,
    resolver: SourceResolver,
    runner: ScriptRunner,
}

impl ScriptPipeline {
    pub fn new(script_type: ScriptType, resolver: SourceResolver, runner: ScriptRunner) -> Self {
        Self {
            script_type,
            resolver,
            runner,
        }
    }

    /// Run every script referenced in `metadata`, in discovery order
    pub async fn run(&self, metadata: &MetadataMap) -> RunSummary {
        let scripts = discover(self.script_type, metadata, &self.resolver).await;
        if scripts.is_empty() {
            info!("No {} scripts found in metadata", self.script_type);
        }

        let mut summary = RunSummary::default();
        for script in &scripts {
            info!("Running {} script {}", self.script_type, script.name);
            let error = match self.runner.run(&script.name).await {
                Ok(()) => None,
                Err(e) => {
                    error!("{}", e);
                    Some(e.to_string())
                }
            };
            summary.outcomes.push(ExecutionOutcome {
                script: script.name.clone(),
                error,
            });
        }

        info!(
            "Finished running {} scripts: {} succeeded, {} failed",
            self.script_type,
            summary.succeeded(),
            summary.failed()
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts() {
        let summary = RunSummary {
            outcomes: vec![
                ExecutionOutcome {
                    script: "a.sh".to_string(),
                    error: None,
                },
                ExecutionOutcome {
                    script: "b.sh".to_string(),
                    error: Some("exited with status 1".to_string()),
                },
                ExecutionOutcome {
                    script: "script123".to_string(),
                    error: None,
                },
            ],
        };

        assert_eq!(summary.discovered(), 3);
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.failed(), 1);
    }

    #[test]
    fn test_empty_summary() {
        let summary = RunSummary::default();
        assert_eq!(summary.discovered(), 0);
        assert_eq!(summary.failed(), 0);
    }
}
