//! Steps executed for a run

use std::sync::Arc;
use std::time::Duration;

use runstore::Plan;

use crate::config::{PipelineConfig, StepConfig};
use crate::step::{BusyStep, StepBody, StepPolicy};

/// One step of a run's pipeline, ready to execute
#[derive(Clone)]
pub struct PlannedStep {
    pub name: String,
    pub body: Arc<dyn StepBody>,
    pub policy: StepPolicy,
}

impl PlannedStep {
    pub fn new(name: impl Into<String>, body: Arc<dyn StepBody>, policy: StepPolicy) -> Self {
        Self {
            name: name.into(),
            body,
            policy,
        }
    }
}

impl std::fmt::Debug for PlannedStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannedStep")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Decides which steps a plan's run executes
pub trait PipelineSource: Send + Sync {
    fn steps_for(&self, plan: &Plan) -> Vec<PlannedStep>;
}

impl<F> PipelineSource for F
where
    F: Fn(&Plan) -> Vec<PlannedStep> + Send + Sync,
{
    fn steps_for(&self, plan: &Plan) -> Vec<PlannedStep> {
        self(plan)
    }
}

/// Pipeline read from configuration: the same busy steps for every plan
#[derive(Debug, Clone)]
pub struct ConfigPipeline {
    steps: Vec<StepConfig>,
    poll_interval: Duration,
}

impl ConfigPipeline {
    pub fn new(pipeline: &PipelineConfig, poll_interval: Duration) -> Self {
        Self {
            steps: pipeline.steps.clone(),
            poll_interval,
        }
    }
}

impl PipelineSource for ConfigPipeline {
    fn steps_for(&self, _plan: &Plan) -> Vec<PlannedStep> {
        self.steps
            .iter()
            .map(|step| {
                let body = BusyStep::new(Duration::from_millis(step.duration_ms), self.poll_interval);
                PlannedStep::new(step.name.clone(), Arc::new(body), StepPolicy::from(step))
            })
            .collect()
    }
}
