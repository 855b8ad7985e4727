//! Deployment plan: the ordered step list a run executes.
//!
//! The plan is a DAG realized as a total order; validation enforces that
//! no step consumes an output a later step produces.

use std::collections::HashSet;

use crate::error::ProvisionError;

/// What a deployment step does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum StepKind {
    Create,
    CreateProxy,
    Call,
    Verify,
}

/// One step of a deployment plan, with its declared data flow.
#[derive(Debug, Clone)]
pub struct DeploymentStep {
    pub kind: StepKind,
    pub name: String,
    /// Outputs of earlier steps this step consumes.
    pub inputs: Vec<String>,
    /// The output this step produces, if any.
    pub output: Option<String>,
}

/// An ordered list of steps, constructed fresh per run.
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    steps: Vec<DeploymentStep>,
}

impl DeploymentPlan {
    pub fn new(steps: Vec<DeploymentStep>) -> Self {
        Self { steps }
    }

    /// The standard two-contract plan: create the primary, create the
    /// secondary behind a proxy, link, then verify both.
    pub fn standard(primary: &str, secondary: &str) -> Self {
        let primary_out = format!("{primary}.address");
        let proxy_out = format!("{secondary}.proxy");
        Self::new(vec![
            DeploymentStep {
                kind: StepKind::Create,
                name: primary.to_string(),
                inputs: vec![],
                output: Some(primary_out.clone()),
            },
            DeploymentStep {
                kind: StepKind::CreateProxy,
                name: secondary.to_string(),
                inputs: vec![primary_out.clone()],
                output: Some(proxy_out.clone()),
            },
            DeploymentStep {
                kind: StepKind::Call,
                name: format!("{primary}.link"),
                inputs: vec![primary_out.clone(), proxy_out.clone()],
                output: Some(format!("{primary}.link.tx")),
            },
            DeploymentStep {
                kind: StepKind::Verify,
                name: primary.to_string(),
                inputs: vec![primary_out],
                output: None,
            },
            DeploymentStep {
                kind: StepKind::Verify,
                name: secondary.to_string(),
                inputs: vec![proxy_out],
                output: None,
            },
        ])
    }

    /// Check that every step only references outputs already produced.
    pub fn validate(&self) -> Result<(), ProvisionError> {
        let mut produced: HashSet<&str> = HashSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            for input in &step.inputs {
                if !produced.contains(input.as_str()) {
                    return Err(ProvisionError::Configuration(format!(
                        "plan step {index} ({} {}) references '{input}' before it is produced",
                        step.kind, step.name
                    )));
                }
            }
            if let Some(output) = &step.output {
                produced.insert(output);
            }
        }
        Ok(())
    }

    pub fn steps(&self) -> &[DeploymentStep] {
        &self.steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_plan_is_valid() {
        let plan = DeploymentPlan::standard("Ledger", "Rewards");
        plan.validate().unwrap();
        assert_eq!(plan.steps().len(), 5);
        assert_eq!(plan.steps()[0].kind, StepKind::Create);
        assert_eq!(plan.steps()[1].kind, StepKind::CreateProxy);
    }

    #[test]
    fn test_out_of_order_plan_rejected() {
        let mut steps = DeploymentPlan::standard("Ledger", "Rewards").steps.clone();
        steps.swap(0, 1);
        let err = DeploymentPlan::new(steps).validate().unwrap_err();
        assert!(err.to_string().contains("before it is produced"));
    }
}
