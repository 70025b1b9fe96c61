use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entity::EntityType;
use crate::errors::ApprovalError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub step_order: u32,
    pub name: String,
    /// Any one of these users may act for the step.
    pub approver_ids: BTreeSet<String>,
}

impl WorkflowStep {
    pub fn new<I, S>(step_order: u32, name: impl Into<String>, approver_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            step_order,
            name: name.into(),
            approver_ids: approver_ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_approver(&self, user_id: &str) -> bool {
        self.approver_ids.contains(user_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalWorkflow {
    pub id: WorkflowId,
    pub name: String,
    pub entity_type: Option<EntityType>,
    pub steps: Vec<WorkflowStep>,
    pub created_at: DateTime<Utc>,
}

impl ApprovalWorkflow {
    pub fn new(
        id: WorkflowId,
        name: impl Into<String>,
        entity_type: Option<EntityType>,
        steps: Vec<WorkflowStep>,
    ) -> Result<Self, ApprovalError> {
        let workflow = Self { id, name: name.into(), entity_type, steps, created_at: Utc::now() };
        workflow.validate()?;
        Ok(workflow)
    }

    /// Steps must be non-empty, numbered `1..=n` in order, and each must name
    /// at least one approver.
    pub fn validate(&self) -> Result<(), ApprovalError> {
        if self.name.trim().is_empty() {
            return Err(ApprovalError::validation("name", "workflow name is required"));
        }
        if self.steps.is_empty() {
            return Err(ApprovalError::validation("steps", "workflow needs at least one step"));
        }

        for (index, step) in self.steps.iter().enumerate() {
            let expected = index as u32 + 1;
            if step.step_order != expected {
                return Err(ApprovalError::validation(
                    "steps",
                    format!(
                        "step orders must be contiguous from 1; found {} at position {expected}",
                        step.step_order
                    ),
                ));
            }
            if step.name.trim().is_empty() {
                return Err(ApprovalError::validation(
                    "steps",
                    format!("step {expected} needs a name"),
                ));
            }
            let has_approver = step.approver_ids.iter().any(|id| !id.trim().is_empty());
            if !has_approver {
                return Err(ApprovalError::validation(
                    "steps",
                    format!("step {expected} needs at least one approver"),
                ));
            }
        }

        Ok(())
    }

    pub fn step_count(&self) -> u32 {
        self.steps.len() as u32
    }

    pub fn step(&self, step_order: u32) -> Option<&WorkflowStep> {
        let index = usize::try_from(step_order).ok()?.checked_sub(1)?;
        self.steps.get(index)
    }

    pub fn is_final_step(&self, step_order: u32) -> bool {
        step_order == self.step_count()
    }

    /// True when the user is an approver on any step.
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.steps.iter().any(|step| step.is_approver(user_id))
    }

    pub fn accepts(&self, entity_type: EntityType) -> bool {
        self.entity_type.map_or(true, |scoped| scoped == entity_type)
    }
}
