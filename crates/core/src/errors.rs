use serde::Serialize;
use thiserror::Error;

use crate::domain::entity::EntityRef;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("actor is not permitted to perform this action")]
    NotAuthorized,
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },
    #[error("validation failed for `{field}`: {message}")]
    Validation { field: &'static str, message: String },
    #[error("{resource} `{id}` not found")]
    NotFound { resource: &'static str, id: String },
    #[error("an approval is already in progress for {entity}")]
    AlreadyActive { entity: EntityRef, request_id: String },
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl ApprovalError {
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState { reason: reason.into() }
    }

    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation { field, message: message.into() }
    }

    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { resource, id: id.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotAuthorized => "not_authorized",
            Self::InvalidState { .. } => "invalid_state",
            Self::Validation { .. } => "validation_error",
            Self::NotFound { .. } => "not_found",
            Self::AlreadyActive { .. } => "already_active",
            Self::Persistence(_) => "persistence",
        }
    }

    /// Message safe to show an end user. Never names eligible approvers.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotAuthorized => "You cannot perform this action.".to_string(),
            Self::InvalidState { .. } => "This request has already been resolved.".to_string(),
            Self::Validation { message, .. } => message.clone(),
            Self::NotFound { resource, .. } => format!("The requested {resource} was not found."),
            Self::AlreadyActive { .. } => {
                "An approval is already in progress for this item.".to_string()
            }
            Self::Persistence(_) => {
                "The service is temporarily unavailable. Please retry shortly.".to_string()
            }
        }
    }

    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Validation { field, .. } => Some(field),
            _ => None,
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        InterfaceError {
            error: self.kind(),
            message: self.user_message(),
            field: self.field(),
            correlation_id: correlation_id.into(),
        }
    }
}

/// User-facing error payload. Internal detail stays in logs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InterfaceError {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<&'static str>,
    pub correlation_id: String,
}

#[cfg(test)]
mod tests {
    use crate::domain::entity::{EntityRef, EntityType};
    use crate::errors::ApprovalError;

    #[test]
    fn not_authorized_message_does_not_leak_approvers() {
        let interface = ApprovalError::NotAuthorized.into_interface("req-1");

        assert_eq!(interface.error, "not_authorized");
        assert_eq!(interface.message, "You cannot perform this action.");
        assert_eq!(interface.correlation_id, "req-1");
        assert!(interface.field.is_none());
    }

    #[test]
    fn validation_error_is_surfaced_on_its_field() {
        let interface = ApprovalError::validation("conditions", "conditions are required")
            .into_interface("req-2");

        assert_eq!(interface.error, "validation_error");
        assert_eq!(interface.field, Some("conditions"));
        assert_eq!(interface.message, "conditions are required");
    }

    #[test]
    fn invalid_state_uses_resolved_wording() {
        let error = ApprovalError::invalid_state("request is approved");
        assert_eq!(error.user_message(), "This request has already been resolved.");
        assert_eq!(error.to_string(), "invalid state: request is approved");
    }

    #[test]
    fn already_active_names_the_entity_in_logs_only() {
        let error = ApprovalError::AlreadyActive {
            entity: EntityRef::new(EntityType::Rfi, "RFI-7"),
            request_id: "APR-1".to_string(),
        };

        assert!(error.to_string().contains("rfi:RFI-7"));
        assert_eq!(error.user_message(), "An approval is already in progress for this item.");
    }

    #[test]
    fn persistence_error_maps_to_retry_message() {
        let error = ApprovalError::Persistence("database lock timeout".to_string());
        assert_eq!(error.kind(), "persistence");
        assert!(!error.user_message().contains("lock"));
    }
}
