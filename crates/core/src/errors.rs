use thiserror::Error;

/// Failures raised by the order-to-cash workflow. Every variant except
/// `RetryExhausted` and `Storage` is a client fault raised before any write.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("{reason}")]
    Conflict { reason: String },
    #[error("{reason}")]
    Validation { reason: String },
    #[error("{reason}")]
    LockedState { reason: String },
    #[error("{operation} gave up after {attempts} attempts")]
    RetryExhausted { operation: &'static str, attempts: u32 },
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

impl WorkflowError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict { reason: reason.into() }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation { reason: reason.into() }
    }

    pub fn locked(reason: impl Into<String>) -> Self {
        Self::LockedState { reason: reason.into() }
    }

    pub fn storage(reason: impl Into<String>) -> Self {
        Self::Storage { reason: reason.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::Conflict { .. } => "The request conflicts with the current workflow state.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = || "unassigned".to_owned();
        match value {
            ApplicationError::Workflow(WorkflowError::NotFound { entity, id }) => {
                Self::NotFound { message: format!("{entity} {id} not found"), correlation_id: unassigned() }
            }
            ApplicationError::Workflow(WorkflowError::Conflict { reason })
            | ApplicationError::Workflow(WorkflowError::LockedState { reason }) => {
                Self::Conflict { message: reason, correlation_id: unassigned() }
            }
            ApplicationError::Workflow(WorkflowError::Validation { reason }) => {
                Self::BadRequest { message: reason, correlation_id: unassigned() }
            }
            ApplicationError::Workflow(WorkflowError::RetryExhausted { operation, attempts }) => {
                Self::Internal {
                    message: format!("{operation} gave up after {attempts} attempts"),
                    correlation_id: unassigned(),
                }
            }
            ApplicationError::Workflow(WorkflowError::Storage { reason })
            | ApplicationError::Persistence(reason) => {
                Self::ServiceUnavailable { message: reason, correlation_id: unassigned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, InterfaceError, WorkflowError};

    #[test]
    fn validation_maps_to_bad_request_with_correlation_id() {
        let interface = ApplicationError::from(WorkflowError::validation(
            "Payment amount must be positive",
        ))
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
    }

    #[test]
    fn one_way_gate_violations_map_to_conflict() {
        let already = ApplicationError::from(WorkflowError::conflict("Quotation already approved"))
            .into_interface("req-2");
        let locked = ApplicationError::from(WorkflowError::locked("Invoice not Approved"))
            .into_interface("req-3");

        assert!(matches!(already, InterfaceError::Conflict { .. }));
        assert!(matches!(locked, InterfaceError::Conflict { .. }));
        assert_eq!(
            already.user_message(),
            "The request conflicts with the current workflow state."
        );
    }

    #[test]
    fn missing_records_map_to_not_found() {
        let interface = ApplicationError::from(WorkflowError::not_found("invoice", "inv-9"))
            .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::NotFound { .. }));
        assert_eq!(interface.user_message(), "The requested record does not exist.");
    }

    #[test]
    fn retry_exhaustion_is_a_server_fault() {
        let interface = ApplicationError::from(WorkflowError::RetryExhausted {
            operation: "invoice number generation",
            attempts: 5,
        })
        .into_interface("req-5");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }

    #[test]
    fn storage_failures_map_to_service_unavailable() {
        let interface = ApplicationError::from(WorkflowError::storage("database lock timeout"))
            .into_interface("req-6");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }
}
