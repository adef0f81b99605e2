//! Error types: backend failures and the driver's domain error taxonomy.

use http::StatusCode;
use std::fmt;
use thiserror::Error;

/// Error codes reported by the Blob service, plus a few raised client-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // General errors
    AuthenticationFailed,
    AuthorizationFailure,
    AuthorizationPermissionMismatch,
    AuthorizationResourceTypeMismatch,
    ConditionNotMet,
    InternalError,
    InvalidAuthenticationInfo,
    InvalidHeaderValue,
    InvalidInput,
    InvalidQueryParameterValue,
    InvalidResourceName,
    InvalidUri,
    InvalidXmlDocument,
    MissingRequiredHeader,
    OperationTimedOut,
    RequestBodyTooLarge,
    ResourceAlreadyExists,
    ResourceNotFound,
    ServerBusy,

    // Blob-specific errors
    BlobAlreadyExists,
    BlobNotFound,
    CannotVerifyCopySource,
    ContainerAlreadyExists,
    ContainerBeingDeleted,
    ContainerNotFound,
    InvalidBlockId,
    InvalidBlockList,
    InvalidSourceBlobUrl,
    LeaseIdMissing,

    // Client-side errors
    TransportFailure,
    InvalidResponse,
    CredentialUnavailable,
    Unrecognized,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AuthenticationFailed => "AuthenticationFailed",
            ErrorCode::AuthorizationFailure => "AuthorizationFailure",
            ErrorCode::AuthorizationPermissionMismatch => "AuthorizationPermissionMismatch",
            ErrorCode::AuthorizationResourceTypeMismatch => "AuthorizationResourceTypeMismatch",
            ErrorCode::ConditionNotMet => "ConditionNotMet",
            ErrorCode::InternalError => "InternalError",
            ErrorCode::InvalidAuthenticationInfo => "InvalidAuthenticationInfo",
            ErrorCode::InvalidHeaderValue => "InvalidHeaderValue",
            ErrorCode::InvalidInput => "InvalidInput",
            ErrorCode::InvalidQueryParameterValue => "InvalidQueryParameterValue",
            ErrorCode::InvalidResourceName => "InvalidResourceName",
            ErrorCode::InvalidUri => "InvalidUri",
            ErrorCode::InvalidXmlDocument => "InvalidXmlDocument",
            ErrorCode::MissingRequiredHeader => "MissingRequiredHeader",
            ErrorCode::OperationTimedOut => "OperationTimedOut",
            ErrorCode::RequestBodyTooLarge => "RequestBodyTooLarge",
            ErrorCode::ResourceAlreadyExists => "ResourceAlreadyExists",
            ErrorCode::ResourceNotFound => "ResourceNotFound",
            ErrorCode::ServerBusy => "ServerBusy",
            ErrorCode::BlobAlreadyExists => "BlobAlreadyExists",
            ErrorCode::BlobNotFound => "BlobNotFound",
            ErrorCode::CannotVerifyCopySource => "CannotVerifyCopySource",
            ErrorCode::ContainerAlreadyExists => "ContainerAlreadyExists",
            ErrorCode::ContainerBeingDeleted => "ContainerBeingDeleted",
            ErrorCode::ContainerNotFound => "ContainerNotFound",
            ErrorCode::InvalidBlockId => "InvalidBlockId",
            ErrorCode::InvalidBlockList => "InvalidBlockList",
            ErrorCode::InvalidSourceBlobUrl => "InvalidSourceBlobUrl",
            ErrorCode::LeaseIdMissing => "LeaseIdMissing",
            ErrorCode::TransportFailure => "TransportFailure",
            ErrorCode::InvalidResponse => "InvalidResponse",
            ErrorCode::CredentialUnavailable => "CredentialUnavailable",
            ErrorCode::Unrecognized => "Unrecognized",
        }
    }

    /// Parses a service error code. Client-side codes are never parsed.
    pub fn from_str(s: &str) -> Option<Self> {
        let code = match s {
            "AuthenticationFailed" => ErrorCode::AuthenticationFailed,
            "AuthorizationFailure" => ErrorCode::AuthorizationFailure,
            "AuthorizationPermissionMismatch" => ErrorCode::AuthorizationPermissionMismatch,
            "AuthorizationResourceTypeMismatch" => ErrorCode::AuthorizationResourceTypeMismatch,
            "ConditionNotMet" => ErrorCode::ConditionNotMet,
            "InternalError" => ErrorCode::InternalError,
            "InvalidAuthenticationInfo" => ErrorCode::InvalidAuthenticationInfo,
            "InvalidHeaderValue" => ErrorCode::InvalidHeaderValue,
            "InvalidInput" => ErrorCode::InvalidInput,
            "InvalidQueryParameterValue" => ErrorCode::InvalidQueryParameterValue,
            "InvalidResourceName" => ErrorCode::InvalidResourceName,
            "InvalidUri" => ErrorCode::InvalidUri,
            "InvalidXmlDocument" => ErrorCode::InvalidXmlDocument,
            "MissingRequiredHeader" => ErrorCode::MissingRequiredHeader,
            "OperationTimedOut" => ErrorCode::OperationTimedOut,
            "RequestBodyTooLarge" => ErrorCode::RequestBodyTooLarge,
            "ResourceAlreadyExists" => ErrorCode::ResourceAlreadyExists,
            "ResourceNotFound" => ErrorCode::ResourceNotFound,
            "ServerBusy" => ErrorCode::ServerBusy,
            "BlobAlreadyExists" => ErrorCode::BlobAlreadyExists,
            "BlobNotFound" => ErrorCode::BlobNotFound,
            "CannotVerifyCopySource" => ErrorCode::CannotVerifyCopySource,
            "ContainerAlreadyExists" => ErrorCode::ContainerAlreadyExists,
            "ContainerBeingDeleted" => ErrorCode::ContainerBeingDeleted,
            "ContainerNotFound" => ErrorCode::ContainerNotFound,
            "InvalidBlockId" => ErrorCode::InvalidBlockId,
            "InvalidBlockList" => ErrorCode::InvalidBlockList,
            "InvalidSourceBlobUrl" => ErrorCode::InvalidSourceBlobUrl,
            "LeaseIdMissing" => ErrorCode::LeaseIdMissing,
            _ => return None,
        };
        Some(code)
    }

    /// Best-effort code for a response that carried no error code (HEAD).
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::NOT_FOUND => ErrorCode::ResourceNotFound,
            StatusCode::CONFLICT => ErrorCode::ResourceAlreadyExists,
            StatusCode::UNAUTHORIZED => ErrorCode::AuthenticationFailed,
            StatusCode::FORBIDDEN => ErrorCode::AuthorizationFailure,
            StatusCode::PRECONDITION_FAILED => ErrorCode::ConditionNotMet,
            StatusCode::SERVICE_UNAVAILABLE => ErrorCode::ServerBusy,
            StatusCode::INTERNAL_SERVER_ERROR => ErrorCode::InternalError,
            _ => ErrorCode::Unrecognized,
        }
    }

    /// Returns the HTTP status code the service uses for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidHeaderValue
            | ErrorCode::InvalidInput
            | ErrorCode::InvalidQueryParameterValue
            | ErrorCode::InvalidResourceName
            | ErrorCode::InvalidUri
            | ErrorCode::InvalidXmlDocument
            | ErrorCode::MissingRequiredHeader
            | ErrorCode::RequestBodyTooLarge
            | ErrorCode::InvalidBlockId
            | ErrorCode::InvalidBlockList
            | ErrorCode::InvalidSourceBlobUrl => StatusCode::BAD_REQUEST,

            ErrorCode::InvalidAuthenticationInfo => StatusCode::UNAUTHORIZED,

            ErrorCode::AuthenticationFailed
            | ErrorCode::AuthorizationFailure
            | ErrorCode::AuthorizationPermissionMismatch
            | ErrorCode::AuthorizationResourceTypeMismatch
            | ErrorCode::CannotVerifyCopySource => StatusCode::FORBIDDEN,

            ErrorCode::BlobNotFound | ErrorCode::ContainerNotFound | ErrorCode::ResourceNotFound => {
                StatusCode::NOT_FOUND
            }

            ErrorCode::BlobAlreadyExists
            | ErrorCode::ContainerAlreadyExists
            | ErrorCode::ContainerBeingDeleted
            | ErrorCode::ResourceAlreadyExists => StatusCode::CONFLICT,

            ErrorCode::ConditionNotMet | ErrorCode::LeaseIdMissing => {
                StatusCode::PRECONDITION_FAILED
            }

            ErrorCode::ServerBusy => StatusCode::SERVICE_UNAVAILABLE,

            ErrorCode::InternalError
            | ErrorCode::OperationTimedOut
            | ErrorCode::TransportFailure
            | ErrorCode::InvalidResponse
            | ErrorCode::CredentialUnavailable
            | ErrorCode::Unrecognized => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::AuthenticationFailed => {
                "Server failed to authenticate the request. Make sure the value of the \
                 Authorization header is formed correctly including the signature."
            }
            ErrorCode::AuthorizationFailure => {
                "This request is not authorized to perform this operation."
            }
            ErrorCode::BlobNotFound => "The specified blob does not exist.",
            ErrorCode::ContainerAlreadyExists => "The specified container already exists.",
            ErrorCode::ContainerNotFound => "The specified container does not exist.",
            ErrorCode::CannotVerifyCopySource => "Could not verify the copy source within the specified time.",
            ErrorCode::InvalidBlockId => "The specified block ID is invalid.",
            ErrorCode::InvalidBlockList => "The specified block list is invalid.",
            ErrorCode::InvalidResourceName => "The specified resource name contains invalid characters.",
            ErrorCode::InvalidXmlDocument => "The XML request body is invalid.",
            ErrorCode::ResourceNotFound => "The specified resource does not exist.",
            ErrorCode::InternalError => "The server encountered an internal error. Please retry the request.",
            ErrorCode::CredentialUnavailable => "The configured credential cannot perform this operation.",
            _ => "An error occurred while processing the request.",
        }
    }

    /// True for the codes the service uses when the addressed resource is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ErrorCode::BlobNotFound | ErrorCode::ContainerNotFound | ErrorCode::ResourceNotFound
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single failed backend call.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct StorageError {
    pub code: ErrorCode,
    pub message: String,
    /// HTTP status, when the failure came from a service response.
    pub status: Option<StatusCode>,
    pub request_id: Option<String>,
}

impl StorageError {
    /// Creates a new storage error with the given code and default message.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            message: code.default_message().to_string(),
            code,
            status: None,
            request_id: None,
        }
    }

    /// Creates a new storage error with a custom message.
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status: None,
            request_id: None,
        }
    }

    /// Sets the HTTP status for this error.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the request ID for this error.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.code.is_not_found() || self.status == Some(StatusCode::NOT_FOUND)
    }

    /// Status reported by the service, or the one the code implies.
    pub fn status_code(&self) -> StatusCode {
        self.status.unwrap_or_else(|| self.code.status_code())
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        let code = if err.is_timeout() {
            ErrorCode::OperationTimedOut
        } else if err.is_decode() {
            ErrorCode::InvalidResponse
        } else {
            ErrorCode::TransportFailure
        };
        StorageError::with_message(code, err.to_string())
    }
}

/// Result type alias for backend calls.
pub type StorageResult<T> = Result<T, StorageError>;

/// The metadata-style operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataOperation {
    Exists,
    Stats,
    SignedUrl,
    Visibility,
    List,
}

impl MetadataOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataOperation::Exists => "exists",
            MetadataOperation::Stats => "stats",
            MetadataOperation::SignedUrl => "signedUrl",
            MetadataOperation::Visibility => "visibility",
            MetadataOperation::List => "list",
        }
    }
}

impl fmt::Display for MetadataOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain errors raised by drive operations.
///
/// Every variant names the location or container it was working on and keeps
/// the backend failure reachable through [`std::error::Error::source`].
#[derive(Debug, Error)]
pub enum DriveError {
    #[error("cannot read file at location \"{location}\"")]
    Read {
        location: String,
        #[source]
        cause: StorageError,
    },

    #[error("cannot write file at location \"{location}\"")]
    Write {
        location: String,
        #[source]
        cause: StorageError,
    },

    #[error("cannot delete file at location \"{location}\"")]
    Delete {
        location: String,
        #[source]
        cause: StorageError,
    },

    #[error("cannot copy file from \"{from}\" to \"{to}\"")]
    Copy {
        from: String,
        to: String,
        #[source]
        cause: StorageError,
    },

    /// `destination_written` is set when the copy landed but removing the
    /// source failed, so both blobs now exist.
    #[error("cannot move file from \"{from}\" to \"{to}\"")]
    Move {
        from: String,
        to: String,
        destination_written: bool,
        #[source]
        cause: StorageError,
    },

    #[error("unable to retrieve the \"{operation}\" for file at location \"{location}\": {reason}")]
    Metadata {
        location: String,
        operation: MetadataOperation,
        reason: String,
        #[source]
        cause: Option<StorageError>,
    },

    #[error("cannot create container \"{container}\"")]
    CannotCreateContainer {
        container: String,
        #[source]
        cause: StorageError,
    },

    #[error("cannot find container \"{container}\"")]
    CannotFindContainer {
        container: String,
        #[source]
        cause: StorageError,
    },

    #[error("cannot delete container \"{container}\"")]
    CannotDeleteContainer {
        container: String,
        #[source]
        cause: StorageError,
    },

    #[error("invalid drive configuration: {0}")]
    Config(String),

    #[error("no driver registered under \"{0}\"")]
    UnknownDriver(String),
}

impl DriveError {
    pub(crate) fn metadata(
        location: &str,
        operation: MetadataOperation,
        cause: StorageError,
    ) -> Self {
        DriveError::Metadata {
            location: location.to_string(),
            operation,
            reason: cause.message.clone(),
            cause: Some(cause),
        }
    }

    /// The backend failure behind this error, if there is one.
    pub fn cause(&self) -> Option<&StorageError> {
        match self {
            DriveError::Read { cause, .. }
            | DriveError::Write { cause, .. }
            | DriveError::Delete { cause, .. }
            | DriveError::Copy { cause, .. }
            | DriveError::Move { cause, .. }
            | DriveError::CannotCreateContainer { cause, .. }
            | DriveError::CannotFindContainer { cause, .. }
            | DriveError::CannotDeleteContainer { cause, .. } => Some(cause),
            DriveError::Metadata { cause, .. } => cause.as_ref(),
            DriveError::Config(_) | DriveError::UnknownDriver(_) => None,
        }
    }

    /// Unwraps to the backend cause, for nesting inside another domain error.
    pub(crate) fn into_cause(self) -> StorageError {
        match self {
            DriveError::Read { cause, .. }
            | DriveError::Write { cause, .. }
            | DriveError::Delete { cause, .. }
            | DriveError::Copy { cause, .. }
            | DriveError::Move { cause, .. }
            | DriveError::CannotCreateContainer { cause, .. }
            | DriveError::CannotFindContainer { cause, .. }
            | DriveError::CannotDeleteContainer { cause, .. } => cause,
            DriveError::Metadata { cause: Some(cause), .. } => cause,
            other => StorageError::with_message(ErrorCode::InternalError, other.to_string()),
        }
    }
}

/// Result type alias for drive operations.
pub type DriveResult<T> = Result<T, DriveError>;
