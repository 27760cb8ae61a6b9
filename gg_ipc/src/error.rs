// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The public IPC error taxonomy and its mapping from bus error codes.

use log::*;

use gg_lib::GgError;

/// Errors a component can observe on an IPC operation. Each maps 1:1 to a
/// symbolic string and a fully-qualified service model type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcErrorCode {
    ServiceError,
    ResourceNotFoundError,
    InvalidArgumentsError,
    ComponentNotFoundError,
    UnauthorizedError,
    ConflictError,
    FailedUpdateConditionCheckError,
    InvalidTokenError,
    InvalidRecipeDirectoryPathError,
    InvalidArtifactsDirectoryPathError,
}

impl IpcErrorCode {
    /// Short symbolic name.
    pub fn err_str(self) -> &'static str {
        match self {
            Self::ServiceError => "ServiceError",
            Self::ResourceNotFoundError => "ResourceNotFoundError",
            Self::InvalidArgumentsError => "InvalidArgumentsError",
            Self::ComponentNotFoundError => "ComponentNotFoundError",
            Self::UnauthorizedError => "UnauthorizedError",
            Self::ConflictError => "ConflictError",
            Self::FailedUpdateConditionCheckError => "FailedUpdateConditionCheckError",
            Self::InvalidTokenError => "InvalidTokenError",
            Self::InvalidRecipeDirectoryPathError => "InvalidRecipeDirectoryPathError",
            Self::InvalidArtifactsDirectoryPathError => "InvalidArtifactsDirectoryPathError",
        }
    }

    /// Fully-qualified service model type.
    pub fn service_model_type(self) -> &'static str {
        match self {
            Self::ServiceError => "aws.greengrass#ServiceError",
            Self::ResourceNotFoundError => "aws.greengrass#ResourceNotFoundError",
            Self::InvalidArgumentsError => "aws.greengrass#InvalidArgumentsError",
            Self::ComponentNotFoundError => "aws.greengrass#ComponentNotFoundError",
            Self::UnauthorizedError => "aws.greengrass#UnauthorizedError",
            Self::ConflictError => "aws.greengrass#ConflictError",
            Self::FailedUpdateConditionCheckError => {
                "aws.greengrass#FailedUpdateConditionCheckError"
            }
            Self::InvalidTokenError => "aws.greengrass#InvalidTokenError",
            Self::InvalidRecipeDirectoryPathError => {
                "aws.greengrass#InvalidRecipeDirectoryPathError"
            }
            Self::InvalidArtifactsDirectoryPathError => {
                "aws.greengrass#InvalidArtifactsDirectoryPathError"
            }
        }
    }

    /// Parse a symbolic name. Unknown names degrade to `ServiceError`.
    pub fn from_err_str(code: &[u8]) -> IpcErrorCode {
        match code {
            b"ServiceError" => Self::ServiceError,
            b"ResourceNotFoundError" => Self::ResourceNotFoundError,
            b"InvalidArgumentsError" => Self::InvalidArgumentsError,
            b"ComponentNotFoundError" => Self::ComponentNotFoundError,
            b"UnauthorizedError" => Self::UnauthorizedError,
            b"ConflictError" => Self::ConflictError,
            b"FailedUpdateConditionCheckError" => Self::FailedUpdateConditionCheckError,
            b"InvalidTokenError" => Self::InvalidTokenError,
            b"InvalidRecipeDirectoryPathError" => Self::InvalidRecipeDirectoryPathError,
            b"InvalidArtifactsDirectoryPathError" => Self::InvalidArtifactsDirectoryPathError,
            _ => {
                warn!("unknown error code {}", String::from_utf8_lossy(code));
                Self::ServiceError
            }
        }
    }

    /// Translate a bus error into the public taxonomy.
    pub fn from_gg(err: GgError) -> IpcErrorCode {
        match err {
            GgError::NoEntry => Self::ResourceNotFoundError,
            GgError::Invalid | GgError::Parse | GgError::Range => Self::InvalidArgumentsError,
            _ => Self::ServiceError,
        }
    }
}

impl std::fmt::Display for IpcErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.err_str())
    }
}

impl std::error::Error for IpcErrorCode {}
