//! Terrain error handling
//!
//! Configuration problems are fatal at construction time, capacity overflow is a
//! sizing contract violation reported per frame, and transient faults are logged
//! by the caller and never surface here.

use std::fmt;
use thiserror::Error;

/// Which append list a capacity error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppendList {
    CandidateNodes,
    FinalNodes,
    Patches,
    PatchBounds,
}

impl fmt::Display for AppendList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AppendList::CandidateNodes => "candidate node list",
            AppendList::FinalNodes => "final node list",
            AppendList::Patches => "culled patch list",
            AppendList::PatchBounds => "patch bounds list",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum TerrainError {
    #[error("Invalid terrain configuration: {0}")]
    InvalidConfig(String),

    #[error("{input} has {actual} mip levels, expected {expected}")]
    MipLevelMismatch {
        input: &'static str,
        expected: u32,
        actual: u32,
    },

    #[error("{input} level {level} is {actual_width}x{actual_height}, expected {expected_width}x{expected_height}")]
    InputSizeMismatch {
        input: &'static str,
        level: u32,
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("{list} overflowed: {required} entries appended, capacity is {capacity}")]
    CapacityOverflow {
        list: AppendList,
        capacity: u32,
        required: u32,
    },

    #[error("Missing GPU capability: {0}")]
    MissingCapability(String),

    #[error("Shader '{shader}' failed validation: {message}")]
    ShaderValidation { shader: String, message: String },

    #[error("Failed to load terrain asset {path}: {message}")]
    AssetLoad { path: String, message: String },

    #[error("GPU readback failed: {0}")]
    Readback(String),

    #[error("{component}: {error}")]
    SystemError { component: String, error: String },

    #[error("Failed to parse terrain configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate
pub type TerrainResult<T> = Result<T, TerrainError>;

/// Attach a component context to foreign errors
pub trait TerrainErrorContext<T> {
    fn terrain_context(self, context: &str) -> TerrainResult<T>;
}

impl<T, E> TerrainErrorContext<T> for Result<T, E>
where
    E: fmt::Display,
{
    fn terrain_context(self, context: &str) -> TerrainResult<T> {
        self.map_err(|e| TerrainError::SystemError {
            component: context.to_string(),
            error: e.to_string(),
        })
    }
}

impl<T> TerrainErrorContext<T> for Option<T> {
    fn terrain_context(self, context: &str) -> TerrainResult<T> {
        self.ok_or_else(|| TerrainError::SystemError {
            component: context.to_string(),
            error: "value not present".to_string(),
        })
    }
}

/// Create an asset loading error
pub fn asset_error(path: impl fmt::Display, error: impl fmt::Display) -> TerrainError {
    TerrainError::AssetLoad {
        path: path.to_string(),
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_overflow_names_the_list() {
        let err = TerrainError::CapacityOverflow {
            list: AppendList::CandidateNodes,
            capacity: 50,
            required: 64,
        };
        assert_eq!(
            err.to_string(),
            "candidate node list overflowed: 64 entries appended, capacity is 50"
        );
    }

    #[test]
    fn context_wraps_display_errors() {
        let result: Result<(), String> = Err("boom".to_string());
        let err = result.terrain_context("hiz").unwrap_err();
        assert_eq!(err.to_string(), "hiz: boom");
    }
}
