//! File constraint validation
//!
//! A download's size and name only become known while it runs, so the
//! monitor re-checks them whenever reconciliation sees either change. The
//! capacity check is a read-only probe: usage is accounted elsewhere when
//! the transfer job lands the file.

use crate::error::{MonitorError, Result, ValidationErrorKind};
use crate::protocol::Owner;
use async_trait::async_trait;

/// Characters a stored file name may not contain
const RESERVED_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Longest accepted file name in bytes
const MAX_NAME_LEN: usize = 255;

/// The file in progress, as seen by the validation hooks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    /// Owner the file will be accounted to
    pub owner: Owner,
    /// Declared size in bytes
    pub size: u64,
    /// Base name of the current primary path; empty while unknown
    pub name: String,
}

impl FileDescriptor {
    /// Lower-case extension without the dot
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_lowercase())
    }
}

/// Constraint checks run against a file in progress
#[async_trait]
pub trait FileValidator: Send + Sync {
    /// Name, extension and size rules
    async fn validate_file(&self, file: &FileDescriptor) -> Result<()>;

    /// Whether the owner could store the file, without reserving anything
    async fn validate_capacity_without_reserving(&self, file: &FileDescriptor) -> Result<()>;
}

/// Validator enforcing the owner's storage policy and quota
#[derive(Debug, Clone, Copy, Default)]
pub struct QuotaValidator;

impl QuotaValidator {
    pub fn new() -> Self {
        Self
    }

    fn check_name(name: &str) -> Result<()> {
        if name == "." || name == ".." || name.len() > MAX_NAME_LEN || name.contains(RESERVED_CHARS)
        {
            return Err(MonitorError::validation(
                ValidationErrorKind::InvalidName,
                format!("Invalid file name: {}", name),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl FileValidator for QuotaValidator {
    async fn validate_file(&self, file: &FileDescriptor) -> Result<()> {
        if !file.name.is_empty() {
            Self::check_name(&file.name)?;
        }

        let policy = &file.owner.policy;
        if policy.max_file_size > 0 && file.size > policy.max_file_size {
            return Err(MonitorError::validation(
                ValidationErrorKind::FileTooLarge,
                format!(
                    "File size {} exceeds the limit of {} bytes",
                    file.size, policy.max_file_size
                ),
            ));
        }

        if !file.name.is_empty() && !policy.allowed_extensions.is_empty() {
            let allowed = file
                .extension()
                .is_some_and(|ext| policy.allowed_extensions.iter().any(|a| *a == ext));
            if !allowed {
                return Err(MonitorError::validation(
                    ValidationErrorKind::ExtensionNotAllowed,
                    format!("File type of {} is not allowed", file.name),
                ));
            }
        }

        Ok(())
    }

    async fn validate_capacity_without_reserving(&self, file: &FileDescriptor) -> Result<()> {
        let remaining = file.owner.remaining_capacity();
        if remaining < file.size {
            return Err(MonitorError::validation(
                ValidationErrorKind::InsufficientCapacity,
                format!(
                    "Insufficient capacity: {} bytes needed, {} bytes left",
                    file.size, remaining
                ),
            ));
        }
        Ok(())
    }
}
