use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

use super::verdict::{ExecutionOutcome, OutcomeKind};

/// Longest type name accepted for `type_info`
pub const MAX_TYPE_NAME_LEN: usize = 64;

/// Request data rejected before any tool runs
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("Source code is empty")]
    EmptySource,
    #[error("Source code is too long ({len} bytes, limit is {max} bytes)")]
    TooLong { len: usize, max: usize },
    #[error("Invalid type name: {0:?}")]
    InvalidTypeName(String),
}

impl InputError {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            InputError::TooLong { .. } => OutcomeKind::TooLong,
            InputError::EmptySource | InputError::InvalidTypeName(_) => OutcomeKind::InvalidInput,
        }
    }
}

impl From<InputError> for ExecutionOutcome {
    fn from(err: InputError) -> Self {
        ExecutionOutcome::failure(err.kind(), format!("❌ {}", err))
    }
}

pub fn validate_source(source: &str, max_bytes: usize) -> Result<(), InputError> {
    if source.trim().is_empty() {
        return Err(InputError::EmptySource);
    }
    if source.len() > max_bytes {
        return Err(InputError::TooLong {
            len: source.len(),
            max: max_bytes,
        });
    }
    Ok(())
}

fn type_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_ ]*\**$").unwrap())
}

/// Type names are spliced into generated C, so only identifiers, spaces and
/// trailing pointer stars get through.
pub fn validate_type_name(name: &str) -> Result<String, InputError> {
    let name = name.trim();
    if name.is_empty() || name.len() > MAX_TYPE_NAME_LEN || !type_name_regex().is_match(name) {
        return Err(InputError::InvalidTypeName(name.to_string()));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_source() {
        assert_eq!(validate_source("   \n\t", 100), Err(InputError::EmptySource));
        assert_eq!(
            validate_source("int x;", 3),
            Err(InputError::TooLong { len: 6, max: 3 })
        );
        assert!(validate_source("int main(void) { return 0; }", 100).is_ok());
    }

    #[test]
    fn test_type_names() {
        assert_eq!(validate_type_name("int").unwrap(), "int");
        assert_eq!(validate_type_name(" unsigned long long ").unwrap(), "unsigned long long");
        assert_eq!(validate_type_name("char **").unwrap(), "char **");
        assert!(validate_type_name("struct point").is_ok());

        assert!(validate_type_name("").is_err());
        assert!(validate_type_name("int); system(\"rm\"").is_err());
        assert!(validate_type_name("1abc").is_err());
        assert!(validate_type_name("int*x").is_err());
        assert!(validate_type_name(&"a".repeat(MAX_TYPE_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_error_maps_to_outcome() {
        let outcome: ExecutionOutcome = InputError::TooLong { len: 10, max: 5 }.into();
        assert_eq!(outcome.kind, OutcomeKind::TooLong);
        assert!(!outcome.success);
        assert!(outcome.output.contains("limit is 5 bytes"));

        let outcome: ExecutionOutcome = InputError::EmptySource.into();
        assert_eq!(outcome.kind, OutcomeKind::InvalidInput);
    }
}
