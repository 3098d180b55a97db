//! Discovery processing errors.
//!
//! The `Display` text of these variants is what ends up in the rule's
//! persisted `error` field, so the wording is part of the external contract.

use thiserror::Error;

/// Errors that can occur while loading or applying a discovery rule.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The rule is not present in the configuration cache.
    #[error("Invalid discovery rule ID [{0}].")]
    RuleMissing(u64),

    /// A filter condition referenced a named expression set that does not
    /// exist in the registry.
    #[error("Global regular expression \"{0}\" does not exist.")]
    UnknownNamedExpression(String),

    /// A macro-path expression failed validation.
    #[error("Cannot process LLD macro \"{macro_name}\": {message}.")]
    BadMacroPath { macro_name: String, message: String },

    /// The payload is not a JSON array (nor an object at all).
    #[error("Value should be a JSON array.")]
    PayloadNotArray,

    /// The payload is an object without the legacy "data" array.
    #[error("Cannot find the \"data\" array in the received JSON object.")]
    MissingDataArray,
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, DiscoveryError>;
