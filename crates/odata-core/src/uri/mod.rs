//! URI grammar
//!
//! - `ast`: the resolved URI tree and its canonical re-serialisation
//! - `literal`: typed literal grammar shared with the expression parser
//! - `parser`: service-root stripping, resource path and key predicates
//! - `query`: query option splitting and per-option sub-parsers

pub mod ast;
pub mod literal;
pub mod parser;
pub mod query;

use thiserror::Error;

pub use ast::{
    ExpandItem, ExpandPath, KeyValue, Levels, ODataUri, OrderByItem, PathSegment, PathTarget, QueryOption,
    RelativeUri, ResourcePathUri, SelectItem, TargetKind,
};
pub use literal::Literal;
pub use parser::UriParser;

/// Parse failure, naming the offending fragment and, where known, its
/// byte position in the text being parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UriParseError {
    #[error("URI does not contain the service root (pattern '{pattern}')")]
    MissingServiceRoot { pattern: String },

    #[error("syntax error at position {position}: expected {expected}, found '{found}'")]
    Syntax {
        position: usize,
        expected: String,
        found: String,
    },

    #[error("unknown segment '{segment}' at position {position}")]
    UnknownSegment { segment: String, position: usize },

    #[error("segment '{segment}' is not valid here: {reason}")]
    InvalidSegment { segment: String, reason: String },

    #[error("'{property}' is not a property of {type_name}")]
    UnknownProperty { property: String, type_name: String },

    #[error("invalid key predicate for {entity_type}: {reason}")]
    InvalidKey { entity_type: String, reason: String },

    #[error("invalid literal '{literal}' for {target}: {reason}")]
    LiteralType {
        literal: String,
        target: String,
        reason: String,
    },

    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },

    #[error("function '{name}' expects {expected} argument(s), found {found}")]
    FunctionArity {
        name: String,
        expected: String,
        found: usize,
    },

    #[error("type mismatch at position {position}: {message}")]
    OperandType { position: usize, message: String },

    #[error("invalid value '{value}' for {option}: {reason}")]
    InvalidQueryOption {
        option: String,
        value: String,
        reason: String,
    },

    #[error("query option {option} is given more than once")]
    DuplicateQueryOption { option: String },

    #[error("invalid percent-encoding in '{fragment}'")]
    Encoding { fragment: String },

    /// Recognised but intentionally unsupported grammar.
    #[error("{construct} is not supported")]
    Unsupported { construct: String },
}

impl UriParseError {
    pub fn syntax(position: usize, expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::Syntax {
            position,
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub fn position(&self) -> Option<usize> {
        match self {
            Self::Syntax { position, .. }
            | Self::UnknownSegment { position, .. }
            | Self::OperandType { position, .. } => Some(*position),
            _ => None,
        }
    }

    /// The offending text, when the error has one.
    pub fn fragment(&self) -> Option<&str> {
        match self {
            Self::Syntax { found, .. } => Some(found),
            Self::UnknownSegment { segment, .. } | Self::InvalidSegment { segment, .. } => {
                Some(segment)
            }
            Self::UnknownProperty { property, .. } => Some(property),
            Self::LiteralType { literal, .. } => Some(literal),
            Self::UnknownFunction { name } | Self::FunctionArity { name, .. } => Some(name),
            Self::InvalidQueryOption { value, .. } => Some(value),
            Self::Encoding { fragment } => Some(fragment),
            _ => None,
        }
    }

    /// Error-payload target: the segment, property, function or option at fault.
    pub fn target(&self) -> Option<String> {
        match self {
            Self::UnknownSegment { segment, .. } | Self::InvalidSegment { segment, .. } => {
                Some(segment.clone())
            }
            Self::UnknownProperty { property, .. } => Some(property.clone()),
            Self::InvalidKey { entity_type, .. } => Some(entity_type.clone()),
            Self::LiteralType { target, .. } => Some(target.clone()),
            Self::UnknownFunction { name } | Self::FunctionArity { name, .. } => Some(name.clone()),
            Self::InvalidQueryOption { option, .. } | Self::DuplicateQueryOption { option } => {
                Some(option.clone())
            }
            Self::Syntax { found, .. } => Some(found.clone()),
            Self::Encoding { fragment } => Some(fragment.clone()),
            Self::Unsupported { construct } => Some(construct.clone()),
            Self::MissingServiceRoot { .. } | Self::OperandType { .. } => None,
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}
