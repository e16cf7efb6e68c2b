//! Service filter expressions.
//!
//! Selects services after they have been listed from the API server.
//!
//! # Supported Syntax
//!
//! ```text
//! expression ::= expression ("or" | "||") expression
//!              | expression ("and" | "&&") expression
//!              | ("not" | "!") expression
//!              | '(' expression ')'
//!              | "true" | "false"
//!              | operand [("==" | "=" | "!=") operand]
//!
//! operand    ::= field | string
//! field      ::= ["metadata."] ("name" | "namespace")
//!              | ["metadata."] ("labels" | "annotations") "[" string "]"
//!              | ["metadata."] ("labels" | "annotations") ".containsKey(" string ")"
//! string     ::= "'" chars "'" | '"' chars '"'
//! ```
//!
//! Keywords are case-insensitive. A missing label or annotation is equal
//! only to another missing value, so `labels['team'] != 'core'` selects
//! services without a `team` label.
//!
//! A bare operand counts as a boolean if it is the string `true` or `false`
//! (ignoring ASCII case). Any other bare value, or a missing one, makes the
//! result unknown rather than an error, and a service whose filter result is
//! unknown is excluded.
//!
//! # Example
//!
//! ```ignore
//! let filter = ServiceFilter::new("metadata.labels['team'] == 'core' and name != 'kubernetes'")?;
//! let names: Vec<_> = services.iter().filter(|s| filter.matches(s)).collect();
//! ```

mod evaluator;
mod parser;

pub use parser::{Expression, Field, Operand, Operator, parse_expression};

use std::fmt;
use std::str::FromStr;

use k8s_openapi::api::core::v1::Service;
use thiserror::Error;

/// A compiled service filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceFilter {
    expression_str: String,
    expression: Expression,
}

impl ServiceFilter {
    /// Compiles a filter expression.
    ///
    /// # Errors
    ///
    /// Returns a [`FilterError`] if the expression is blank or malformed.
    pub fn new(expression: &str) -> Result<Self, FilterError> {
        let parsed = parse_expression(expression)?;
        Ok(Self {
            expression_str: expression.to_string(),
            expression: parsed,
        })
    }

    /// The source text of the filter.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression_str
    }

    /// Evaluates the filter, keeping an unknown outcome as `None`.
    #[must_use]
    pub fn evaluate(&self, service: &Service) -> Option<bool> {
        evaluator::evaluate(&self.expression, &service.metadata)
    }

    /// Returns `true` if the service is selected. Unknown counts as not selected.
    #[must_use]
    pub fn matches(&self, service: &Service) -> bool {
        self.evaluate(service).unwrap_or(false)
    }
}

impl FromStr for ServiceFilter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for ServiceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression_str)
    }
}

/// Errors that can occur while compiling a filter expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    /// The expression is empty or only whitespace.
    #[error("empty filter expression")]
    EmptyExpression,

    /// The expression is malformed.
    #[error("{message} at position {position}")]
    Parse {
        /// Byte offset of the offending token.
        position: usize,
        /// What went wrong.
        message: String,
    },
}
