//! Input and output bindings of activity nodes
//!
//! Literal and variable inputs are resolved by the engine itself. Expressions
//! are handed to an [`ExpressionEvaluator`]; the engine ships no expression
//! language of its own.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::workflow::memory::MemoryRegister;

/// Source text of an expression in some language
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    pub language: String,
    pub source: String,
}

/// Binding that produces an input value when an activity executes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Input {
    Literal { value: serde_json::Value },
    /// Read a memory register variable (null when unset)
    Variable { name: String },
    Expression(Expression),
}

impl Input {
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        Self::Literal {
            value: value.into(),
        }
    }

    pub fn variable(name: impl Into<String>) -> Self {
        Self::Variable { name: name.into() }
    }

    pub fn expression(language: impl Into<String>, source: impl Into<String>) -> Self {
        Self::Expression(Expression {
            language: language.into(),
            source: source.into(),
        })
    }

    /// Resolve the binding against the run's memory and input
    pub fn resolve(
        &self,
        evaluator: &dyn ExpressionEvaluator,
        memory: &MemoryRegister,
        input: &BTreeMap<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ExpressionError> {
        match self {
            Self::Literal { value } => Ok(value.clone()),
            Self::Variable { name } => Ok(memory.get(name).cloned().unwrap_or_default()),
            Self::Expression(expression) => evaluator.evaluate(expression, memory, input),
        }
    }
}

/// Binding naming the memory variable that receives an output value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub variable: String,
}

impl Output {
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
        }
    }
}

/// Error produced while evaluating an expression
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExpressionError {
    #[error("unsupported expression language: {0}")]
    UnsupportedLanguage(String),

    #[error("{language} expression failed: {message}")]
    Evaluation { language: String, message: String },
}

/// Evaluates expressions for activity inputs
pub trait ExpressionEvaluator: Send + Sync + 'static {
    fn evaluate(
        &self,
        expression: &Expression,
        memory: &MemoryRegister,
        input: &BTreeMap<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ExpressionError>;
}

/// Evaluator that rejects every expression
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExpressionEvaluator;

impl ExpressionEvaluator for NoExpressionEvaluator {
    fn evaluate(
        &self,
        expression: &Expression,
        _memory: &MemoryRegister,
        _input: &BTreeMap<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ExpressionError> {
        Err(ExpressionError::UnsupportedLanguage(
            expression.language.clone(),
        ))
    }
}
