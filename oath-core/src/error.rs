#![forbid(unsafe_code)]

use oath_ast::Span;

use miette::Diagnostic;
use thiserror::Error;

/// The single user-facing failure of a compilation. The message carries
/// the error kind; the span labels the offending source range.
#[derive(Clone, Debug, Error, Diagnostic)]
#[error("compiler error: {message}")]
#[diagnostic(code(oath::compile))]
pub struct CompilerError {
    pub message: String,
    #[label]
    pub span: Span,
}

impl CompilerError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        CompilerError {
            message: message.into(),
            span,
        }
    }
}
