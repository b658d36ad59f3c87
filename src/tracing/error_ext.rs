//! Error tracing extensions
//!
//! Logs tool host errors together with their code, classification and
//! source chain.

use crate::types::ToolError;
use std::error::Error as StdError;

/// Extension trait for adding tracing context to errors
pub trait ErrorTraceExt {
    /// Log error with full context including error code, retryable status, and error chain
    fn trace_error(&self) -> &Self;
}

impl ErrorTraceExt for ToolError {
    fn trace_error(&self) -> &Self {
        let error_code = self.error_code();

        let mut error_chain = Vec::new();
        let mut current_source = self.source();
        while let Some(source) = current_source {
            error_chain.push(source.to_string());
            current_source = source.source();
        }

        if self.is_client_error() {
            tracing::warn!(
                error = %self,
                error_code = error_code.code(),
                error_code_name = ?error_code,
                error_chain = ?error_chain,
                "Rejected tool invocation"
            );
        } else {
            tracing::error!(
                error = %self,
                error_code = error_code.code(),
                error_code_name = ?error_code,
                is_retryable = self.is_retryable(),
                error_chain_len = error_chain.len(),
                error_chain = ?error_chain,
                "Tool invocation failed"
            );
        }

        self
    }
}
