//! CLI command implementations

pub mod build;
pub mod init;
pub mod validate;

use agentmark_core::ValidationReport;

/// How a command finished when it did not fail outright
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Everything passed
    Success,
    /// The project has findings that block generation
    Invalid,
}

/// Exit code for a failed command: 3 for compiler defects, 2 otherwise
pub fn exit_code(err: &anyhow::Error) -> u8 {
    let internal = err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<agentmark_codegen::Error>(),
            Some(agentmark_codegen::Error::Internal { .. })
                | Some(agentmark_codegen::Error::InvalidTemplate(_))
        )
    });
    if internal { 3 } else { 2 }
}

/// Print every finding to stderr, in report order
pub(crate) fn print_report(report: &ValidationReport) {
    for diagnostic in &report.diagnostics {
        eprintln!("{}\n", diagnostic);
    }
}
