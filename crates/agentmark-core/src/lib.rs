//! AgentMark Core Library
//!
//! This crate provides the compiler front end for AgentMark:
//! - Surface normalization and tree parsing of `.amk` documents
//! - The typed IR of projects and agents
//! - Multi-rule validation with stable diagnostic codes
//! - Document sources over the filesystem or memory
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────┐   ┌───────────┐   ┌────────────┐
//! │ Normalizer │──▶│  Parser  │──▶│   Model   │──▶│ Validator  │──▶ codegen
//! │ (free text)│   │  (tree)  │   │ (IR build)│   │ (rules 1-8)│
//! └────────────┘   └──────────┘   └───────────┘   └────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use agentmark_core::{FsProject, analyze};
//!
//! let project = FsProject::open("./my-agents")?;
//! let analysis = analyze(&project, &project)?;
//! for diagnostic in analysis.report.errors() {
//!     eprintln!("{}", diagnostic);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod diagnostic;
pub mod error;
pub mod graph;
pub mod ir;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod source;
pub mod tree;
pub mod validate;

pub use diagnostic::{Category, Code, Diagnostic, Position, Severity, ValidationReport};
pub use error::{Error, Result};
pub use graph::AgentGraph;
pub use ir::{Agent, Edge, Project};
pub use pipeline::{Analysis, analyze};
pub use source::{DocumentSource, FsProject, MemoryProject, ScriptResolver};
pub use validate::{ValidatedAgent, Validator};
