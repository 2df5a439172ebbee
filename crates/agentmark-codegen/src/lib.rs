//! AgentMark Code Generation
//!
//! This crate turns a validated project into a deployable Python service:
//! one LangGraph module per agent plus a FastAPI entry point.
//!
//! # Pipeline Overview
//!
//! ```text
//! ┌──────────┐     ┌───────────┐     ┌─────────────────┐     ┌───────────┐
//! │ Analysis │────▶│  Compiler │────▶│ ModuleGenerator │────▶│ compiled_ │
//! │  (core)  │     │ (gate on  │     │  (per agent)    │     │ <agent>.py│
//! └──────────┘     │  findings)│     └─────────────────┘     └───────────┘
//!                  │           │     ┌─────────────────┐     ┌───────────┐
//!                  │           │────▶│ ServiceAssembler│────▶│ main.py,  │
//!                  └───────────┘     │   (minijinja)   │     │ reqs, env │
//!                                    └─────────────────┘     └───────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use agentmark_codegen::{Compilation, CompileOptions, Compiler};
//! use agentmark_core::FsProject;
//!
//! let project = FsProject::open("./my-agents")?;
//! match Compiler::new(CompileOptions::default()).compile_project(&project, &project)? {
//!     Compilation::Built(output) => println!("{} files", output.artifacts.len()),
//!     Compilation::Rejected(report) => eprintln!("{}", report.summary()),
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assembler;
pub mod compiler;
pub mod error;
pub mod generator;
pub mod python;

pub use compiler::{Artifact, BuildOutput, Compilation, CompileOptions, Compiler};
pub use error::{Error, Result};
