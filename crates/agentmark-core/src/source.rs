//! Document sources and script resolution
//!
//! The compiler reads documents through [`DocumentSource`] and checks
//! script paths through [`ScriptResolver`]. [`FsProject`] implements both
//! over a project directory:
//!
//! ```text
//! <root>/
//! ├── agents/
//! │   ├── _project.amk     project document
//! │   └── *.amk            agent documents (sorted by file name)
//! └── tools/               scripts referenced by path
//! ```
//!
//! [`MemoryProject`] implements both in memory.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Directory holding the documents
pub const AGENTS_DIR: &str = "agents";

/// Directory holding scripts
pub const TOOLS_DIR: &str = "tools";

/// File name of the project document
pub const PROJECT_FILE: &str = "_project.amk";

/// File extension of documents
pub const DOCUMENT_EXTENSION: &str = "amk";

/// One input document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Stable id used in findings (e.g. `agents/support.amk`)
    pub id: String,
    /// Raw text
    pub text: String,
}

impl Document {
    /// Create a document
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }

    /// File stem of the id (`agents/support.amk` → `support`)
    pub fn stem(&self) -> &str {
        let file = self.id.rsplit('/').next().unwrap_or(&self.id);
        file.strip_suffix(".amk").unwrap_or(file)
    }
}

/// Supplies the documents of one project
pub trait DocumentSource {
    /// The project document, if present
    fn project_document(&self) -> Result<Option<Document>>;

    /// Agent documents in enumeration order
    fn agent_documents(&self) -> Result<Vec<Document>>;
}

/// Answers whether a script path exists
pub trait ScriptResolver {
    /// Whether `path` (relative to the tools directory) names an existing script
    fn script_exists(&self, path: &str) -> bool;
}

/// A project directory on disk
#[derive(Debug, Clone)]
pub struct FsProject {
    root: PathBuf,
}

impl FsProject {
    /// Open a project rooted at `root`
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(Error::ProjectNotFound {
                path: root.display().to_string(),
            });
        }
        if !root.join(AGENTS_DIR).is_dir() {
            return Err(Error::AgentsDirNotFound {
                path: root.display().to_string(),
            });
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Project root
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read(&self, path: &Path) -> Result<Document> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::ReadDocument {
            path: path.display().to_string(),
            source,
        })?;
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let id = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        Ok(Document::new(id, text))
    }
}

impl DocumentSource for FsProject {
    fn project_document(&self) -> Result<Option<Document>> {
        let path = self.root.join(AGENTS_DIR).join(PROJECT_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        self.read(&path).map(Some)
    }

    fn agent_documents(&self) -> Result<Vec<Document>> {
        let mut paths = Vec::new();
        for entry in WalkDir::new(self.root.join(AGENTS_DIR))
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry?;
            let path = entry.path();
            let is_document = entry.file_type().is_file()
                && path.extension().is_some_and(|e| e == DOCUMENT_EXTENSION)
                && entry.file_name() != PROJECT_FILE;
            if is_document {
                paths.push(path.to_path_buf());
            }
        }
        tracing::debug!(count = paths.len(), "Enumerated agent documents");
        paths.iter().map(|p| self.read(p)).collect()
    }
}

impl ScriptResolver for FsProject {
    fn script_exists(&self, path: &str) -> bool {
        self.root.join(TOOLS_DIR).join(path).is_file()
    }
}

/// An in-memory project
#[derive(Debug, Clone, Default)]
pub struct MemoryProject {
    project: Option<Document>,
    agents: Vec<Document>,
    scripts: BTreeSet<String>,
}

impl MemoryProject {
    /// Create an empty project
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the project document
    pub fn with_project(mut self, text: impl Into<String>) -> Self {
        self.project = Some(Document::new(
            format!("{}/{}", AGENTS_DIR, PROJECT_FILE),
            text,
        ));
        self
    }

    /// Add an agent document named `<name>.amk`
    pub fn with_agent(mut self, name: &str, text: impl Into<String>) -> Self {
        self.agents.push(Document::new(
            format!("{}/{}.{}", AGENTS_DIR, name, DOCUMENT_EXTENSION),
            text,
        ));
        self
    }

    /// Register an existing script path
    pub fn with_script(mut self, path: impl Into<String>) -> Self {
        self.scripts.insert(path.into());
        self
    }
}

impl DocumentSource for MemoryProject {
    fn project_document(&self) -> Result<Option<Document>> {
        Ok(self.project.clone())
    }

    fn agent_documents(&self) -> Result<Vec<Document>> {
        Ok(self.agents.clone())
    }
}

impl ScriptResolver for MemoryProject {
    fn script_exists(&self, path: &str) -> bool {
        self.scripts.contains(path)
    }
}
