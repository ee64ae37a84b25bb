// Graph storage and schema

pub mod schema;
pub mod db;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Node kinds of the repository graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Repository,
    Module,
    Class,
    Function,
    Method,
    Attribute,
    Global,
    /// Placeholder for a base class or import target outside the repository
    External,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Repository => "repository",
            NodeKind::Module => "module",
            NodeKind::Class => "class",
            NodeKind::Function => "function",
            NodeKind::Method => "method",
            NodeKind::Attribute => "attribute",
            NodeKind::Global => "global",
            NodeKind::External => "external",
        }
    }

    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "repository" => Ok(NodeKind::Repository),
            "module" => Ok(NodeKind::Module),
            "class" => Ok(NodeKind::Class),
            "function" => Ok(NodeKind::Function),
            "method" => Ok(NodeKind::Method),
            "attribute" => Ok(NodeKind::Attribute),
            "global" => Ok(NodeKind::Global),
            "external" => Ok(NodeKind::External),
            _ => anyhow::bail!("Unknown node kind: {}", s),
        }
    }
}

/// Edge kinds of the repository graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Contains,
    Defines,
    HasMethod,
    HasAttribute,
    Inherits,
    Imports,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Contains => "contains",
            EdgeKind::Defines => "defines",
            EdgeKind::HasMethod => "has_method",
            EdgeKind::HasAttribute => "has_attribute",
            EdgeKind::Inherits => "inherits",
            EdgeKind::Imports => "imports",
        }
    }

    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "contains" => Ok(EdgeKind::Contains),
            "defines" => Ok(EdgeKind::Defines),
            "has_method" => Ok(EdgeKind::HasMethod),
            "has_attribute" => Ok(EdgeKind::HasAttribute),
            "inherits" => Ok(EdgeKind::Inherits),
            "imports" => Ok(EdgeKind::Imports),
            _ => anyhow::bail!("Unknown edge kind: {}", s),
        }
    }
}

/// A node of one repository's graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub repository: String,
    pub kind: NodeKind,
    pub name: String,
    pub qualified_name: String,
    pub file: Option<String>,
    pub line: u32,
    pub column: u32,
    /// Kind-specific attributes (parameters, bases, type hints...)
    pub metadata: serde_json::Value,
}

impl GraphNode {
    pub fn id_for(repository: &str, kind: NodeKind, qualified_name: &str) -> String {
        format!("{}|{}|{}", repository, kind.as_str(), qualified_name)
    }
}

/// A directed edge of one repository's graph. `ordinal` keeps source order,
/// which matters for base classes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub repository: String,
    pub from_id: String,
    pub to_id: String,
    pub kind: EdgeKind,
    pub ordinal: u32,
    pub metadata: serde_json::Value,
}

/// Repository row: namespace key plus ingestion bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub id: String,
    pub revision: Option<String>,
    pub fingerprint: String,
    pub modules_parsed: usize,
    pub modules_failed: usize,
    pub modules_skipped: usize,
    pub ingested_at: i64,
}

/// Syntax failure recorded for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedFileRecord {
    pub path: String,
    pub line: u32,
    pub column: u32,
    pub message: String,
}

/// A complete, staged repository subtree ready to be swapped in
#[derive(Debug, Clone)]
pub struct RepositoryGraph {
    pub record: RepositoryRecord,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub failed: Vec<FailedFileRecord>,
}

/// Sorted dump of a repository's nodes and edges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// How a lookup matches names
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameMatch<'a> {
    /// Exact fully-qualified name
    Qualified(&'a str),
    /// Exact short name
    Simple(&'a str),
    /// Qualified name equal to or ending with `.<suffix>`
    Suffix(&'a str),
    /// Qualified name containing the dotted path as whole segments
    /// (namespace packages without an `__init__` module)
    Segment(&'a str),
}

/// Storage backend for repository graphs
pub trait GraphStore: Send + Sync {
    /// Atomically replace a repository's subtree with a staged graph
    fn replace_repository(&self, graph: &RepositoryGraph) -> anyhow::Result<()>;

    /// Delete a repository and all of its nodes and edges
    fn remove_repository(&self, repository: &str) -> anyhow::Result<bool>;

    fn repository(&self, repository: &str) -> anyhow::Result<Option<RepositoryRecord>>;

    fn repositories(&self) -> anyhow::Result<Vec<RepositoryRecord>>;

    /// Point lookup scoped to a set of repositories
    fn find_nodes(
        &self,
        repositories: &[String],
        kind: NodeKind,
        name: NameMatch<'_>,
    ) -> anyhow::Result<Vec<GraphNode>>;

    fn node(&self, id: &str) -> anyhow::Result<Option<GraphNode>>;

    /// Targets of outgoing edges of one kind, in ordinal order
    fn targets(&self, from_id: &str, kind: EdgeKind) -> anyhow::Result<Vec<GraphNode>>;

    /// Sources of incoming edges of one kind
    fn sources(&self, to_id: &str, kind: EdgeKind) -> anyhow::Result<Vec<GraphNode>>;

    /// Outgoing edges of one kind, in ordinal order
    fn edges_from(&self, from_id: &str, kind: EdgeKind) -> anyhow::Result<Vec<GraphEdge>>;

    /// Import edges whose imported symbol or origin ends with `name`
    fn imports_of(&self, repositories: &[String], name: &str) -> anyhow::Result<Vec<GraphEdge>>;

    fn failed_files(&self, repository: &str) -> anyhow::Result<Vec<FailedFileRecord>>;

    fn snapshot(&self, repository: &str) -> anyhow::Result<GraphSnapshot>;

    /// A store whose reads all observe one committed snapshot
    fn read_view(&self) -> anyhow::Result<Arc<dyn GraphStore>>;
}
