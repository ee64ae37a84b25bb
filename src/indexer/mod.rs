// Repository extraction and graph ingestion

pub mod model;
pub mod parser;
pub mod writer;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{Config, ExtractionConfig};
use crate::error::{HalgraphError, HalgraphResult};
use crate::index::{GraphStore, RepositoryRecord};
use model::{FailedFile, ModuleModel, RepositoryModel, SkippedFile};
use parser::{ExtractionFailure, PythonParser};

/// A language front-end turning one file into a module model
pub trait SourceParser: Send + Sync {
    fn can_parse(&self, file_path: &str) -> bool;

    fn extract(&self, file_path: &str, content: &str) -> Result<ModuleModel, ExtractionFailure>;
}

/// One input file of a repository, as supplied by the acquisition layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Path relative to the repository root
    pub path: String,
    pub content: String,
    /// Why the content could not be obtained; such files are recorded as failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unreadable: Option<String>,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            unreadable: None,
        }
    }

    /// A file whose content could not be read
    pub fn unreadable(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: String::new(),
            unreadable: Some(reason.into()),
        }
    }

    /// Decode raw file bytes; invalid UTF-8 makes the file unreadable
    pub fn from_bytes(path: impl Into<String>, bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(content) => Self::new(path, content),
            Err(e) => Self::unreadable(
                path,
                format!("invalid UTF-8 at byte {}", e.utf8_error().valid_up_to()),
            ),
        }
    }
}

/// Outcome of one repository ingestion. Every input file appears in exactly
/// one of parsed, failed or skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionSummary {
    pub repository: String,
    pub revision: Option<String>,
    pub modules_parsed: usize,
    pub modules_failed: Vec<String>,
    pub modules_skipped: Vec<String>,
    pub classes: usize,
    pub methods: usize,
    pub functions: usize,
    pub attributes: usize,
    pub imports: usize,
}

impl IngestionSummary {
    pub fn files_seen(&self) -> usize {
        self.modules_parsed + self.modules_failed.len() + self.modules_skipped.len()
    }
}

enum FileOutcome {
    Parsed(ModuleModel),
    Failed(FailedFile),
    Skipped(SkippedFile),
}

/// The main indexer that coordinates extraction and graph writes
pub struct Indexer {
    parsers: Vec<Box<dyn SourceParser>>,
    store: Arc<dyn GraphStore>,
    extraction: ExtractionConfig,
    threads: usize,
    /// Serializes writes of the same repository
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Indexer {
    pub fn new(store: Arc<dyn GraphStore>, config: &Config) -> Self {
        let parsers: Vec<Box<dyn SourceParser>> =
            vec![Box::new(PythonParser::with_limits(config.extraction.limits()))];

        Self {
            parsers,
            store,
            extraction: config.extraction.clone(),
            threads: config.performance.effective_threads(),
            locks: DashMap::new(),
        }
    }

    pub fn can_extract_file(&self, file_path: &str) -> bool {
        self.parsers.iter().any(|p| p.can_parse(file_path))
    }

    fn parser_for_file(&self, file_path: &str) -> Option<&dyn SourceParser> {
        self.parsers
            .iter()
            .find(|p| p.can_parse(file_path))
            .map(|p| p.as_ref())
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// Extract a repository's structural model. No storage side effects.
    pub fn extract_repository(
        &self,
        repository: &str,
        revision: Option<&str>,
        files: &[SourceFile],
    ) -> RepositoryModel {
        let mut model = RepositoryModel {
            id: repository.to_string(),
            revision: revision.map(|r| r.to_string()),
            ..Default::default()
        };

        let mut seen = HashSet::new();
        let mut jobs: Vec<(String, &SourceFile)> = Vec::new();
        for file in files {
            let path = normalize_path(&file.path);
            if !seen.insert(path.clone()) {
                model.skipped.push(SkippedFile {
                    path,
                    reason: "duplicate path".to_string(),
                });
            } else if let Some(reason) = &file.unreadable {
                warn!("Could not read {}: {}", path, reason);
                model.failed.push(FailedFile {
                    path,
                    line: 0,
                    column: 0,
                    message: reason.clone(),
                });
            } else if !self.extraction.should_extract_file(&path) {
                model.skipped.push(SkippedFile {
                    path,
                    reason: "excluded by pattern".to_string(),
                });
            } else if !self.can_extract_file(&path) {
                model.skipped.push(SkippedFile {
                    path,
                    reason: "unsupported file type".to_string(),
                });
            } else {
                jobs.push((path, file));
            }
        }

        let outcomes = self.parallel_extract(&jobs);
        for outcome in outcomes {
            match outcome {
                FileOutcome::Parsed(module) => model.modules.push(module),
                FileOutcome::Failed(failed) => {
                    warn!(
                        "Syntax error in {} at {}:{}: {}",
                        failed.path, failed.line, failed.column, failed.message
                    );
                    model.failed.push(failed);
                }
                FileOutcome::Skipped(skipped) => {
                    warn!("Skipped {}: {}", skipped.path, skipped.reason);
                    model.skipped.push(skipped);
                }
            }
        }

        model.modules.sort_by(|a, b| a.path.cmp(&b.path));

        // `pkg.py` beside `pkg/__init__.py`, or a stub beside its source:
        // the first path provides the module
        let mut owners: HashMap<String, String> = HashMap::new();
        let mut modules = Vec::with_capacity(model.modules.len());
        for module in std::mem::take(&mut model.modules) {
            if let Some(owner) = owners.get(&module.name) {
                model.skipped.push(SkippedFile {
                    reason: format!("module `{}` is already provided by {}", module.name, owner),
                    path: module.path,
                });
                continue;
            }
            owners.insert(module.name.clone(), module.path.clone());
            modules.push(module);
        }
        model.modules = modules;

        model.failed.sort_by(|a, b| a.path.cmp(&b.path));
        model.skipped.sort_by(|a, b| a.path.cmp(&b.path));
        model
    }

    fn parallel_extract(&self, jobs: &[(String, &SourceFile)]) -> Vec<FileOutcome> {
        if jobs.is_empty() {
            return vec![];
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads.max(1))
            .build();

        match pool {
            Ok(pool) => pool.install(|| {
                jobs.par_iter()
                    .map(|(path, file)| self.extract_file(path, &file.content))
                    .collect()
            }),
            Err(e) => {
                debug!("Falling back to sequential extraction: {}", e);
                jobs.iter()
                    .map(|(path, file)| self.extract_file(path, &file.content))
                    .collect()
            }
        }
    }

    fn extract_file(&self, path: &str, content: &str) -> FileOutcome {
        let Some(parser) = self.parser_for_file(path) else {
            return FileOutcome::Skipped(SkippedFile {
                path: path.to_string(),
                reason: "unsupported file type".to_string(),
            });
        };

        match parser.extract(path, content) {
            Ok(module) => {
                debug!(
                    "Extracted {}: {} classes, {} functions",
                    path,
                    module.classes.len(),
                    module.functions.len()
                );
                FileOutcome::Parsed(module)
            }
            Err(ExtractionFailure::Syntax { line, column, message }) => FileOutcome::Failed(FailedFile {
                path: path.to_string(),
                line,
                column,
                message,
            }),
            Err(ExtractionFailure::Budget(reason)) => FileOutcome::Skipped(SkippedFile {
                path: path.to_string(),
                reason,
            }),
        }
    }

    /// Extract a repository and atomically replace its graph
    pub fn ingest(
        &self,
        location: &str,
        revision: Option<&str>,
        files: &[SourceFile],
    ) -> HalgraphResult<IngestionSummary> {
        let repository = normalize_repository_id(location);
        if repository.is_empty() {
            return Err(HalgraphError::InvalidRequest(
                "repository identifier cannot be empty".to_string(),
            ));
        }

        let start = Instant::now();
        info!("Ingesting repository {} ({} files)", repository, files.len());

        let model = self.extract_repository(&repository, revision, files);
        let fingerprint = fingerprint(files);
        let graph = writer::build_repository_graph(&model, &fingerprint, chrono::Utc::now().timestamp());

        {
            let lock = self
                .locks
                .entry(repository.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            let _guard = lock.lock();

            self.store
                .replace_repository(&graph)
                .map_err(|e| HalgraphError::GraphWrite {
                    repository: repository.clone(),
                    message: format!("{:#}", e),
                })?;
        }

        let summary = IngestionSummary {
            repository: repository.clone(),
            revision: model.revision.clone(),
            modules_parsed: model.modules.len(),
            modules_failed: model.failed.iter().map(|f| f.path.clone()).collect(),
            modules_skipped: model.skipped.iter().map(|s| s.path.clone()).collect(),
            classes: model.class_count(),
            methods: model.method_count(),
            functions: model.function_count(),
            attributes: model.attribute_count(),
            imports: model.import_count(),
        };

        info!(
            "Ingested {} in {:?}: {} parsed, {} failed, {} skipped, {} nodes, {} edges",
            repository,
            start.elapsed(),
            summary.modules_parsed,
            summary.modules_failed.len(),
            summary.modules_skipped.len(),
            graph.nodes.len(),
            graph.edges.len()
        );

        Ok(summary)
    }

    /// Delete a repository's graph
    pub fn remove(&self, location: &str) -> HalgraphResult<bool> {
        let repository = normalize_repository_id(location);
        let lock = self
            .locks
            .entry(repository.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let removed = {
            let _guard = lock.lock();
            self.store
                .remove_repository(&repository)
                .map_err(HalgraphError::storage)?
        };

        // Drop the lock entry unless another writer is queued on it
        drop(lock);
        self.locks.remove_if(&repository, |_, lock| Arc::strong_count(lock) == 1);

        if removed {
            info!("Removed repository {}", repository);
        }
        Ok(removed)
    }

    pub fn list_repositories(&self) -> HalgraphResult<Vec<RepositoryRecord>> {
        self.store.repositories().map_err(HalgraphError::storage)
    }
}

static SCP_REMOTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[\w.-]+@)?([\w.-]+):([^/\\].*)$").unwrap());
static URL_REMOTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://(?:[^@/]+@)?([^/:]+)(?::\d+)?(/.*)?$").unwrap());
static GIT_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.git/*$").unwrap());

/// Normalize a repository location into its namespace key.
///
/// `https://GitHub.com/psf/requests.git`, `git@github.com:psf/requests.git`
/// and `github.com/psf/requests/` all map to `github.com/psf/requests`. Local
/// paths keep their form with `/` separators and no trailing slash.
pub fn normalize_repository_id(location: &str) -> String {
    let trimmed = location.trim().replace('\\', "/");
    let trimmed = trimmed.trim_end_matches('/');
    let without_suffix = GIT_SUFFIX.replace(trimmed, "").to_string();

    let normalized = if let Some(caps) = URL_REMOTE.captures(&without_suffix) {
        if without_suffix.starts_with("file://") {
            without_suffix.trim_start_matches("file://").to_string()
        } else {
            let host = caps[1].to_ascii_lowercase();
            let path = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            format!("{}{}", host, path)
        }
    } else if let Some(caps) = SCP_REMOTE.captures(&without_suffix).filter(|_| !is_windows_drive(&without_suffix)) {
        format!("{}/{}", caps[1].to_ascii_lowercase(), &caps[2])
    } else {
        without_suffix
    };

    normalized.trim_end_matches('/').to_string()
}

fn is_windows_drive(location: &str) -> bool {
    let bytes = location.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches("./").to_string()
}

/// Content digest of a file set, independent of input order
pub fn fingerprint(files: &[SourceFile]) -> String {
    let mut sorted: Vec<&SourceFile> = files.iter().collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));

    let mut hasher = blake3::Hasher::new();
    for file in sorted {
        hasher.update(normalize_path(&file.path).as_bytes());
        hasher.update(&[0]);
        hasher.update(file.content.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::db::GraphDatabase;
    use tempfile::tempdir;

    fn indexer(dir: &std::path::Path) -> Indexer {
        let store = GraphDatabase::new(dir.join("graph.db")).unwrap();
        Indexer::new(Arc::new(store), &Config::default())
    }

    #[test]
    fn test_normalize_repository_id() {
        assert_eq!(normalize_repository_id("https://GitHub.com/psf/requests.git"), "github.com/psf/requests");
        assert_eq!(normalize_repository_id("git@github.com:psf/requests.git"), "github.com/psf/requests");
        assert_eq!(normalize_repository_id("github.com/psf/requests/"), "github.com/psf/requests");
        assert_eq!(normalize_repository_id("/home/dev/project/"), "/home/dev/project");
        assert_eq!(normalize_repository_id("C:\\work\\project"), "C:/work/project");
        assert_eq!(normalize_repository_id("  "), "");
    }

    #[test]
    fn test_every_file_is_accounted_for() {
        let dir = tempdir().unwrap();
        let indexer = indexer(dir.path());

        let files = vec![
            SourceFile::new("pkg/cache.py", "class Cache:\n    def get(self, key):\n        pass\n"),
            SourceFile::new("pkg/broken.py", "def broken(:\n"),
            SourceFile::new("README.md", "# readme"),
            SourceFile::new(".venv/lib/site.py", "x = 1\n"),
            SourceFile::new("./pkg/cache.py", "class Other:\n    pass\n"),
        ];

        let summary = indexer.ingest("demo", Some("abc123"), &files).unwrap();
        assert_eq!(summary.modules_parsed, 1);
        assert_eq!(summary.modules_failed, vec!["pkg/broken.py".to_string()]);
        assert_eq!(summary.modules_skipped.len(), 3);
        assert_eq!(summary.files_seen(), files.len());
        assert_eq!(summary.classes, 1);
        assert_eq!(summary.methods, 1);
        assert_eq!(summary.revision.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_unreadable_files_are_failed() {
        let dir = tempdir().unwrap();
        let indexer = indexer(dir.path());

        let files = vec![
            SourceFile::new("ok.py", "x = 1\n"),
            SourceFile::from_bytes("latin.py", b"name = '\xe9t\xe9'\n".to_vec()),
            SourceFile::unreadable("locked.py", "permission denied"),
        ];
        let summary = indexer.ingest("demo", None, &files).unwrap();

        assert_eq!(summary.modules_parsed, 1);
        assert_eq!(summary.modules_failed, vec!["latin.py".to_string(), "locked.py".to_string()]);
        assert_eq!(summary.files_seen(), files.len());

        let failed = indexer.store().failed_files("demo").unwrap();
        assert!(failed[0].message.contains("invalid UTF-8 at byte 8"));
        assert_eq!(failed[1].message, "permission denied");
    }

    #[test]
    fn test_module_name_collision_is_skipped() {
        let dir = tempdir().unwrap();
        let indexer = indexer(dir.path());

        let files = vec![
            SourceFile::new("pkg/__init__.py", "class FromPackage:\n    pass\n"),
            SourceFile::new("pkg.py", "class FromModule:\n    pass\n"),
        ];
        let model = indexer.extract_repository("demo", None, &files);
        assert_eq!(model.modules.len(), 1);
        assert_eq!(model.modules[0].path, "pkg.py");
        assert_eq!(model.skipped.len(), 1);
        assert_eq!(model.skipped[0].path, "pkg/__init__.py");
        assert!(model.skipped[0].reason.contains("already provided by pkg.py"));

        let summary = indexer.ingest("demo", None, &files).unwrap();
        assert_eq!(summary.modules_parsed, 1);
        assert_eq!(summary.modules_skipped, vec!["pkg/__init__.py".to_string()]);
        assert_eq!(summary.files_seen(), 2);
    }

    #[test]
    fn test_empty_repository_id_is_rejected() {
        let dir = tempdir().unwrap();
        let indexer = indexer(dir.path());
        let result = indexer.ingest("", None, &[]);
        assert!(matches!(result, Err(HalgraphError::InvalidRequest(_))));
    }

    #[test]
    fn test_remove_and_list() {
        let dir = tempdir().unwrap();
        let indexer = indexer(dir.path());

        indexer.ingest("https://example.com/a/b.git", None, &[SourceFile::new("m.py", "x = 1\n")]).unwrap();
        let repos = indexer.list_repositories().unwrap();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].id, "example.com/a/b");

        assert!(indexer.remove("example.com/a/b").unwrap());
        assert!(indexer.list_repositories().unwrap().is_empty());
        assert!(indexer.locks.is_empty());
    }

    #[test]
    fn test_concurrent_writes_to_same_repository() {
        let dir = tempdir().unwrap();
        let indexer = Arc::new(indexer(dir.path()));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let indexer = Arc::clone(&indexer);
                std::thread::spawn(move || {
                    let source = format!("class Version{}:\n    pass\n", i);
                    indexer.ingest("shared", None, &[SourceFile::new("v.py", source)]).unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Exactly one complete snapshot survives
        let snapshot = indexer.store().snapshot("shared").unwrap();
        let classes = snapshot
            .nodes
            .iter()
            .filter(|n| n.kind == crate::index::NodeKind::Class)
            .count();
        assert_eq!(classes, 1);
    }

    #[test]
    fn test_fingerprint_is_order_independent() {
        let a = SourceFile::new("a.py", "x = 1\n");
        let b = SourceFile::new("b.py", "y = 2\n");
        assert_eq!(fingerprint(&[a.clone(), b.clone()]), fingerprint(&[b, a.clone()]));
        assert_ne!(fingerprint(&[a]), fingerprint(&[]));
    }
}
