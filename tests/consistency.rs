use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use halgraph::config::Config;
use halgraph::index::db::GraphDatabase;
use halgraph::index::{
    EdgeKind, FailedFileRecord, GraphEdge, GraphNode, GraphSnapshot, GraphStore, NameMatch, NodeKind,
    RepositoryGraph, RepositoryRecord,
};
use halgraph::{HalgraphError, Indexer, SourceFile, Validator};
use tempfile::TempDir;

const REPOSITORY: &str = "github.com/example/engine";
const CANDIDATE: &str = "from app import Engine\n\ne = Engine()\ne.start()\ne.ignite()\n";

type Hook = Box<dyn FnOnce() + Send>;

/// Store wrapper that can refuse writes, or run a hook right after the
/// first method listing read through it
struct Interposed {
    inner: Arc<dyn GraphStore>,
    fail_writes: Arc<AtomicBool>,
    after_method_lookup: Arc<Mutex<Option<Hook>>>,
}

impl Interposed {
    fn new(inner: Arc<dyn GraphStore>) -> Self {
        Self {
            inner,
            fail_writes: Arc::new(AtomicBool::new(false)),
            after_method_lookup: Arc::new(Mutex::new(None)),
        }
    }
}

impl GraphStore for Interposed {
    fn replace_repository(&self, graph: &RepositoryGraph) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("disk I/O error");
        }
        self.inner.replace_repository(graph)
    }

    fn remove_repository(&self, repository: &str) -> Result<bool> {
        self.inner.remove_repository(repository)
    }

    fn repository(&self, repository: &str) -> Result<Option<RepositoryRecord>> {
        self.inner.repository(repository)
    }

    fn repositories(&self) -> Result<Vec<RepositoryRecord>> {
        self.inner.repositories()
    }

    fn find_nodes(&self, repositories: &[String], kind: NodeKind, name: NameMatch<'_>) -> Result<Vec<GraphNode>> {
        self.inner.find_nodes(repositories, kind, name)
    }

    fn node(&self, id: &str) -> Result<Option<GraphNode>> {
        self.inner.node(id)
    }

    fn targets(&self, from_id: &str, kind: EdgeKind) -> Result<Vec<GraphNode>> {
        let targets = self.inner.targets(from_id, kind)?;
        if kind == EdgeKind::HasMethod {
            let hook = self.after_method_lookup.lock().unwrap().take();
            if let Some(hook) = hook {
                hook();
            }
        }
        Ok(targets)
    }

    fn sources(&self, to_id: &str, kind: EdgeKind) -> Result<Vec<GraphNode>> {
        self.inner.sources(to_id, kind)
    }

    fn edges_from(&self, from_id: &str, kind: EdgeKind) -> Result<Vec<GraphEdge>> {
        self.inner.edges_from(from_id, kind)
    }

    fn imports_of(&self, repositories: &[String], name: &str) -> Result<Vec<GraphEdge>> {
        self.inner.imports_of(repositories, name)
    }

    fn failed_files(&self, repository: &str) -> Result<Vec<FailedFileRecord>> {
        self.inner.failed_files(repository)
    }

    fn snapshot(&self, repository: &str) -> Result<GraphSnapshot> {
        self.inner.snapshot(repository)
    }

    fn read_view(&self) -> Result<Arc<dyn GraphStore>> {
        Ok(Arc::new(Interposed {
            inner: self.inner.read_view()?,
            fail_writes: Arc::clone(&self.fail_writes),
            after_method_lookup: Arc::clone(&self.after_method_lookup),
        }))
    }
}

fn engine_source(method: &str) -> Vec<SourceFile> {
    vec![SourceFile::new(
        "app.py",
        format!("class Engine:\n    def {}(self):\n        pass\n", method),
    )]
}

fn open(dir: &TempDir) -> (Config, Arc<dyn GraphStore>) {
    let mut config = Config::default();
    config.storage.db_path = dir.path().join("graph.db");
    let db: Arc<dyn GraphStore> = Arc::new(GraphDatabase::new(&config.storage.db_path).unwrap());
    (config, db)
}

#[test]
fn test_reingest_during_validation_is_not_observed() {
    let dir = TempDir::new().unwrap();
    let (config, db) = open(&dir);

    let writer = Arc::new(Indexer::new(Arc::clone(&db), &config));
    writer.ingest(REPOSITORY, Some("v1"), &engine_source("start")).unwrap();

    let store = Arc::new(Interposed::new(Arc::clone(&db)));
    let fired = Arc::new(AtomicBool::new(false));
    {
        let writer = Arc::clone(&writer);
        let fired = Arc::clone(&fired);
        *store.after_method_lookup.lock().unwrap() = Some(Box::new(move || {
            writer.ingest(REPOSITORY, Some("v2"), &engine_source("ignite")).unwrap();
            fired.store(true, Ordering::SeqCst);
        }));
    }

    let validator = Validator::new(store.clone(), &config);
    let report = validator.validate(CANDIDATE, &[]).unwrap();

    assert!(fired.load(Ordering::SeqCst));
    assert_eq!(report.hallucinations.len(), 1, "{:?}", report.hallucinations);
    assert_eq!(report.hallucinations[0].name, "app.Engine.ignite");
    assert!(report.valid_references.iter().any(|v| v.name == "app.Engine.start"));

    // The next validation sees the committed re-ingest
    let report = validator.validate(CANDIDATE, &[]).unwrap();
    assert_eq!(report.hallucinations.len(), 1);
    assert_eq!(report.hallucinations[0].name, "app.Engine.start");
}

#[test]
fn test_failed_write_keeps_serving_previous_graph() {
    let dir = TempDir::new().unwrap();
    let (config, db) = open(&dir);

    let store = Arc::new(Interposed::new(db));
    let indexer = Indexer::new(store.clone(), &config);
    let validator = Validator::new(store.clone(), &config);

    indexer.ingest(REPOSITORY, Some("v1"), &engine_source("start")).unwrap();

    store.fail_writes.store(true, Ordering::SeqCst);
    let result = indexer.ingest(REPOSITORY, Some("v2"), &engine_source("ignite"));
    match result {
        Err(HalgraphError::GraphWrite { repository, message }) => {
            assert_eq!(repository, REPOSITORY);
            assert!(message.contains("disk I/O error"));
        }
        other => panic!("expected a graph write error, got {:?}", other.map(|s| s.modules_parsed)),
    }

    let records = indexer.list_repositories().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].revision.as_deref(), Some("v1"));

    let report = validator.validate(CANDIDATE, &[]).unwrap();
    assert_eq!(report.hallucinations.len(), 1);
    assert_eq!(report.hallucinations[0].name, "app.Engine.ignite");
}
