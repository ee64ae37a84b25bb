use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::schema::init_schema;
use super::{
    EdgeKind, FailedFileRecord, GraphEdge, GraphNode, GraphSnapshot, GraphStore, NameMatch,
    NodeKind, RepositoryGraph, RepositoryRecord,
};

/// Type alias for connection pool
pub type ConnectionPool = Pool<SqliteConnectionManager>;

const NODE_COLUMNS: &str = "id, repo_id, kind, name, qualified_name, file, line, column, metadata";
const EDGE_COLUMNS: &str = "repo_id, from_id, to_id, kind, ordinal, metadata";

/// SQLite-backed graph store.
///
/// The database runs in WAL mode: a repository replacement is one write
/// transaction, and readers on other pooled connections keep seeing the last
/// committed snapshot until it commits.
#[derive(Clone)]
pub struct GraphDatabase {
    pool: ConnectionPool,
    db_path: PathBuf,
}

impl GraphDatabase {
    /// Create or open a database
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        info!("Opening graph database at: {}", db_path.display());

        // Create parent directory if it doesn't exist
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let manager = SqliteConnectionManager::file(&db_path).with_init(|conn| {
            conn.busy_timeout(Duration::from_secs(10))?;
            conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
        });

        // Create connection pool
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .context("Failed to create connection pool")?;

        // Initialize schema
        {
            let conn = pool.get().context("Failed to get connection")?;
            init_schema(&conn).context("Failed to initialize schema")?;
        }

        Ok(Self { pool, db_path })
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().context("Failed to get connection from pool")
    }

    /// Open a read transaction that pins the current committed snapshot
    pub fn begin_read(&self) -> Result<ReadView> {
        let conn = self.get_conn()?;
        conn.execute_batch("BEGIN DEFERRED")
            .context("Failed to begin read transaction")?;
        let conn = PinnedConnection(conn);

        // A deferred transaction takes its snapshot at the first read
        conn.query_row("SELECT COUNT(*) FROM repositories", [], |row| row.get::<_, i64>(0))?;

        Ok(ReadView {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Get graph statistics
    pub fn get_stats(&self) -> Result<GraphStats> {
        let conn = self.get_conn()?;

        let count = |sql: &str| -> Result<usize> {
            let value: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(value as usize)
        };

        Ok(GraphStats {
            repositories: count("SELECT COUNT(*) FROM repositories")?,
            modules: count("SELECT COUNT(*) FROM nodes WHERE kind = 'module'")?,
            classes: count("SELECT COUNT(*) FROM nodes WHERE kind = 'class'")?,
            functions: count("SELECT COUNT(*) FROM nodes WHERE kind = 'function'")?,
            methods: count("SELECT COUNT(*) FROM nodes WHERE kind = 'method'")?,
            attributes: count("SELECT COUNT(*) FROM nodes WHERE kind = 'attribute'")?,
            edges: count("SELECT COUNT(*) FROM edges")?,
            failed_files: count("SELECT COUNT(*) FROM failed_files")?,
        })
    }

    /// Node counts per kind for one repository
    pub fn kind_counts(&self, repository: &str) -> Result<Vec<(String, usize)>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            "SELECT kind, COUNT(*) as count FROM nodes WHERE repo_id = ?1 GROUP BY kind ORDER BY count DESC",
        )?;

        let rows = stmt.query_map([repository], |row| {
            let kind: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((kind, count as usize))
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }

        Ok(results)
    }
}

impl GraphStore for GraphDatabase {
    fn replace_repository(&self, graph: &RepositoryGraph) -> Result<()> {
        let mut conn = self.get_conn()?;
        let repo = &graph.record.id;

        debug!(
            "Replacing repository {} with {} nodes and {} edges",
            repo,
            graph.nodes.len(),
            graph.edges.len()
        );

        // Dropping the transaction without commit rolls it back, leaving the
        // previous snapshot in place
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM edges WHERE repo_id = ?1", [repo])?;
        tx.execute("DELETE FROM nodes WHERE repo_id = ?1", [repo])?;
        tx.execute("DELETE FROM failed_files WHERE repo_id = ?1", [repo])?;

        {
            let mut insert_node = tx.prepare(&format!(
                "INSERT INTO nodes ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                NODE_COLUMNS
            ))?;
            for node in &graph.nodes {
                insert_node
                    .execute(params![
                        node.id,
                        node.repository,
                        node.kind.as_str(),
                        node.name,
                        node.qualified_name,
                        node.file,
                        node.line as i64,
                        node.column as i64,
                        node.metadata.to_string(),
                    ])
                    .with_context(|| format!("Failed to insert node {}", node.id))?;
            }

            let mut insert_edge = tx.prepare(&format!(
                "INSERT INTO edges ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                EDGE_COLUMNS
            ))?;
            for edge in &graph.edges {
                insert_edge
                    .execute(params![
                        edge.repository,
                        edge.from_id,
                        edge.to_id,
                        edge.kind.as_str(),
                        edge.ordinal as i64,
                        edge.metadata.to_string(),
                    ])
                    .with_context(|| format!("Failed to insert edge {} -> {}", edge.from_id, edge.to_id))?;
            }

            let mut insert_failed = tx.prepare(
                "INSERT OR REPLACE INTO failed_files (repo_id, path, line, column, message)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for failed in &graph.failed {
                insert_failed.execute(params![
                    repo,
                    failed.path,
                    failed.line as i64,
                    failed.column as i64,
                    failed.message,
                ])?;
            }
        }

        let record = &graph.record;
        tx.execute(
            "INSERT OR REPLACE INTO repositories
                (id, revision, fingerprint, modules_parsed, modules_failed, modules_skipped, ingested_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                record.revision,
                record.fingerprint,
                record.modules_parsed as i64,
                record.modules_failed as i64,
                record.modules_skipped as i64,
                record.ingested_at,
            ],
        )?;

        tx.commit().context("Failed to commit repository graph")?;
        Ok(())
    }

    fn remove_repository(&self, repository: &str) -> Result<bool> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM edges WHERE repo_id = ?1", [repository])?;
        tx.execute("DELETE FROM nodes WHERE repo_id = ?1", [repository])?;
        tx.execute("DELETE FROM failed_files WHERE repo_id = ?1", [repository])?;
        let removed = tx.execute("DELETE FROM repositories WHERE id = ?1", [repository])?;

        tx.commit()?;
        Ok(removed > 0)
    }

    fn repository(&self, repository: &str) -> Result<Option<RepositoryRecord>> {
        queries::repository(&*self.get_conn()?, repository)
    }

    fn repositories(&self) -> Result<Vec<RepositoryRecord>> {
        queries::repositories(&*self.get_conn()?)
    }

    fn find_nodes(&self, repositories: &[String], kind: NodeKind, name: NameMatch<'_>) -> Result<Vec<GraphNode>> {
        queries::find_nodes(&*self.get_conn()?, repositories, kind, name)
    }

    fn node(&self, id: &str) -> Result<Option<GraphNode>> {
        queries::node(&*self.get_conn()?, id)
    }

    fn targets(&self, from_id: &str, kind: EdgeKind) -> Result<Vec<GraphNode>> {
        queries::targets(&*self.get_conn()?, from_id, kind)
    }

    fn sources(&self, to_id: &str, kind: EdgeKind) -> Result<Vec<GraphNode>> {
        queries::sources(&*self.get_conn()?, to_id, kind)
    }

    fn edges_from(&self, from_id: &str, kind: EdgeKind) -> Result<Vec<GraphEdge>> {
        queries::edges_from(&*self.get_conn()?, from_id, kind)
    }

    fn imports_of(&self, repositories: &[String], name: &str) -> Result<Vec<GraphEdge>> {
        queries::imports_of(&*self.get_conn()?, repositories, name)
    }

    fn failed_files(&self, repository: &str) -> Result<Vec<FailedFileRecord>> {
        queries::failed_files(&*self.get_conn()?, repository)
    }

    fn snapshot(&self, repository: &str) -> Result<GraphSnapshot> {
        queries::snapshot(&*self.get_conn()?, repository)
    }

    fn read_view(&self) -> Result<Arc<dyn GraphStore>> {
        Ok(Arc::new(self.begin_read()?))
    }
}

/// A read transaction pinned to one pooled connection.
///
/// Every query through the view sees the snapshot that was committed when the
/// view was opened, even while another connection replaces a repository.
#[derive(Clone)]
pub struct ReadView {
    conn: Arc<Mutex<PinnedConnection>>,
}

struct PinnedConnection(PooledConnection<SqliteConnectionManager>);

impl Deref for PinnedConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.0
    }
}

impl Drop for PinnedConnection {
    fn drop(&mut self) {
        if let Err(e) = self.0.execute_batch("ROLLBACK") {
            debug!("Failed to close read transaction: {}", e);
        }
    }
}

impl GraphStore for ReadView {
    fn replace_repository(&self, graph: &RepositoryGraph) -> Result<()> {
        bail!("cannot replace {} through a read view", graph.record.id)
    }

    fn remove_repository(&self, repository: &str) -> Result<bool> {
        bail!("cannot remove {} through a read view", repository)
    }

    fn repository(&self, repository: &str) -> Result<Option<RepositoryRecord>> {
        queries::repository(&self.conn.lock(), repository)
    }

    fn repositories(&self) -> Result<Vec<RepositoryRecord>> {
        queries::repositories(&self.conn.lock())
    }

    fn find_nodes(&self, repositories: &[String], kind: NodeKind, name: NameMatch<'_>) -> Result<Vec<GraphNode>> {
        queries::find_nodes(&self.conn.lock(), repositories, kind, name)
    }

    fn node(&self, id: &str) -> Result<Option<GraphNode>> {
        queries::node(&self.conn.lock(), id)
    }

    fn targets(&self, from_id: &str, kind: EdgeKind) -> Result<Vec<GraphNode>> {
        queries::targets(&self.conn.lock(), from_id, kind)
    }

    fn sources(&self, to_id: &str, kind: EdgeKind) -> Result<Vec<GraphNode>> {
        queries::sources(&self.conn.lock(), to_id, kind)
    }

    fn edges_from(&self, from_id: &str, kind: EdgeKind) -> Result<Vec<GraphEdge>> {
        queries::edges_from(&self.conn.lock(), from_id, kind)
    }

    fn imports_of(&self, repositories: &[String], name: &str) -> Result<Vec<GraphEdge>> {
        queries::imports_of(&self.conn.lock(), repositories, name)
    }

    fn failed_files(&self, repository: &str) -> Result<Vec<FailedFileRecord>> {
        queries::failed_files(&self.conn.lock(), repository)
    }

    fn snapshot(&self, repository: &str) -> Result<GraphSnapshot> {
        queries::snapshot(&self.conn.lock(), repository)
    }

    fn read_view(&self) -> Result<Arc<dyn GraphStore>> {
        Ok(Arc::new(self.clone()))
    }
}

mod queries {
    use super::*;

    pub fn repository(conn: &Connection, repository: &str) -> Result<Option<RepositoryRecord>> {
        let record = conn
            .query_row(
                "SELECT id, revision, fingerprint, modules_parsed, modules_failed, modules_skipped, ingested_at
                 FROM repositories WHERE id = ?1",
                [repository],
                row_to_repository,
            )
            .optional()?;

        Ok(record)
    }

    pub fn repositories(conn: &Connection) -> Result<Vec<RepositoryRecord>> {
        let mut stmt = conn.prepare(
            "SELECT id, revision, fingerprint, modules_parsed, modules_failed, modules_skipped, ingested_at
             FROM repositories ORDER BY id",
        )?;

        let records = stmt
            .query_map([], row_to_repository)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    pub fn find_nodes(conn: &Connection, repositories: &[String], kind: NodeKind, name: NameMatch<'_>) -> Result<Vec<GraphNode>> {
        if repositories.is_empty() {
            return Ok(Vec::new());
        }

        let (condition, pattern) = match name {
            NameMatch::Qualified(q) => ("qualified_name = ?2", q.to_string()),
            NameMatch::Simple(s) => ("name = ?2", s.to_string()),
            NameMatch::Suffix(s) => ("(qualified_name = ?2 OR qualified_name LIKE ?3 ESCAPE '\\')", s.to_string()),
            NameMatch::Segment(s) => (
                "(qualified_name = ?2 OR qualified_name LIKE ?3 ESCAPE '\\'
                  OR qualified_name LIKE ?4 ESCAPE '\\' OR qualified_name LIKE ?5 ESCAPE '\\')",
                s.to_string(),
            ),
        };
        let escaped = escape_like(&pattern);
        let like_patterns = [
            format!("%.{}", escaped),
            format!("{}.%", escaped),
            format!("%.{}.%", escaped),
        ];

        let placeholders: Vec<String> = (0..repositories.len()).map(|i| format!("?{}", i + 6)).collect();
        let sql = format!(
            "SELECT {} FROM nodes
             WHERE kind = ?1 AND {} AND repo_id IN ({})
             ORDER BY repo_id, qualified_name",
            NODE_COLUMNS,
            condition,
            placeholders.join(", ")
        );

        // ?3..?5 are only referenced by suffix and segment matches;
        // repositories start at ?6
        let mut values: Vec<String> = vec![kind.as_str().to_string(), pattern];
        values.extend(like_patterns);
        values.extend(repositories.iter().cloned());

        let mut stmt = conn.prepare(&sql)?;
        let nodes = stmt
            .query_map(params_from_iter(values.iter()), row_to_node)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(nodes)
    }

    pub fn node(conn: &Connection, id: &str) -> Result<Option<GraphNode>> {
        let node = conn
            .query_row(
                &format!("SELECT {} FROM nodes WHERE id = ?1", NODE_COLUMNS),
                [id],
                row_to_node,
            )
            .optional()?;

        Ok(node)
    }

    pub fn targets(conn: &Connection, from_id: &str, kind: EdgeKind) -> Result<Vec<GraphNode>> {
        let mut stmt = conn.prepare(
            "SELECT n.id, n.repo_id, n.kind, n.name, n.qualified_name, n.file, n.line, n.column, n.metadata
             FROM edges e JOIN nodes n ON n.id = e.to_id
             WHERE e.from_id = ?1 AND e.kind = ?2
             ORDER BY e.ordinal, n.qualified_name",
        )?;

        let nodes = stmt
            .query_map(params![from_id, kind.as_str()], row_to_node)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(nodes)
    }

    pub fn sources(conn: &Connection, to_id: &str, kind: EdgeKind) -> Result<Vec<GraphNode>> {
        let mut stmt = conn.prepare(
            "SELECT n.id, n.repo_id, n.kind, n.name, n.qualified_name, n.file, n.line, n.column, n.metadata
             FROM edges e JOIN nodes n ON n.id = e.from_id
             WHERE e.to_id = ?1 AND e.kind = ?2
             ORDER BY n.qualified_name",
        )?;

        let nodes = stmt
            .query_map(params![to_id, kind.as_str()], row_to_node)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(nodes)
    }

    pub fn edges_from(conn: &Connection, from_id: &str, kind: EdgeKind) -> Result<Vec<GraphEdge>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM edges WHERE from_id = ?1 AND kind = ?2 ORDER BY ordinal",
            EDGE_COLUMNS
        ))?;

        let edges = stmt
            .query_map(params![from_id, kind.as_str()], row_to_edge)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(edges)
    }

    pub fn imports_of(conn: &Connection, repositories: &[String], name: &str) -> Result<Vec<GraphEdge>> {
        if repositories.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders: Vec<String> = (0..repositories.len()).map(|i| format!("?{}", i + 3)).collect();
        let sql = format!(
            "SELECT {} FROM edges
             WHERE kind = 'imports'
               AND (json_extract(metadata, '$.symbol') = ?1
                    OR json_extract(metadata, '$.origin') = ?1
                    OR json_extract(metadata, '$.origin') LIKE ?2 ESCAPE '\\')
               AND repo_id IN ({})
             ORDER BY repo_id, from_id, ordinal",
            EDGE_COLUMNS,
            placeholders.join(", ")
        );

        let mut values: Vec<String> = vec![name.to_string(), format!("%.{}", escape_like(name))];
        values.extend(repositories.iter().cloned());

        let mut stmt = conn.prepare(&sql)?;
        let edges = stmt
            .query_map(params_from_iter(values.iter()), row_to_edge)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(edges)
    }

    pub fn failed_files(conn: &Connection, repository: &str) -> Result<Vec<FailedFileRecord>> {
        let mut stmt = conn.prepare(
            "SELECT path, line, column, message FROM failed_files WHERE repo_id = ?1 ORDER BY path",
        )?;

        let failed = stmt
            .query_map([repository], |row| {
                Ok(FailedFileRecord {
                    path: row.get(0)?,
                    line: row.get::<_, i64>(1)? as u32,
                    column: row.get::<_, i64>(2)? as u32,
                    message: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(failed)
    }

    pub fn snapshot(conn: &Connection, repository: &str) -> Result<GraphSnapshot> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM nodes WHERE repo_id = ?1 ORDER BY id",
            NODE_COLUMNS
        ))?;
        let nodes = stmt
            .query_map([repository], row_to_node)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM edges WHERE repo_id = ?1 ORDER BY from_id, kind, ordinal, to_id",
            EDGE_COLUMNS
        ))?;
        let edges = stmt
            .query_map([repository], row_to_edge)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(GraphSnapshot { nodes, edges })
    }
}

/// Graph statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStats {
    pub repositories: usize,
    pub modules: usize,
    pub classes: usize,
    pub functions: usize,
    pub methods: usize,
    pub attributes: usize,
    pub edges: usize,
    pub failed_files: usize,
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn parse_json(text: String) -> serde_json::Value {
    serde_json::from_str(&text).unwrap_or(serde_json::Value::Null)
}

fn conversion_error(index: usize, err: anyhow::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        err.into(),
    )
}

/// Convert database row to GraphNode
fn row_to_node(row: &Row) -> rusqlite::Result<GraphNode> {
    let kind_str: String = row.get(2)?;

    Ok(GraphNode {
        id: row.get(0)?,
        repository: row.get(1)?,
        kind: NodeKind::from_str(&kind_str).map_err(|e| conversion_error(2, e))?,
        name: row.get(3)?,
        qualified_name: row.get(4)?,
        file: row.get(5)?,
        line: row.get::<_, i64>(6)? as u32,
        column: row.get::<_, i64>(7)? as u32,
        metadata: parse_json(row.get(8)?),
    })
}

/// Convert database row to GraphEdge
fn row_to_edge(row: &Row) -> rusqlite::Result<GraphEdge> {
    let kind_str: String = row.get(3)?;

    Ok(GraphEdge {
        repository: row.get(0)?,
        from_id: row.get(1)?,
        to_id: row.get(2)?,
        kind: EdgeKind::from_str(&kind_str).map_err(|e| conversion_error(3, e))?,
        ordinal: row.get::<_, i64>(4)? as u32,
        metadata: parse_json(row.get(5)?),
    })
}

fn row_to_repository(row: &Row) -> rusqlite::Result<RepositoryRecord> {
    Ok(RepositoryRecord {
        id: row.get(0)?,
        revision: row.get(1)?,
        fingerprint: row.get(2)?,
        modules_parsed: row.get::<_, i64>(3)? as usize,
        modules_failed: row.get::<_, i64>(4)? as usize,
        modules_skipped: row.get::<_, i64>(5)? as usize,
        ingested_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn node(repo: &str, kind: NodeKind, qualified_name: &str) -> GraphNode {
        GraphNode {
            id: GraphNode::id_for(repo, kind, qualified_name),
            repository: repo.to_string(),
            kind,
            name: qualified_name.rsplit('.').next().unwrap().to_string(),
            qualified_name: qualified_name.to_string(),
            file: Some("cache.py".to_string()),
            line: 1,
            column: 0,
            metadata: json!({}),
        }
    }

    fn edge(repo: &str, from: &GraphNode, to: &GraphNode, kind: EdgeKind, ordinal: u32) -> GraphEdge {
        GraphEdge {
            repository: repo.to_string(),
            from_id: from.id.clone(),
            to_id: to.id.clone(),
            kind,
            ordinal,
            metadata: json!({}),
        }
    }

    fn graph(repo: &str, class_name: &str) -> RepositoryGraph {
        let module = node(repo, NodeKind::Module, "cache");
        let class = node(repo, NodeKind::Class, &format!("cache.{}", class_name));
        let method = node(repo, NodeKind::Method, &format!("cache.{}.get", class_name));
        RepositoryGraph {
            record: RepositoryRecord {
                id: repo.to_string(),
                revision: None,
                fingerprint: "abc".to_string(),
                modules_parsed: 1,
                modules_failed: 0,
                modules_skipped: 0,
                ingested_at: 0,
            },
            edges: vec![
                edge(repo, &module, &class, EdgeKind::Defines, 0),
                edge(repo, &class, &method, EdgeKind::HasMethod, 0),
            ],
            nodes: vec![module, class, method],
            failed: vec![FailedFileRecord {
                path: "broken.py".to_string(),
                line: 3,
                column: 1,
                message: "invalid syntax".to_string(),
            }],
        }
    }

    #[test]
    fn test_create_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        let _db = GraphDatabase::new(&db_path).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_replace_and_lookup() {
        let dir = tempdir().unwrap();
        let db = GraphDatabase::new(dir.path().join("test.db")).unwrap();

        db.replace_repository(&graph("repo-a", "Cache")).unwrap();

        let repos = vec!["repo-a".to_string()];
        let classes = db.find_nodes(&repos, NodeKind::Class, NameMatch::Simple("Cache")).unwrap();
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].qualified_name, "cache.Cache");

        let by_suffix = db.find_nodes(&repos, NodeKind::Class, NameMatch::Suffix("Cache")).unwrap();
        assert_eq!(by_suffix.len(), 1);
        assert!(db.find_nodes(&repos, NodeKind::Class, NameMatch::Suffix("ache")).unwrap().is_empty());

        let by_segment = db.find_nodes(&repos, NodeKind::Class, NameMatch::Segment("cache")).unwrap();
        assert_eq!(by_segment.len(), 1);

        let methods = db.targets(&classes[0].id, EdgeKind::HasMethod).unwrap();
        assert_eq!(methods.len(), 1);
        assert_eq!(methods[0].name, "get");

        assert_eq!(db.failed_files("repo-a").unwrap().len(), 1);
    }

    #[test]
    fn test_replace_supersedes_previous_snapshot() {
        let dir = tempdir().unwrap();
        let db = GraphDatabase::new(dir.path().join("test.db")).unwrap();
        let repos = vec!["repo-a".to_string()];

        db.replace_repository(&graph("repo-a", "Cache")).unwrap();
        db.replace_repository(&graph("repo-a", "Store")).unwrap();

        assert!(db.find_nodes(&repos, NodeKind::Class, NameMatch::Simple("Cache")).unwrap().is_empty());
        assert_eq!(db.find_nodes(&repos, NodeKind::Class, NameMatch::Simple("Store")).unwrap().len(), 1);
        assert_eq!(db.repositories().unwrap().len(), 1);
    }

    #[test]
    fn test_failed_write_keeps_previous_snapshot() {
        let dir = tempdir().unwrap();
        let db = GraphDatabase::new(dir.path().join("test.db")).unwrap();
        let repos = vec!["repo-a".to_string()];

        db.replace_repository(&graph("repo-a", "Cache")).unwrap();

        // An edge pointing at a node that does not exist violates the foreign key
        let mut broken = graph("repo-a", "Store");
        let dangling = node("repo-a", NodeKind::Class, "cache.Missing");
        let from = broken.nodes[0].clone();
        broken.edges.push(edge("repo-a", &from, &dangling, EdgeKind::Defines, 1));

        assert!(db.replace_repository(&broken).is_err());
        assert_eq!(db.find_nodes(&repos, NodeKind::Class, NameMatch::Simple("Cache")).unwrap().len(), 1);
        assert!(db.find_nodes(&repos, NodeKind::Class, NameMatch::Simple("Store")).unwrap().is_empty());
    }

    #[test]
    fn test_read_view_keeps_its_snapshot() {
        let dir = tempdir().unwrap();
        let db = GraphDatabase::new(dir.path().join("test.db")).unwrap();
        let repos = vec!["repo-a".to_string()];

        db.replace_repository(&graph("repo-a", "Cache")).unwrap();
        let view = db.read_view().unwrap();

        db.replace_repository(&graph("repo-a", "Store")).unwrap();
        db.replace_repository(&graph("repo-b", "Cache")).unwrap();

        let classes = view.find_nodes(&repos, NodeKind::Class, NameMatch::Simple("Cache")).unwrap();
        assert_eq!(classes.len(), 1);
        assert_eq!(view.targets(&classes[0].id, EdgeKind::HasMethod).unwrap().len(), 1);
        assert!(view.find_nodes(&repos, NodeKind::Class, NameMatch::Simple("Store")).unwrap().is_empty());
        assert_eq!(view.repositories().unwrap().len(), 1);
        assert!(view.replace_repository(&graph("repo-a", "Other")).is_err());

        // New reads see the committed replacement
        assert_eq!(db.find_nodes(&repos, NodeKind::Class, NameMatch::Simple("Store")).unwrap().len(), 1);
        assert_eq!(db.repositories().unwrap().len(), 2);

        drop(view);
        assert_eq!(db.read_view().unwrap().repositories().unwrap().len(), 2);
    }

    #[test]
    fn test_repositories_are_namespaced() {
        let dir = tempdir().unwrap();
        let db = GraphDatabase::new(dir.path().join("test.db")).unwrap();

        db.replace_repository(&graph("repo-a", "Cache")).unwrap();
        db.replace_repository(&graph("repo-b", "Cache")).unwrap();

        let only_b = vec!["repo-b".to_string()];
        let classes = db.find_nodes(&only_b, NodeKind::Class, NameMatch::Qualified("cache.Cache")).unwrap();
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].repository, "repo-b");

        assert!(db.remove_repository("repo-a").unwrap());
        assert!(!db.remove_repository("repo-a").unwrap());
        assert_eq!(db.get_stats().unwrap().repositories, 1);
    }

    #[test]
    fn test_stats() {
        let dir = tempdir().unwrap();
        let db = GraphDatabase::new(dir.path().join("test.db")).unwrap();

        let stats = db.get_stats().unwrap();
        assert_eq!(stats.repositories, 0);
        assert_eq!(stats.classes, 0);
        assert_eq!(stats.edges, 0);
    }
}
