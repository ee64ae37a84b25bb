use anyhow::{bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use halgraph::config::Config;
use halgraph::indexer::{Indexer, SourceFile};

use super::{as_store, open_store};

pub async fn ingest_repository(
    config: &Config,
    path: PathBuf,
    repo: Option<String>,
    revision: Option<String>,
) -> Result<()> {
    if !path.is_dir() {
        bail!("{} is not a directory", path.display());
    }

    let root = path.canonicalize().unwrap_or_else(|_| path.clone());
    let repository = repo.unwrap_or_else(|| root.to_string_lossy().to_string());
    info!("Ingesting {} as {}", root.display(), repository);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message("Reading source files...");

    let files = read_sources(&root, config);
    spinner.set_message(format!("Extracting {} files...", files.len()));

    let db = open_store(config)?;
    let indexer = Indexer::new(as_store(&db), config);
    let summary = indexer.ingest(&repository, revision.as_deref(), &files)?;
    spinner.finish_and_clear();

    println!("Repository: {}", summary.repository);
    if let Some(revision) = &summary.revision {
        println!("Revision: {}", revision);
    }
    println!("\nIngestion summary:");
    println!("  Modules parsed: {}", summary.modules_parsed);
    println!("  Modules failed: {}", summary.modules_failed.len());
    for failed in &summary.modules_failed {
        println!("    - {}", failed);
    }
    println!("  Files skipped: {}", summary.modules_skipped.len());
    println!("  Classes: {}", summary.classes);
    println!("  Methods: {}", summary.methods);
    println!("  Functions: {}", summary.functions);
    println!("  Attributes: {}", summary.attributes);
    println!("  Imports: {}", summary.imports);

    Ok(())
}

/// Collect repository files as (relative path, content) pairs. Hidden
/// directories are not descended into; filtering by type and pattern is
/// left to the indexer so skipped files are still counted.
fn read_sources(root: &Path, config: &Config) -> Vec<SourceFile> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                // Unlistable directories and vanished entries are still reported
                if let Some(path) = e.path() {
                    let relative = relative_path(root, path);
                    warn!("Could not read {}: {}", path.display(), e);
                    files.push(SourceFile::unreadable(relative, e.to_string()));
                }
                continue;
            }
        };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let relative = relative_path(root, path);

        if !relative.ends_with(".py") || !config.extraction.should_extract_file(&relative) {
            files.push(SourceFile::new(relative, String::new()));
            continue;
        }

        match std::fs::read(path) {
            Ok(bytes) => files.push(SourceFile::from_bytes(relative, bytes)),
            Err(e) => {
                warn!("Could not read {}: {}", path.display(), e);
                files.push(SourceFile::unreadable(relative, e.to_string()));
            }
        }
    }

    debug!("Collected {} files under {}", files.len(), root.display());
    files
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
