use anyhow::Result;
use std::path::Path;

use halgraph::config::Config;
use halgraph::index::GraphStore;

use super::open_store;

pub async fn show_stats(config: &Config, verbose: bool) -> Result<()> {
    let db = open_store(config)?;
    let stats = db.get_stats()?;

    println!("Graph database: {}", db.path().display());
    println!("\nGraph statistics:");
    println!("  Repositories: {}", stats.repositories);
    println!("  Modules: {}", stats.modules);
    println!("  Classes: {}", stats.classes);
    println!("  Functions: {}", stats.functions);
    println!("  Methods: {}", stats.methods);
    println!("  Attributes: {}", stats.attributes);
    println!("  Edges: {}", stats.edges);
    println!("  Failed files: {}", stats.failed_files);
    println!("  Database size: {:.2} MB", get_db_size(db.path())?);

    if verbose {
        for repository in db.repositories()? {
            println!("\n{}:", repository.id);
            for (kind, count) in db.kind_counts(&repository.id)? {
                println!("    {}: {}", kind, count);
            }
            let failed = db.failed_files(&repository.id)?;
            if !failed.is_empty() {
                println!("  Failed files:");
                for file in failed {
                    println!("    {}:{}:{} {}", file.path, file.line, file.column, file.message);
                }
            }
        }
    }

    Ok(())
}

fn get_db_size(db_path: &Path) -> Result<f64> {
    let metadata = std::fs::metadata(db_path)?;
    Ok(metadata.len() as f64 / (1024.0 * 1024.0))
}
