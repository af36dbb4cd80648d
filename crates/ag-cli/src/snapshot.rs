use std::fs;
use std::path::Path;
use std::time::Instant;

use ag_core::snapshot::Snapshot;
use ag_engine::{Engine, FilterLoadStats};

#[derive(Debug, Clone, Default)]
pub struct CompileStats {
    pub lines: usize,
    pub load: FilterLoadStats,
    pub resources: usize,
    pub total_ms: f64,
}

/// Load every list (and optional resource manifests) into one engine and
/// serialize it.
pub fn compile_snapshot_bytes(
    inputs: &[String],
    resources: &[String],
    verbose: bool,
) -> Result<(Vec<u8>, CompileStats), String> {
    if inputs.is_empty() {
        return Err("No input files specified".to_string());
    }

    let start = Instant::now();
    let mut engine = Engine::default();
    let mut stats = CompileStats::default();

    for (list_id, path) in inputs.iter().enumerate() {
        let content = fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;

        let line_count = content.lines().count();
        stats.lines += line_count;

        let load = engine.add_filter(&content);
        stats.load.network += load.network;
        stats.load.cosmetic += load.cosmetic;
        stats.load.skipped += load.skipped;
        stats.load.deduped += load.deduped;

        if verbose {
            println!(
                "  [{}] {} - {} lines, {} network, {} cosmetic, {} skipped",
                list_id,
                Path::new(path).file_name().unwrap_or_default().to_string_lossy(),
                line_count,
                load.network,
                load.cosmetic,
                load.skipped
            );
        }
    }

    for path in resources {
        let manifest = fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;
        stats.resources += engine.add_resources(&manifest);
    }

    let snapshot_bytes = engine.serialize();

    Snapshot::load(&snapshot_bytes).map_err(|e| format!("Generated snapshot failed validation: {}", e))?;

    stats.total_ms = start.elapsed().as_secs_f64() * 1000.0;

    Ok((snapshot_bytes, stats))
}

pub fn write_snapshot(path: &Path, bytes: &[u8]) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create '{}': {}", parent.display(), e))?;
    }
    fs::write(path, bytes).map_err(|e| format!("Failed to write '{}': {}", path.display(), e))?;
    Ok(())
}

pub fn read_snapshot(path: &Path) -> Result<Vec<u8>, String> {
    fs::read(path).map_err(|e| format!("Failed to read '{}': {}", path.display(), e))
}

/// Restore an engine from a snapshot file.
pub fn load_engine(path: &Path) -> Result<Engine, String> {
    let bytes = read_snapshot(path)?;
    let mut engine = Engine::default();
    engine
        .deserialize(&bytes)
        .map_err(|e| format!("Invalid snapshot '{}': {}", path.display(), e))?;
    Ok(engine)
}
