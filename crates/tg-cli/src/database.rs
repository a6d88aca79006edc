use std::fs;
use std::path::Path;
use std::time::Instant;

use tg_compiler::{process_list, ListKind};
use tg_core::catalog::Catalogs;
use tg_core::MemoryConfigStore;

/// Database documents to load, by kind.
#[derive(Debug, Clone, Default)]
pub struct DatabasePaths {
    pub bugs: String,
    pub compatibility: Option<String>,
    pub click2play: Option<String>,
    pub surrogates: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoadStats {
    pub documents: usize,
    pub bytes: usize,
    pub total_ms: f64,
}

pub fn read_document(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path.display(), e))
}

pub fn read_settings(path: Option<&str>) -> Result<MemoryConfigStore, String> {
    let Some(path) = path else {
        return Ok(MemoryConfigStore::new());
    };
    let text = read_document(Path::new(path))?;
    let value: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| format!("Invalid settings '{}': {}", path, e))?;
    MemoryConfigStore::from_json(value).map_err(|e| format!("Invalid settings '{}': {}", path, e))
}

/// Load every configured document into `catalogs`. Documents count as
/// stored copies, so "block new trackers by default" does not apply.
pub fn load_catalogs(
    paths: &DatabasePaths,
    catalogs: &mut Catalogs,
    config: &mut MemoryConfigStore,
    verbose: bool,
) -> Result<LoadStats, String> {
    let start = Instant::now();
    let mut documents = 0usize;
    let mut bytes = 0usize;

    let lists = [
        (ListKind::Trackers, Some(&paths.bugs)),
        (ListKind::Compatibility, paths.compatibility.as_ref()),
        (ListKind::ClickToPlay, paths.click2play.as_ref()),
        (ListKind::Surrogates, paths.surrogates.as_ref()),
    ];

    for (kind, path) in lists {
        let Some(path) = path else {
            continue;
        };
        let data = read_document(Path::new(path))?;
        if !process_list(kind, catalogs, config, true, &data) {
            return Err(format!("Failed to load {} database '{}'", kind.as_str(), path));
        }
        if verbose {
            println!(
                "  [{}] {} - {} bytes",
                kind.as_str(),
                Path::new(path).file_name().unwrap_or_default().to_string_lossy(),
                data.len()
            );
        }
        documents += 1;
        bytes += data.len();
    }

    Ok(LoadStats {
        documents,
        bytes,
        total_ms: start.elapsed().as_secs_f64() * 1000.0,
    })
}
