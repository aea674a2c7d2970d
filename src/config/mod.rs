//! Run options loading.
//!
//! [`OptimizeOptions`](crate::types::OptimizeOptions) is threaded explicitly
//! through `Optimize` rather than stashed behind a global singleton — the
//! core deliberately avoids ambient configuration so that two concurrent
//! runs with different options never interfere. This module only helps the
//! CLI boundary assemble an `OptimizeOptions` value before the run starts.
//!
//! ## Loading order (CLI binary only)
//!
//! 1. `BUDGET_ALLOCATOR_CONFIG` environment variable (path to a TOML file).
//! 2. `budget_allocator.toml` in the current working directory.
//! 3. Built-in defaults ([`OptimizeOptions::default`]).

pub mod defaults;

use crate::types::OptimizeOptions;
use std::path::Path;

const CONFIG_ENV_VAR: &str = "BUDGET_ALLOCATOR_CONFIG";
const DEFAULT_CONFIG_FILENAME: &str = "budget_allocator.toml";

/// Resolve run options the way the reference CLI does: explicit file, then
/// the env var, then the cwd default file, then hardcoded defaults.
pub fn load(explicit_path: Option<&Path>) -> anyhow::Result<OptimizeOptions> {
    if let Some(path) = explicit_path {
        return load_from_file(path);
    }
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return load_from_file(Path::new(&path));
    }
    let cwd_default = Path::new(DEFAULT_CONFIG_FILENAME);
    if cwd_default.exists() {
        return load_from_file(cwd_default);
    }
    tracing::debug!("no options file found, using built-in defaults");
    Ok(OptimizeOptions::default())
}

fn load_from_file(path: &Path) -> anyhow::Result<OptimizeOptions> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read options file {}: {e}", path.display()))?;
    let options: OptimizeOptions = toml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("failed to parse options file {}: {e}", path.display()))?;
    tracing::info!(path = %path.display(), "loaded run options from file");
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_defaults_when_nothing_configured() {
        std::env::remove_var(CONFIG_ENV_VAR);
        let options = load(None).expect("default load never fails");
        assert_eq!(options.mc_samples, OptimizeOptions::default().mc_samples);
    }
}
