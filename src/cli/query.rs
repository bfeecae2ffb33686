use anyhow::Result;
use std::path::Path;

use crate::config::MnemaConfig;
use crate::query::QueryOptions;

/// Run a natural-language query against saved engine state and print the
/// consumable rendering.
pub fn query(
    config: &MnemaConfig,
    state_path: &Path,
    text: &str,
    max_results: Option<usize>,
) -> Result<()> {
    let engine = super::load_engine(config, state_path)?;
    let options = QueryOptions {
        max_results,
        ..QueryOptions::default()
    };
    let response = engine.query(text, &options);
    print!("{}", engine.format_for_consumption(&response));
    Ok(())
}
