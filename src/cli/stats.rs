use anyhow::Result;
use std::path::Path;

use crate::config::MnemaConfig;

/// Display engine statistics in the terminal.
pub fn stats(config: &MnemaConfig, state_path: &Path) -> Result<()> {
    let engine = super::load_engine(config, state_path)?;

    println!("Engine Statistics");
    println!("{}", "=".repeat(40));
    println!("  Tree nodes:        {}", engine.tree().len());
    println!("  Max depth:         {}", engine.tree().max_depth());
    println!("  Path length:       {}", engine.tree().current_path().len());
    println!();
    println!("  Causal nodes:      {}", engine.graph().len());
    println!("  Causal edges:      {}", engine.graph().edge_count());
    println!();
    println!("  Cached fingerprints: {}", engine.fingerprints().cache_len());
    println!(
        "  Bloom fill ratio:    {:.4}",
        engine.fingerprints().bloom_fill_ratio()
    );
    println!();
    println!("  Current version:   {}", engine.current_version());

    Ok(())
}
