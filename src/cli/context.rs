use anyhow::Result;
use std::path::Path;

use crate::config::MnemaConfig;

/// Print the token-budgeted context window from saved engine state.
pub fn context(
    config: &MnemaConfig,
    state_path: &Path,
    max_nodes: usize,
    max_tokens: usize,
) -> Result<()> {
    let engine = super::load_engine(config, state_path)?;
    let nodes = engine.get_context(max_nodes, max_tokens);

    for node in &nodes {
        println!(
            "[{}] {} (depth {}, importance {:.2})",
            node.timestamp.to_rfc3339(),
            node.role,
            node.depth,
            node.importance
        );
        println!("{}", node.content);
        println!();
    }
    println!("{} nodes within budget", nodes.len());
    Ok(())
}
