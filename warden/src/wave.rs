//! Wave selection for `warden wave` and the run loop.

use std::path::Path;

use anyhow::{Context, Result};

use crate::core::scheduler::{WaveSelection, next_wave};
use crate::io::graph_store::load_graph;
use crate::io::init::WardenPaths;

/// Load the graph from disk and select the next wave without mutating anything.
pub fn wave_from_root(root: &Path) -> Result<WaveSelection> {
    let paths = WardenPaths::new(root);
    paths.ensure_initialized()?;
    let graph = load_graph(&paths).with_context(|| "load graph for wave selection")?;
    Ok(next_wave(&graph))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TaskStatus;
    use crate::io::graph_store::write_graph;
    use crate::io::init::{InitOptions, init_warden};
    use crate::test_support::task;

    #[test]
    fn selection_is_a_pure_read() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_warden(temp.path(), &InitOptions { force: false }).expect("init");
        let mut done = task("a", 1, &[]);
        done.status = TaskStatus::Completed;
        let graph = crate::graph::TaskGraph::from_tasks(vec![done, task("b", 2, &["a"])])
            .expect("graph");
        write_graph(&paths, &graph).expect("write");

        let first = wave_from_root(temp.path()).expect("first");
        let second = wave_from_root(temp.path()).expect("second");
        assert_eq!(first, second);
        let WaveSelection::Ready(wave) = first else {
            panic!("expected ready wave");
        };
        assert_eq!(wave.number, 2);
        assert_eq!(wave.task_ids, vec!["b".to_string()]);
    }

    #[test]
    fn empty_graph_is_complete() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_warden(temp.path(), &InitOptions { force: false }).expect("init");
        assert_eq!(
            wave_from_root(temp.path()).expect("wave"),
            WaveSelection::Complete
        );
    }
}
