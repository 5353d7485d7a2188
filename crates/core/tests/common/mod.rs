//! Common test utilities

use spanner_core::{Chunk, Example};

/// Sentence of five tokens with one two-token person
pub fn scenario_example() -> Example {
    Example::with_chunks(["a", "b", "c", "d", "e"], vec![Chunk::new("PER", 1, 3)])
}

/// Small labeled corpus
pub fn corpus() -> Vec<Example> {
    vec![
        Example::with_chunks(
            ["John", "lives", "in", "New", "York"],
            vec![Chunk::new("PER", 0, 1), Chunk::new("LOC", 3, 5)],
        ),
        Example::with_chunks(
            ["Acme", "Corp", "hired", "Mary", "Ann", "Smith"],
            vec![Chunk::new("ORG", 0, 2), Chunk::new("PER", 3, 6)],
        ),
        Example::with_chunks(["Nothing", "here"], Vec::new()),
    ]
}

/// Unique path under the system temp directory
pub fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("spanner-{}-{}", std::process::id(), name))
}
