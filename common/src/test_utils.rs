use std::path::PathBuf;

/// Returns the workspace root directory, the parent of the calling crate.
fn workspace_root() -> PathBuf {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .parent()
        .map(|parent| parent.to_path_buf())
        .unwrap_or(manifest_dir)
}

/// Returns the path to a test output file under `test_output/`, creating the
/// directory if needed.
pub fn test_output_path(name: &str) -> PathBuf {
    let dir = workspace_root().join("test_output");
    std::fs::create_dir_all(&dir).expect("Failed to create test_output directory");
    dir.join(name)
}

/// Returns a fresh, empty directory under `test_output/` unique to this call,
/// so tests running in parallel never share state.
pub fn unique_test_dir(prefix: &str) -> PathBuf {
    let dir = test_output_path(&format!("{}-{}", prefix, uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("Failed to create unique test directory");
    dir
}
