use std::path::{Path, PathBuf};

pub(crate) fn test_data_dir() -> PathBuf {
    let crate_root = env!("CARGO_MANIFEST_DIR");
    PathBuf::from(crate_root).join("test-data")
}

/// Return the contents of every fenced block tagged with `tag` in a Markdown file.
///
/// Fenced blocks are the blocks that start and end with three backticks, with
/// the tag immediately following the opening backticks. Panics if the file cannot
/// be read or a block is left unclosed, since this is only used by tests.
pub(crate) fn fenced_blocks(tag: &str, file: &Path) -> Vec<String> {
    let text = std::fs::read_to_string(file)
        .unwrap_or_else(|e| panic!("could not read {}: {e}", file.display()));
    let fence_start = format!("```{tag}");

    let mut blocks = Vec::new();
    let mut current: Option<Vec<&str>> = None;
    for line in text.lines() {
        if current.is_none() {
            if line.trim_end() == fence_start {
                current = Some(Vec::new());
            }
        } else if line.starts_with("```") {
            if let Some(block) = current.take() {
                blocks.push(block.join("\n"));
            }
        } else if let Some(block) = current.as_mut() {
            block.push(line);
        }
    }
    assert!(current.is_none(), "fenced block in {} was still unclosed at the end of the file", file.display());
    blocks
}
