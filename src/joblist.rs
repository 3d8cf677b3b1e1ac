//! Reads the identifier list and splits it into per-worker chunks.

use std::{fs, path::Path};

use anyhow::{Context, Result};

/// Contiguous slice of identifiers owned by one worker.
pub type JobChunk = Vec<String>;

/// Reads one identifier per line. Blank lines and `#` comments are skipped.
pub fn read_job_list(path: &Path) -> Result<Vec<String>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading job list {}", path.display()))?;
    Ok(parse_job_list(&content))
}

pub fn parse_job_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect()
}

/// Splits `ids` into at most `workers` contiguous chunks of
/// `ceil(len / workers)` entries. Order is preserved and nothing is dropped.
pub fn partition(ids: &[String], workers: usize) -> Vec<JobChunk> {
    if ids.is_empty() {
        return Vec::new();
    }
    let workers = workers.max(1);
    let chunk_size = ids.len().div_ceil(workers);
    ids.chunks(chunk_size).map(<[String]>::to_vec).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ids(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("https://youtu.be/{i}")).collect()
    }

    #[test]
    fn partition_preserves_order_and_bounds() {
        for n in 0..25 {
            for workers in 1..9 {
                let list = ids(n);
                let chunks = partition(&list, workers);
                assert!(chunks.len() <= workers);
                let bound = n.div_ceil(workers);
                assert!(chunks.iter().all(|chunk| chunk.len() <= bound));
                assert!(chunks.iter().all(|chunk| !chunk.is_empty()));
                let flattened: Vec<String> = chunks.into_iter().flatten().collect();
                assert_eq!(flattened, list);
            }
        }
    }

    #[test]
    fn partition_empty_input_has_no_chunks() {
        assert!(partition(&[], 4).is_empty());
    }

    #[test]
    fn partition_zero_workers_acts_like_one() {
        let list = ids(3);
        assert_eq!(partition(&list, 0), vec![list.clone()]);
    }

    #[test]
    fn partition_uses_ceiling_division() {
        let chunks = partition(&ids(5), 2);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 3);
        assert_eq!(chunks[1].len(), 2);
    }

    #[test]
    fn parse_skips_blank_and_comment_lines() {
        let parsed = parse_job_list("a\n\n  b  \n# note\r\nc\r\n");
        assert_eq!(parsed, vec!["a", "b", "c"]);
    }

    #[test]
    fn missing_job_list_is_an_error() -> Result<()> {
        let dir = tempdir()?;
        let err = read_job_list(&dir.path().join("videos.txt")).unwrap_err();
        assert!(err.to_string().contains("reading job list"));
        Ok(())
    }
}
