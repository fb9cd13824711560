//! Output directory collapsing.
//!
//! Predicted output folders routinely overlap (`bin`, `bin/Debug`, `obj`).
//! Shared opaque directories must never nest, so the candidates are reduced
//! to the minimal set of roots that covers all of them.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Reduce candidate directories to a minimal antichain under the
/// descendant-or-self relation.
///
/// The result is sorted, idempotent and independent of input order. The
/// descendant test is component-wise, so `/a/bc` is not under `/a/b`.
pub fn collapse_output_directories<I, P>(candidates: I) -> Vec<PathBuf>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let sorted: BTreeSet<PathBuf> = candidates
        .into_iter()
        .map(|p| p.as_ref().to_path_buf())
        .collect();

    let mut retained: Vec<PathBuf> = Vec::with_capacity(sorted.len());
    for candidate in sorted {
        // Component-wise ordering keeps the descendants of a path contiguous
        // right after it.
        if let Some(last) = retained.last() {
            if candidate.starts_with(last) {
                continue;
            }
        }
        retained.push(candidate);
    }
    retained
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(items: &[&str]) -> Vec<PathBuf> {
        items.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_collapse_drops_descendants() {
        let collapsed =
            collapse_output_directories(["/root/bin", "/root/bin/debug", "/root/obj"]);
        assert_eq!(collapsed, paths(&["/root/bin", "/root/obj"]));
    }

    #[test]
    fn test_collapse_is_component_wise() {
        let collapsed = collapse_output_directories(["/a/b", "/a/bc", "/a/b/c"]);
        assert_eq!(collapsed, paths(&["/a/b", "/a/bc"]));
    }

    #[test]
    fn test_collapse_order_independent() {
        let forward = collapse_output_directories(["/r/x/y", "/r/x", "/r/z", "/r/z/w/v"]);
        let backward = collapse_output_directories(["/r/z/w/v", "/r/z", "/r/x", "/r/x/y"]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_collapse_idempotent() {
        let once = collapse_output_directories(["/r/a", "/r/a/b", "/r/c/d", "/r/c"]);
        let twice = collapse_output_directories(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_collapse_removes_duplicates() {
        let collapsed = collapse_output_directories(["/r/out", "/r/out"]);
        assert_eq!(collapsed, paths(&["/r/out"]));
    }

    #[test]
    fn test_collapse_empty() {
        let collapsed = collapse_output_directories(Vec::<PathBuf>::new());
        assert!(collapsed.is_empty());
    }

    #[test]
    fn test_collapse_separated_descendant() {
        // As a string "/a/b-x" sorts between "/a/b" and "/a/b/c"
        let collapsed = collapse_output_directories(["/a/b", "/a/b-x", "/a/b/c"]);
        assert_eq!(collapsed, paths(&["/a/b", "/a/b-x"]));
    }
}
