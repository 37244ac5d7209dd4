//! Content manifests: the CMS's content tree exported as JSON.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use staticpub_library::content::MemoryTree;
use std::path::Path;

pub async fn load(base_url: &str, path: &Path) -> Result<MemoryTree> {
    let raise = || ErrorKind::Manifest(path.to_path_buf());
    let json = tokio::fs::read_to_string(path).await.or_raise(raise)?;
    let tree = MemoryTree::from_json(base_url, &json).or_raise(raise)?;
    tracing::debug!(path = %path.display(), nodes = tree.len(), "loaded content manifest");
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use staticpub_library::content::{ContentTree, Publishable};
    use tempfile::TempDir;

    const BASE: &str = "https://example.com/";

    #[tokio::test]
    async fn test_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("content.json");
        std::fs::write(
            &path,
            r#"{"nodes": [
                {"id": 1, "segment": "home"},
                {"id": 2, "segment": "about", "priority": 5},
                {"id": 3, "parent": 2, "segment": "team", "live": false}
            ]}"#,
        )
        .unwrap();
        let tree = load(BASE, &path).await.unwrap();
        assert_eq!(tree.len(), 3);
        let team = tree.node(3).unwrap();
        assert!(!team.live);
        assert_eq!(team.urls_to_cache().into_keys().collect::<Vec<_>>(), vec!["https://example.com/about/team/"]);
    }

    #[tokio::test]
    async fn test_missing_and_malformed() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.json");
        let err = load(BASE, &missing).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Manifest(p) if p == &missing));

        let malformed = dir.path().join("malformed.json");
        std::fs::write(&malformed, "[]").unwrap();
        assert!(load(BASE, &malformed).await.is_err());
    }
}
