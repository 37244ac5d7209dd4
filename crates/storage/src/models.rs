use crate::CachePath;
use time::OffsetDateTime;

/// The files a single cached URL can own, told apart by file-name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArtifactKind {
    /// `<path>.html`, the page served to visitors.
    Page,
    /// `<path>.php`, replays status and headers in front of the page.
    Php,
    /// `<path>.stale.html`, shown while the page is being regenerated.
    Stale,
}
impl ArtifactKind {
    pub const ALL: [Self; 3] = [Self::Page, Self::Php, Self::Stale];

    pub fn suffix(self) -> &'static str {
        match self {
            Self::Page => ".html",
            Self::Php => ".php",
            Self::Stale => ".stale.html",
        }
    }

    /// Classify a file name. The stale suffix is checked first since it also
    /// ends in `.html`.
    pub fn of(file_name: &str) -> Option<Self> {
        [Self::Stale, Self::Page, Self::Php].into_iter().find(|kind| file_name.ends_with(kind.suffix()))
    }

    /// Where the artifact of this kind lives for the cache path stem `stem`
    /// (a mapped URL without any suffix).
    pub fn locate(self, stem: &str) -> crate::error::Result<CachePath> {
        CachePath::parse(format!("{stem}{}", self.suffix()))
    }
}

/// A file found while walking the cache directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
    pub path: CachePath,
    pub size: u64,
    pub modified: OffsetDateTime,
}
impl CachedFile {
    /// `None` for anything the publisher did not write, such as assets
    /// dropped into the cache directory by hand.
    pub fn kind(&self) -> Option<ArtifactKind> {
        ArtifactKind::of(self.path.file_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("index.html", Some(ArtifactKind::Page))]
    #[case("blog/post.php", Some(ArtifactKind::Php))]
    #[case("blog/post.stale.html", Some(ArtifactKind::Stale))]
    #[case("robots.txt", None)]
    #[case("styles.html.gz", None)]
    fn test_kind(#[case] path: &str, #[case] expected: Option<ArtifactKind>) {
        let file = CachedFile { path: CachePath::parse(path).unwrap(), size: 0, modified: OffsetDateTime::UNIX_EPOCH };
        assert_eq!(file.kind(), expected);
    }

    #[test]
    fn test_locate() {
        let paths: Vec<_> = ArtifactKind::ALL.iter().map(|kind| kind.locate("blog/post").unwrap().to_string()).collect();
        assert_eq!(paths, ["blog/post.html", "blog/post.php", "blog/post.stale.html"]);
        assert!(ArtifactKind::Page.locate("../post").is_err());
    }
}
