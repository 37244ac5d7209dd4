//! Artifact templates embedded into the binary at compile time using
//! [`rust-embed`](rust_embed).

use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use rust_embed::Embed;

#[derive(Embed)]
#[folder = "../../assets/templates/"]
pub(crate) struct Builtins;
impl Builtins {
    /// Template source for a builtin artifact by file name.
    pub(crate) fn load(name: &str) -> Result<String> {
        let file = Self::get(name).ok_or_raise(|| ErrorKind::Template)?;
        String::from_utf8(file.data.into_owned()).or_raise(|| ErrorKind::Template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("wrapper.php")]
    #[case("redirect.php")]
    #[case("redirect.html")]
    fn test_builtin_exists(#[case] name: &str) {
        assert!(!Builtins::load(name).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_builtin() {
        let err = Builtins::load("missing.tmpl").unwrap_err();
        assert!(matches!(&*err, ErrorKind::Template));
    }
}
