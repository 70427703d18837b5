use std::path::PathBuf;

use crankd_core::platform::AppPaths;

const FILE_NAME: &str = "crankd.toml";

/// Configuration lives in the Preferences folder of the domain we run in:
/// `/Library` for root, `~/Library` for everyone else.
#[derive(Default)]
pub struct MacPaths;

impl AppPaths for MacPaths {
    fn config_path(&self, privileged: bool) -> PathBuf {
        let mut base = if privileged {
            PathBuf::from("/")
        } else {
            dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
        };
        base.push("Library");
        base.push("Preferences");
        base.push(FILE_NAME);
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_uses_local_domain() {
        assert_eq!(
            MacPaths.config_path(true),
            PathBuf::from("/Library/Preferences/crankd.toml")
        );
    }

    #[test]
    fn users_use_their_library() {
        assert!(
            MacPaths
                .config_path(false)
                .ends_with("Library/Preferences/crankd.toml")
        );
    }
}
