use std::path::PathBuf;

use crankd_core::platform::AppPaths;

#[derive(Default)]
pub struct LinuxPaths;

impl AppPaths for LinuxPaths {
    fn config_path(&self, privileged: bool) -> PathBuf {
        if privileged {
            return PathBuf::from("/etc/crankd.toml");
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("crankd")
            .join("crankd.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_uses_system_location() {
        assert_eq!(LinuxPaths.config_path(true), PathBuf::from("/etc/crankd.toml"));
    }

    #[test]
    fn users_get_their_config_dir() {
        let path = LinuxPaths.config_path(false);
        assert!(path.ends_with("crankd/crankd.toml"));
    }
}
