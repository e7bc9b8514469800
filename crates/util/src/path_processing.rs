use std::path::PathBuf;

use dirs_next::home_dir;

/// Expand a leading `~` in a user-supplied path.
///
/// Only the current user's home is supported (`~`, `~/rest`, `~\rest`);
/// anything else is returned trimmed and otherwise unchanged.
pub fn expand_tilde(path: &str) -> PathBuf {
    let trimmed = path.trim();
    let home = || home_dir().unwrap_or_else(|| PathBuf::from("~"));
    if trimmed == "~" {
        return home();
    }
    match trimmed.strip_prefix("~/").or_else(|| trimmed.strip_prefix("~\\")) {
        Some(rest) => home().join(rest),
        None => PathBuf::from(trimmed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_absolute_paths_alone() {
        assert_eq!(expand_tilde(" /etc/stepwise.json "), PathBuf::from("/etc/stepwise.json"));
    }

    #[test]
    fn expands_home_prefix() {
        let Some(home) = home_dir() else {
            return;
        };
        assert_eq!(expand_tilde("~/stepwise/settings.json"), home.join("stepwise/settings.json"));
        assert_eq!(expand_tilde("~"), home);
    }
}
