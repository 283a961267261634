/// Decides whether a selected or dropped file belongs in an upload at all.
pub trait AcceptancePolicy: Send + Sync {
    fn is_acceptable(&self, name: &str, relative_path: Option<&str>) -> bool;
}

const IGNORED_NAMES: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini"];
const IGNORED_DIRS: &[&str] = &["__MACOSX", ".git", ".svn", ".texpadtmp"];

/// Drops OS and version-control metadata that editors and archivers leave behind.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAcceptancePolicy;

impl AcceptancePolicy for DefaultAcceptancePolicy {
    fn is_acceptable(&self, name: &str, relative_path: Option<&str>) -> bool {
        if is_ignored_name(name) {
            return false;
        }
        let Some(relative_path) = relative_path else {
            return true;
        };
        let mut segments = relative_path.split('/').filter(|s| !s.is_empty()).peekable();
        while let Some(segment) = segments.next() {
            let is_last = segments.peek().is_none();
            if is_last {
                if is_ignored_name(segment) {
                    return false;
                }
            } else if IGNORED_DIRS.contains(&segment) {
                return false;
            }
        }
        true
    }
}

fn is_ignored_name(name: &str) -> bool {
    IGNORED_NAMES.contains(&name) || name.starts_with("._")
}
