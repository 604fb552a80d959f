//! Mapping raw filesystem events into a repository's logical path space.

use notify::{Event, EventKind};
use std::path::Path;

use crate::domain::RepoConfig;
use crate::workspace::{is_included, logical_from_absolute};

/// Logical paths worth syncing for one raw event.
///
/// Access events, paths outside the repository's `base_path` scope, the
/// state file itself and anything the inclusion rules reject are dropped.
pub fn event_paths(config: &RepoConfig, state_file: &Path, event: &Event) -> Vec<String> {
    if matches!(event.kind, EventKind::Access(_)) {
        return Vec::new();
    }

    event
        .paths
        .iter()
        .filter(|path| path.as_path() != state_file)
        .filter_map(|path| logical_from_absolute(config, path))
        .filter(|logical| is_included(config, logical))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind};
    use std::path::PathBuf;

    fn event(kind: EventKind, paths: &[PathBuf]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |e, p| e.add_path(p.clone()))
    }

    #[test]
    fn test_maps_into_logical_space() {
        let root = PathBuf::from("/repos/mono");
        let mut config = RepoConfig::new(&root);
        config.base_path = Some("packages/web".to_string());

        let e = event(
            EventKind::Modify(ModifyKind::Any),
            &[
                root.join("packages/web/src/app.ts"),
                root.join("packages/api/src/server.ts"),
            ],
        );
        assert_eq!(
            event_paths(&config, Path::new("/elsewhere/state.json"), &e),
            vec!["src/app.ts".to_string()]
        );
    }

    #[test]
    fn test_drops_state_file_and_excluded_paths() {
        let root = PathBuf::from("/repos/app");
        let config = RepoConfig::new(&root);
        let state_file = root.join("memsync-state.json");

        let e = event(
            EventKind::Create(CreateKind::File),
            &[
                state_file.clone(),
                root.join("node_modules/dep/index.js"),
                root.join("logo.png"),
                root.join("src/main.rs"),
            ],
        );
        assert_eq!(
            event_paths(&config, &state_file, &e),
            vec!["src/main.rs".to_string()]
        );
    }

    #[test]
    fn test_ignores_access_events() {
        let root = PathBuf::from("/repos/app");
        let config = RepoConfig::new(&root);
        let e = event(EventKind::Access(AccessKind::Any), &[root.join("src/main.rs")]);
        assert!(event_paths(&config, Path::new("/state.json"), &e).is_empty());
    }
}
