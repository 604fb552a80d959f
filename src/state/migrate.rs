//! Forward migration of the state document.
//!
//! Runs on the raw JSON value before schema validation so that shapes the
//! current types no longer accept can still be upgraded.

use serde_json::Value;

use crate::domain::CURRENT_STATE_VERSION;

/// Versions this build knows how to upgrade.
const LEGACY_VERSIONS: &[u64] = &[1];

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Migration {
    /// Already at the current version.
    Current,
    /// Upgraded in place. `from` is `None` when the document carried no version.
    Migrated { from: Option<u64> },
    /// Newer or unrecognized version; must not be touched.
    Unsupported(u64),
}

/// Upgrade `doc` in place to the current version where possible.
///
/// `Err` carries a schema message for documents that are not objects or
/// carry a non-integer version.
pub(super) fn migrate(doc: &mut Value) -> Result<Migration, String> {
    let obj = doc
        .as_object_mut()
        .ok_or_else(|| "top-level value must be an object".to_string())?;

    let from = match obj.get("stateVersion") {
        None => None,
        Some(v) => Some(
            v.as_u64()
                .ok_or_else(|| format!("stateVersion must be a non-negative integer, got {}", v))?,
        ),
    };

    match from {
        Some(v) if v == u64::from(CURRENT_STATE_VERSION) => Ok(Migration::Current),
        Some(v) if !LEGACY_VERSIONS.contains(&v) => Ok(Migration::Unsupported(v)),
        _ => {
            // v1 and unversioned documents share the v2 layout; only the stamp differs.
            obj.insert(
                "stateVersion".to_string(),
                Value::from(CURRENT_STATE_VERSION),
            );
            obj.entry("agents")
                .or_insert_with(|| Value::Object(Default::default()));
            Ok(Migration::Migrated { from })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unversioned_document_is_stamped() {
        let mut doc = json!({ "agents": {} });
        assert_eq!(migrate(&mut doc), Ok(Migration::Migrated { from: None }));
        assert_eq!(doc["stateVersion"], json!(CURRENT_STATE_VERSION));
    }

    #[test]
    fn test_legacy_version_is_upgraded() {
        let mut doc = json!({ "stateVersion": 1 });
        assert_eq!(migrate(&mut doc), Ok(Migration::Migrated { from: Some(1) }));
        assert_eq!(doc["stateVersion"], json!(CURRENT_STATE_VERSION));
        assert_eq!(doc["agents"], json!({}));
    }

    #[test]
    fn test_current_and_future_versions() {
        let mut doc = json!({ "stateVersion": CURRENT_STATE_VERSION, "agents": {} });
        assert_eq!(migrate(&mut doc), Ok(Migration::Current));

        let mut doc = json!({ "stateVersion": 99, "agents": {} });
        assert_eq!(migrate(&mut doc), Ok(Migration::Unsupported(99)));
        assert_eq!(doc["stateVersion"], json!(99));
    }

    #[test]
    fn test_invalid_shapes() {
        assert!(migrate(&mut json!([1, 2, 3])).is_err());
        assert!(migrate(&mut json!({ "stateVersion": "two" })).is_err());
        assert!(migrate(&mut json!({ "stateVersion": -1 })).is_err());
    }
}
