//! Shared helpers: timestamps, run ids and URN parsing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static RUN_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Current time as milliseconds since Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Generate a unique upgrade run id.
pub fn new_run_id() -> String {
    let ts = now_millis();
    let pid = std::process::id();
    let seq = RUN_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("run-{ts}-{pid}-{seq}")
}

/// Entity type encoded in an entity URN.
///
/// `urn:li:dataJob:(urn:li:dataFlow:(airflow,etl,prod),load)` yields `dataJob`.
pub fn entity_type_of(urn: &str) -> Option<&str> {
    let rest = urn.strip_prefix("urn:li:")?;
    let end = rest.find(':')?;
    let entity_type = &rest[..end];
    if entity_type.is_empty() {
        None
    } else {
        Some(entity_type)
    }
}

/// URN of the marker entity recording the outcome of a named upgrade unit.
pub fn upgrade_marker_urn(id: &str) -> String {
    format!("urn:li:dataHubUpgrade:{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ids_are_unique() {
        let a = new_run_id();
        let b = new_run_id();
        assert_ne!(a, b);
        assert!(a.starts_with("run-"));
    }

    #[test]
    fn entity_type_is_parsed_from_nested_urns() {
        assert_eq!(
            entity_type_of("urn:li:dataJob:(urn:li:dataFlow:(airflow,etl,prod),load)"),
            Some("dataJob")
        );
        assert_eq!(entity_type_of("urn:li:corpuser:datahub"), Some("corpuser"));
        assert_eq!(entity_type_of("not-a-urn"), None);
        assert_eq!(entity_type_of("urn:li::x"), None);
    }
}
