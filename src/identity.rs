use indexmap::IndexSet;

use crate::models::RecordSet;

/// Collects every distinct employee name in first-occurrence order: self
/// assessments first, then rated employees of peer assessments, then average
/// records. Names are compared exactly; empty or missing names are skipped.
pub fn resolve_identities(records: &RecordSet) -> IndexSet<String> {
    let self_names = records
        .self_records
        .iter()
        .filter_map(|record| record.employee());
    let peer_names = records
        .peer_records
        .iter()
        .filter_map(|record| record.employee());
    let average_names = records
        .average_records
        .iter()
        .filter_map(|record| record.employee());

    self_names
        .chain(peer_names)
        .chain(average_names)
        .map(str::to_string)
        .collect()
}
