//! Apply-wave ordering.

use std::collections::BTreeMap;

use kube::ResourceExt;
use lca_cluster::DynamicObject;

use crate::{BackupError, APPLY_WAVE_ANNOTATION, DEFAULT_APPLY_WAVE};

/// Group backups by apply-wave, ascending, with names ascending inside a
/// group.
///
/// A missing or empty annotation means [`DEFAULT_APPLY_WAVE`]. Any
/// non-integer value fails the whole call.
pub fn sort_by_apply_wave(backups: Vec<DynamicObject>) -> Result<Vec<Vec<DynamicObject>>, BackupError> {
    let mut waves: BTreeMap<i64, Vec<DynamicObject>> = BTreeMap::new();

    for backup in backups {
        let wave = match backup.annotations().get(APPLY_WAVE_ANNOTATION).map(String::as_str) {
            None | Some("") => DEFAULT_APPLY_WAVE,
            Some(value) => value.parse().map_err(|source| BackupError::InvalidApplyWave {
                name: backup.name_any(),
                value: value.to_string(),
                source,
            })?,
        };
        waves.entry(wave).or_default().push(backup);
    }

    Ok(waves
        .into_values()
        .map(|mut group| {
            group.sort_by_key(|backup| backup.name_any());
            group
        })
        .collect())
}
