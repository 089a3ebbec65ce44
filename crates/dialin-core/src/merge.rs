//! Last-write-wins merge of a remote record into the local replica.

use crate::models::{EntityPayload, Record};

/// What applying a remote record should do to the local replica.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome<P> {
    /// Replace (or insert) the local copy with this remote version
    AdoptRemote(Record<P>),
    /// Keep the local copy untouched
    NoChange,
}

/// Decide between a local and a remote version of the same record.
///
/// The remote wins only when it is strictly newer by `updated_at`; on a tie
/// the local copy is kept. An adopted remote is marked clean. Tombstones
/// compare like any other version, so a newer delete beats an older edit and
/// a newer edit beats an older delete.
pub fn merge<P: EntityPayload>(local: Option<&Record<P>>, remote: Record<P>) -> MergeOutcome<P> {
    if let Some(local) = local {
        if remote.updated_at <= local.updated_at {
            return MergeOutcome::NoChange;
        }
    }

    let mut adopted = remote;
    adopted.is_dirty = false;
    MergeOutcome::AdoptRemote(adopted)
}
