use rowsync_core::{ApplyAction, Conflict, TableDescriptor};
use rowsync_storage::RowReader;

use crate::options::ConflictResolutionPolicy;

/// Decision hook consulted once per conflict. `reader` sees the same
/// connection and transaction the pass is running in.
pub trait ConflictPolicy {
    fn resolve(
        &self,
        conflict: &Conflict,
        table: &TableDescriptor,
        reader: &dyn RowReader,
    ) -> ApplyAction;
}

/// Keeps whatever the local store holds. The default policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerWins;

impl ConflictPolicy for ServerWins {
    fn resolve(&self, _: &Conflict, _: &TableDescriptor, _: &dyn RowReader) -> ApplyAction {
        ApplyAction::Continue
    }
}

/// Always rewrites the remote row over the local one.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientWins;

impl ConflictPolicy for ClientWins {
    fn resolve(&self, _: &Conflict, _: &TableDescriptor, _: &dyn RowReader) -> ApplyAction {
        ApplyAction::RetryWithForceWrite
    }
}

/// Adapts a closure into a policy.
pub struct FnPolicy<F>(pub F);

impl<F> FnPolicy<F>
where
    F: Fn(&Conflict, &TableDescriptor, &dyn RowReader) -> ApplyAction,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ConflictPolicy for FnPolicy<F>
where
    F: Fn(&Conflict, &TableDescriptor, &dyn RowReader) -> ApplyAction,
{
    fn resolve(
        &self,
        conflict: &Conflict,
        table: &TableDescriptor,
        reader: &dyn RowReader,
    ) -> ApplyAction {
        (self.0)(conflict, table, reader)
    }
}

pub fn builtin(policy: ConflictResolutionPolicy) -> Box<dyn ConflictPolicy> {
    match policy {
        ConflictResolutionPolicy::ServerWins => Box::new(ServerWins),
        ConflictResolutionPolicy::ClientWins => Box::new(ClientWins),
    }
}
