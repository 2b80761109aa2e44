use rowsync_core::TableDescriptor;
use rowsync_engine::{EngineError, SyncSummary};
use rowsync_storage::StorageError;

use crate::TestPeer;

pub struct TestNetwork {
    peers: Vec<TestPeer>,
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl TestNetwork {
    pub fn new() -> Self {
        Self { peers: Vec::new() }
    }

    pub fn add_peer(&mut self, name: &str) -> Result<usize, EngineError> {
        let peer = TestPeer::new(name)?;
        let index = self.peers.len();
        self.peers.push(peer);
        Ok(index)
    }

    /// Creates and provisions `table` on every peer.
    pub fn create_table(&mut self, table: &TableDescriptor, ddl: &str) -> Result<(), StorageError> {
        for peer in &mut self.peers {
            peer.create_table(table, ddl)?;
        }
        Ok(())
    }

    pub fn peer(&self, index: usize) -> &TestPeer {
        &self.peers[index]
    }

    pub fn peer_mut(&mut self, index: usize) -> &mut TestPeer {
        &mut self.peers[index]
    }

    /// `target` pulls from `source`.
    pub fn pull(
        &mut self,
        target: usize,
        source: usize,
        tables: &[TableDescriptor],
    ) -> Result<SyncSummary, Box<dyn std::error::Error>> {
        assert_ne!(target, source, "a peer cannot pull from itself");
        let (target, source) = if target < source {
            let (low, high) = self.peers.split_at_mut(source);
            (&mut low[target], &high[0])
        } else {
            let (low, high) = self.peers.split_at_mut(target);
            (&mut high[0], &low[source])
        };
        target.pull_from(source, tables)
    }

    /// Pulls both ways, `a` first.
    pub fn sync(
        &mut self,
        a: usize,
        b: usize,
        tables: &[TableDescriptor],
    ) -> Result<(SyncSummary, SyncSummary), Box<dyn std::error::Error>> {
        let first = self.pull(a, b, tables)?;
        let second = self.pull(b, a, tables)?;
        Ok((first, second))
    }
}
