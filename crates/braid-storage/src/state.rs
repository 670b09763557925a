//! Placeholder state database.
//!
//! Transaction execution is a stub in this milestone: applying a
//! transaction never mutates state, so the state database only carries its
//! root and a revision journal deep enough to support the executor's
//! snapshot/revert discipline.

use braid_types::Hash;

/// A view of account state at a specific root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDb {
    root: Hash,
    revision: usize,
}

impl StateDb {
    pub fn at(root: Hash) -> Self {
        Self { root, revision: 0 }
    }

    pub fn root(&self) -> Hash {
        self.root
    }

    /// Take a snapshot; pass the returned token to
    /// [`revert_to`](Self::revert_to) to roll back.
    pub fn snapshot(&mut self) -> usize {
        self.revision += 1;
        self.revision
    }

    pub fn revert_to(&mut self, snapshot: usize) {
        self.revision = snapshot.saturating_sub(1);
    }

    /// Finalize and return the post-state root. With the stub executor the
    /// root never moves.
    pub fn commit(&self) -> Hash {
        self.root
    }
}
