//! The memo table that backs PUT/GET emission.
//!
//! The pickle memo is a flat array on the unpickler side; here each slot
//! is associated with the reason it was created, so variables, imported
//! globals and statement-internal scratch values all share one dense
//! index space.

use rustc_hash::FxHashMap;

/// What a memo slot stands for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemoKey {
    /// A source-level variable name.
    Name(String),
    /// An imported global, keyed by module and qualified name.
    Global {
        /// The module the object lives in
        module: String,
        /// The qualified name within the module
        name: String,
    },
    /// An internal slot used while translating a single statement.
    Scratch(u32),
}

/// Allocates memo slots and tracks which key each one is bound to.
#[derive(Debug, Default)]
pub struct MemoTable {
    slots: FxHashMap<MemoKey, u32>,
    next: u32,
}

impl MemoTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `key` to a fresh slot and returns its index.
    ///
    /// A key that was already bound is moved to the new slot; the old
    /// slot is retired and its index never handed out again. Indices are
    /// therefore dense in bind order, which is exactly the invariant the
    /// self-indexing MEMOIZE opcode needs.
    pub fn bind(&mut self, key: MemoKey) -> u32 {
        let index = self.next;
        self.next += 1;
        self.slots.insert(key, index);
        index
    }

    /// Returns the slot currently bound to `key`, if any.
    pub fn slot(&self, key: &MemoKey) -> Option<u32> {
        self.slots.get(key).copied()
    }

    /// Total number of slots allocated, including retired ones.
    pub fn allocated(&self) -> u32 {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_are_dense() {
        let mut memo = MemoTable::new();
        assert_eq!(memo.bind(MemoKey::Name("a".into())), 0);
        assert_eq!(memo.bind(MemoKey::Name("b".into())), 1);
        assert_eq!(memo.bind(MemoKey::Scratch(0)), 2);
        assert_eq!(memo.allocated(), 3);
    }

    #[test]
    fn test_rebinding_allocates_a_fresh_slot() {
        let mut memo = MemoTable::new();
        memo.bind(MemoKey::Name("x".into()));
        memo.bind(MemoKey::Name("y".into()));
        let rebound = memo.bind(MemoKey::Name("x".into()));
        assert_eq!(rebound, 2);
        assert_eq!(memo.slot(&MemoKey::Name("x".into())), Some(2));
        // The retired slot 0 stays allocated but unreachable
        assert_eq!(memo.allocated(), 3);
    }

    #[test]
    fn test_global_keys_are_distinct_from_names() {
        let mut memo = MemoTable::new();
        memo.bind(MemoKey::Name("add".into()));
        let global = MemoKey::Global {
            module: "operator".into(),
            name: "add".into(),
        };
        assert_eq!(memo.slot(&global), None);
        memo.bind(global.clone());
        assert_eq!(memo.slot(&global), Some(1));
    }

    #[test]
    fn test_unbound_key_has_no_slot() {
        let memo = MemoTable::new();
        assert_eq!(memo.slot(&MemoKey::Name("ghost".into())), None);
    }
}
