use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use crate::runtime::RuntimeFunction;

/// Counts calls into the runtime library by fully qualified name.
///
/// A `Coverage` is a handle: clones share one table, so a test harness can
/// keep a clone and take snapshots while a [`Machine`](super::Machine) it
/// handed the other clone to is still running. Runs without a handle record
/// nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Coverage {
    counts: Rc<RefCell<BTreeMap<String, u64>>>,
}

impl Coverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, function: RuntimeFunction) {
        *self
            .counts
            .borrow_mut()
            .entry(function.name().into())
            .or_default() += 1;
    }

    pub fn count(&self, name: &str) -> u64 {
        self.counts.borrow().get(name).copied().unwrap_or_default()
    }

    /// A copy of the table as it is now. Later calls do not change it.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counts.borrow().clone()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&*self.counts.borrow())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_by_qualified_name() {
        let coverage = Coverage::new();
        coverage.record(RuntimeFunction::IoPrintln);
        coverage.record(RuntimeFunction::IoPrintln);
        coverage.record(RuntimeFunction::MathAbs);

        assert_eq!(coverage.count("std.io.println"), 2);
        assert_eq!(coverage.count("std.io.print"), 0);

        let snapshot = coverage.snapshot();
        assert_eq!(snapshot.len(), 2);

        let json: BTreeMap<String, u64> = serde_json::from_str(&coverage.to_json().unwrap()).unwrap();
        assert_eq!(json, snapshot);
    }

    #[test]
    fn clones_share_one_table() {
        let coverage = Coverage::new();
        let handle = coverage.clone();
        let before = coverage.snapshot();

        handle.record(RuntimeFunction::StringLength);

        assert_eq!(coverage.count("std.string.length"), 1);
        assert!(before.is_empty());
    }

    #[test]
    fn overloads_share_their_library_name() {
        let coverage = Coverage::new();
        coverage.record(RuntimeFunction::AssertEqInt);
        coverage.record(RuntimeFunction::AssertEqString);

        assert_eq!(coverage.count("std.assert.eq"), 2);
    }
}
