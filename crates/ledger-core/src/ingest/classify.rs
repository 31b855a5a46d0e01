//! Account-name to classification-code resolution with a per-run cache.

use std::collections::HashMap;

use tracing::warn;

use crate::models::{particular_key, ClassificationSet};
use crate::store::master::MasterData;

pub struct ClassificationResolver<'a> {
    master: &'a dyn MasterData,
    cache: HashMap<String, Option<ClassificationSet>>,
}

impl<'a> ClassificationResolver<'a> {
    pub fn new(master: &'a dyn MasterData) -> Self {
        Self {
            master,
            cache: HashMap::new(),
        }
    }

    /// Codes for `particular`, or `None` when the account is unclassified.
    /// Lookup errors are logged and read as "unclassified"; they are not
    /// cached, so the next row with the same name asks again.
    pub fn resolve(&mut self, particular: &str) -> Option<ClassificationSet> {
        let key = particular_key(particular);
        if key.is_empty() {
            return None;
        }
        if let Some(hit) = self.cache.get(&key) {
            return hit.clone();
        }
        match self.master.lookup_classification(&key) {
            Ok(found) => {
                self.cache.insert(key, found.clone());
                found
            }
            Err(e) => {
                warn!(particular, error = %e, "classification lookup failed");
                None
            }
        }
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{LedgerError, LedgerResult};
    use crate::models::{EntityRecord, PeriodRecord, PeriodRef};
    use crate::store::master::InMemoryMasterData;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        inner: InMemoryMasterData,
        calls: AtomicUsize,
        fail: bool,
    }

    impl MasterData for Counting {
        fn lookup_entity(&self, id: i64) -> LedgerResult<Option<EntityRecord>> {
            self.inner.lookup_entity(id)
        }

        fn lookup_period(&self, period: &PeriodRef) -> LedgerResult<Option<PeriodRecord>> {
            self.inner.lookup_period(period)
        }

        fn lookup_classification(&self, particular: &str) -> LedgerResult<Option<ClassificationSet>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LedgerError::Database("code_master unavailable".to_string()));
            }
            self.inner.lookup_classification(particular)
        }
    }

    fn codes(primary: &str) -> ClassificationSet {
        ClassificationSet {
            primary_code: Some(primary.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_normalised_names_share_one_lookup() {
        let master = Counting {
            inner: InMemoryMasterData::new().with_classification("Sundry Debtors", codes("1200")),
            calls: AtomicUsize::new(0),
            fail: false,
        };
        let mut resolver = ClassificationResolver::new(&master);

        assert_eq!(resolver.resolve("Sundry Debtors"), Some(codes("1200")));
        assert_eq!(resolver.resolve("  SUNDRY   debtors "), Some(codes("1200")));
        assert_eq!(resolver.resolve("Unknown"), None);
        assert_eq!(resolver.resolve("unknown"), None);
        assert_eq!(master.calls.load(Ordering::SeqCst), 2);
        assert_eq!(resolver.cached(), 2);
    }

    #[test]
    fn test_lookup_error_reads_as_unclassified() {
        let master = Counting {
            inner: InMemoryMasterData::new(),
            calls: AtomicUsize::new(0),
            fail: true,
        };
        let mut resolver = ClassificationResolver::new(&master);

        assert_eq!(resolver.resolve("Cash"), None);
        assert_eq!(resolver.resolve("Cash"), None);
        assert_eq!(master.calls.load(Ordering::SeqCst), 2);
        assert_eq!(resolver.cached(), 0);
    }

    #[test]
    fn test_blank_name_skips_lookup() {
        let master = Counting {
            inner: InMemoryMasterData::new(),
            calls: AtomicUsize::new(0),
            fail: false,
        };
        let mut resolver = ClassificationResolver::new(&master);
        assert_eq!(resolver.resolve("   "), None);
        assert_eq!(master.calls.load(Ordering::SeqCst), 0);
    }
}
