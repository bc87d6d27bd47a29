//! The operator's case list, persisted through a [`KvStore`].
//!
//! Every mutation builds the new list, writes it, and only then swaps it in,
//! so a failed write leaves the in-memory list untouched.

use std::sync::{Arc, RwLock};

use tag_core::{Case, CaseError, format_cases, parse_cases};
use thiserror::Error;
use tracing::info;

use crate::store::{KvStore, StoreError};

pub const CASES_KEY: &str = "cases";

#[derive(Debug, Error)]
pub enum CaseBookError {
    #[error("case {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Case(#[from] CaseError),
    #[error("import contained no cases")]
    EmptyImport,
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("case list lock poisoned")]
    Poisoned,
}

pub struct CaseBook {
    store: Arc<dyn KvStore>,
    cases: RwLock<Vec<Case>>,
}

impl CaseBook {
    /// Load the persisted list, or start empty when nothing is stored yet.
    pub fn load(store: Arc<dyn KvStore>) -> Result<Self, CaseBookError> {
        let cases = match store.get(CASES_KEY)? {
            Some(json) => serde_json::from_str(&json)?,
            None => Vec::new(),
        };
        Ok(Self {
            store,
            cases: RwLock::new(cases),
        })
    }

    pub fn list(&self) -> Vec<Case> {
        self.cases.read().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.cases.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add(&self, master_tag: &str, product_tags: &[String]) -> Result<Case, CaseBookError> {
        let case = Case::new(master_tag, product_tags.iter().map(String::as_str))?;
        let added = case.clone();
        self.mutate(|cases| {
            cases.push(case);
            Ok(())
        })?;
        info!(case_id = %added.id, master = %added.master_tag, "case added");
        Ok(added)
    }

    pub fn remove(&self, case_id: &str) -> Result<(), CaseBookError> {
        self.mutate(|cases| {
            let before = cases.len();
            cases.retain(|c| c.id != case_id);
            if cases.len() == before {
                return Err(CaseBookError::NotFound(case_id.to_owned()));
            }
            Ok(())
        })
    }

    /// Flip the expired flag on one product tag of one case. Returns the new flag.
    pub fn toggle_expired(&self, case_id: &str, tag: &str) -> Result<bool, CaseBookError> {
        let mut flag = false;
        self.mutate(|cases| {
            let case = cases
                .iter_mut()
                .find(|c| c.id == case_id)
                .ok_or_else(|| CaseBookError::NotFound(case_id.to_owned()))?;
            flag = case.toggle_expired(tag)?;
            Ok(())
        })?;
        info!(case_id, tag, expired = flag, "expired flag toggled");
        Ok(flag)
    }

    /// Replace the whole list with the cases parsed from `text`.
    ///
    /// A parse that yields no case is rejected and the current list is kept.
    pub fn import_text(&self, text: &str) -> Result<usize, CaseBookError> {
        let imported = parse_cases(text);
        if imported.is_empty() {
            return Err(CaseBookError::EmptyImport);
        }
        let n = imported.len();
        self.mutate(|cases| {
            *cases = imported;
            Ok(())
        })?;
        info!(cases = n, "case list imported");
        Ok(n)
    }

    pub fn export_text(&self) -> String {
        format_cases(&self.list())
    }

    fn mutate<F>(&self, f: F) -> Result<(), CaseBookError>
    where
        F: FnOnce(&mut Vec<Case>) -> Result<(), CaseBookError>,
    {
        let mut guard = self.cases.write().map_err(|_| CaseBookError::Poisoned)?;
        let mut next = guard.clone();
        f(&mut next)?;
        self.store.set(CASES_KEY, &serde_json::to_string(&next)?)?;
        *guard = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreResult};

    fn book() -> (Arc<MemoryStore>, CaseBook) {
        let store = Arc::new(MemoryStore::new());
        let book = CaseBook::load(store.clone()).unwrap();
        (store, book)
    }

    #[test]
    fn add_persists_and_reloads() {
        let (store, book) = book();
        let case = book.add("M1", &["A".to_owned(), "B".to_owned()]).unwrap();

        let reloaded = CaseBook::load(store).unwrap();
        assert_eq!(reloaded.list(), vec![case]);
    }

    #[test]
    fn add_rejects_blank_master() {
        let (_, book) = book();
        assert!(matches!(
            book.add(" ", &[]),
            Err(CaseBookError::Case(CaseError::EmptyMasterTag))
        ));
        assert!(book.is_empty());
    }

    #[test]
    fn add_rejects_comment_like_product_tag() {
        let (_, book) = book();
        assert!(matches!(
            book.add("M1", &["#E200".to_owned()]),
            Err(CaseBookError::Case(CaseError::ReservedProductTag(_)))
        ));
        assert!(book.is_empty());
    }

    #[test]
    fn remove_unknown_case_is_not_found() {
        let (_, book) = book();
        book.add("M1", &[]).unwrap();
        assert!(matches!(book.remove("nope"), Err(CaseBookError::NotFound(_))));
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn toggle_expired_round_trips_through_store() {
        let (store, book) = book();
        let case = book.add("M1", &["A".to_owned()]).unwrap();
        assert!(book.toggle_expired(&case.id, "A").unwrap());

        let reloaded = CaseBook::load(store).unwrap();
        assert_eq!(reloaded.list()[0].expired_product_tags, vec!["A".to_owned()]);
        assert!(!reloaded.toggle_expired(&case.id, "A").unwrap());
    }

    #[test]
    fn empty_import_keeps_existing_cases() {
        let (_, book) = book();
        book.add("M1", &["A".to_owned()]).unwrap();
        assert!(matches!(
            book.import_text("# only comments\nA\nB\n"),
            Err(CaseBookError::EmptyImport)
        ));
        assert_eq!(book.len(), 1);
        assert_eq!(book.list()[0].master_tag, "M1");
    }

    #[test]
    fn import_replaces_existing_cases() {
        let (_, book) = book();
        book.add("OLD", &[]).unwrap();
        let n = book.import_text("MASTER M1\nA\nMASTER M2\nB\n").unwrap();
        assert_eq!(n, 2);
        let masters: Vec<String> = book.list().into_iter().map(|c| c.master_tag).collect();
        assert_eq!(masters, vec!["M1", "M2"]);
    }

    #[test]
    fn export_uses_text_format() {
        let (_, book) = book();
        book.add("M1", &["A".to_owned()]).unwrap();
        assert_eq!(book.export_text(), "MASTER M1\nA\n");
    }

    struct FailingStore;

    impl KvStore for FailingStore {
        fn get(&self, _key: &str) -> StoreResult<Option<String>> {
            Ok(None)
        }
        fn set(&self, _key: &str, _value: &str) -> StoreResult<()> {
            Err(StoreError::Poisoned)
        }
    }

    #[test]
    fn failed_write_leaves_list_untouched() {
        let book = CaseBook::load(Arc::new(FailingStore)).unwrap();
        assert!(matches!(book.add("M1", &[]), Err(CaseBookError::Store(_))));
        assert!(book.is_empty());
    }
}
