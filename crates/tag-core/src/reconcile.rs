//! Case reconciliation.
//!
//! Compares the set of distinct tags read so far against the case list and
//! classifies each case, plus the collection as a whole. Everything here is
//! recomputed from scratch on every call; there is no cached state to
//! invalidate when reads or cases change.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::TagId;
use crate::cases::Case;

/// Distinct tag ids observed so far.
pub type ReadSet = BTreeSet<TagId>;

/// Build a [`ReadSet`] from arbitrary ids, trimming and dropping blanks.
pub fn read_set_from<I, S>(ids: I) -> ReadSet
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    ids.into_iter()
        .map(|id| id.as_ref().trim().to_owned())
        .filter(|id| !id.is_empty())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Expired,
    Incomplete,
    Anomalous,
    Complete,
}

impl std::fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CaseStatus::Expired => "expired",
            CaseStatus::Incomplete => "incomplete",
            CaseStatus::Anomalous => "anomalous",
            CaseStatus::Complete => "complete",
        };
        f.write_str(s)
    }
}

/// Per-case view of a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseReport {
    pub case_id: String,
    pub master_tag: TagId,
    pub status: CaseStatus,
    /// Distinct expected tags that have been read.
    pub observed: usize,
    /// Distinct expected tags.
    pub expected: usize,
    /// Expected tags not yet read, master first.
    pub missing: Vec<TagId>,
    pub expired: Vec<TagId>,
}

impl CaseReport {
    /// Fraction of expected tags observed, in `0.0..=1.0`.
    pub fn progress(&self) -> f64 {
        if self.expected == 0 {
            return 1.0;
        }
        self.observed as f64 / self.expected as f64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub status: CaseStatus,
    pub cases: Vec<CaseReport>,
    /// Reads that belong to no case, in sorted order.
    pub unlisted: Vec<TagId>,
    pub complete_cases: usize,
}

/// Classify one case against `reads`. Never returns [`CaseStatus::Anomalous`];
/// that status only exists at the collection level.
pub fn case_status(case: &Case, reads: &ReadSet) -> CaseStatus {
    if case.is_expired() {
        return CaseStatus::Expired;
    }
    if case.expected_tags().iter().any(|tag| !reads.contains(tag)) {
        return CaseStatus::Incomplete;
    }
    CaseStatus::Complete
}

/// Expected tags of `case` that are absent from `reads`.
pub fn missing_tags(case: &Case, reads: &ReadSet) -> Vec<TagId> {
    case.expected_tags()
        .into_iter()
        .filter(|tag| !reads.contains(tag))
        .collect()
}

/// Reads that are not an expected tag of any case.
pub fn unlisted_tags(cases: &[Case], reads: &ReadSet) -> Vec<TagId> {
    let listed: BTreeSet<TagId> = cases.iter().flat_map(Case::expected_tags).collect();
    reads.difference(&listed).cloned().collect()
}

pub fn case_report(case: &Case, reads: &ReadSet) -> CaseReport {
    let expected = case.expected_tags();
    let missing: Vec<TagId> = expected
        .iter()
        .filter(|tag| !reads.contains(*tag))
        .cloned()
        .collect();
    CaseReport {
        case_id: case.id.clone(),
        master_tag: case.master_tag.clone(),
        status: case_status(case, reads),
        observed: expected.len() - missing.len(),
        expected: expected.len(),
        missing,
        expired: case.expired_product_tags.clone(),
    }
}

/// Reconcile the whole case collection against `reads`.
pub fn reconcile(cases: &[Case], reads: &ReadSet) -> Reconciliation {
    let reports: Vec<CaseReport> = cases.iter().map(|c| case_report(c, reads)).collect();
    let unlisted = unlisted_tags(cases, reads);
    let complete_cases = reports
        .iter()
        .filter(|r| r.status == CaseStatus::Complete)
        .count();

    let status = if reports.is_empty() {
        CaseStatus::Complete
    } else if reports.iter().any(|r| r.status == CaseStatus::Expired) {
        CaseStatus::Expired
    } else if !unlisted.is_empty() {
        CaseStatus::Anomalous
    } else if reports.iter().any(|r| r.status == CaseStatus::Incomplete) {
        CaseStatus::Incomplete
    } else {
        CaseStatus::Complete
    };

    Reconciliation {
        status,
        cases: reports,
        unlisted,
        complete_cases,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(master: &str, products: &[&str]) -> Case {
        Case::new(master, products.iter().copied()).unwrap()
    }

    #[test]
    fn missing_product_is_incomplete() {
        let c = case("M", &["A", "B"]);
        let reads = read_set_from(["M", "A"]);
        assert_eq!(case_status(&c, &reads), CaseStatus::Incomplete);
        assert_eq!(missing_tags(&c, &reads), vec!["B".to_owned()]);
    }

    #[test]
    fn missing_master_is_incomplete() {
        let c = case("M", &["A"]);
        let reads = read_set_from(["A"]);
        assert_eq!(case_status(&c, &reads), CaseStatus::Incomplete);
        assert_eq!(missing_tags(&c, &reads), vec!["M".to_owned()]);
    }

    #[test]
    fn all_read_is_complete() {
        let c = case("M", &["A", "B"]);
        let reads = read_set_from(["M", "A", "B"]);
        assert_eq!(case_status(&c, &reads), CaseStatus::Complete);
        assert!(missing_tags(&c, &reads).is_empty());
    }

    #[test]
    fn expired_flag_wins_regardless_of_reads() {
        let mut c = case("M", &["A", "B"]);
        c.toggle_expired("A").unwrap();
        assert_eq!(case_status(&c, &read_set_from(["M", "A", "B"])), CaseStatus::Expired);
        assert_eq!(case_status(&c, &ReadSet::new()), CaseStatus::Expired);
    }

    #[test]
    fn duplicate_expected_tags_need_one_read() {
        let c = case("M", &["M", "A", "A"]);
        let report = case_report(&c, &read_set_from(["M", "A"]));
        assert_eq!(report.status, CaseStatus::Complete);
        assert_eq!(report.expected, 2);
        assert_eq!(report.observed, 2);
    }

    #[test]
    fn padded_expected_tags_match_trimmed_reads() {
        let mut c = case("M", &["A"]);
        c.product_tags.push("  B  ".to_owned());
        let reads = read_set_from([" M", "A", "B "]);
        assert_eq!(case_status(&c, &reads), CaseStatus::Complete);
    }

    #[test]
    fn progress_counts_distinct_expected_tags() {
        let c = case("M", &["A", "B", "C"]);
        let report = case_report(&c, &read_set_from(["M", "C", "X"]));
        assert_eq!(report.observed, 2);
        assert_eq!(report.expected, 4);
        assert!((report.progress() - 0.5).abs() < f64::EPSILON);
        assert_eq!(report.missing, vec!["A".to_owned(), "B".to_owned()]);
    }

    #[test]
    fn no_cases_is_complete_even_with_reads() {
        let result = reconcile(&[], &read_set_from(["X"]));
        assert_eq!(result.status, CaseStatus::Complete);
        assert_eq!(result.unlisted, vec!["X".to_owned()]);
        assert_eq!(result.complete_cases, 0);
    }

    #[test]
    fn unlisted_read_makes_collection_anomalous() {
        let cases = vec![case("M1", &["A"]), case("M2", &["B"])];
        let result = reconcile(&cases, &read_set_from(["M1", "A", "M2", "B", "X"]));
        assert_eq!(result.status, CaseStatus::Anomalous);
        assert_eq!(result.unlisted, vec!["X".to_owned()]);
        assert_eq!(result.complete_cases, 2);
    }

    #[test]
    fn anomalous_outranks_incomplete() {
        let cases = vec![case("M1", &["A"])];
        let result = reconcile(&cases, &read_set_from(["M1", "X"]));
        assert_eq!(result.status, CaseStatus::Anomalous);
        assert_eq!(result.cases[0].status, CaseStatus::Incomplete);
    }

    #[test]
    fn expired_outranks_anomalous() {
        let mut expired = case("M1", &["A"]);
        expired.toggle_expired("A").unwrap();
        let cases = vec![expired, case("M2", &["B"])];
        let result = reconcile(&cases, &read_set_from(["M2", "B", "X"]));
        assert_eq!(result.status, CaseStatus::Expired);
        assert_eq!(result.complete_cases, 1);
    }

    #[test]
    fn incomplete_when_nothing_unlisted() {
        let cases = vec![case("M1", &["A"]), case("M2", &["B"])];
        let result = reconcile(&cases, &read_set_from(["M1", "A", "M2"]));
        assert_eq!(result.status, CaseStatus::Incomplete);
        assert!(result.unlisted.is_empty());
        assert_eq!(result.complete_cases, 1);
    }

    #[test]
    fn all_complete_collection() {
        let cases = vec![case("M1", &["A"]), case("M2", &["B"])];
        let result = reconcile(&cases, &read_set_from(["M1", "A", "M2", "B"]));
        assert_eq!(result.status, CaseStatus::Complete);
        assert_eq!(result.complete_cases, 2);
    }

    #[test]
    fn read_set_from_trims_and_dedups() {
        let reads = read_set_from(["  A", "A", "", "   ", "B"]);
        assert_eq!(reads.len(), 2);
        assert!(reads.contains("A"));
        assert!(reads.contains("B"));
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(CaseStatus::Incomplete).unwrap(),
            serde_json::json!("incomplete")
        );
        assert_eq!(CaseStatus::Anomalous.to_string(), "anomalous");
    }
}
