//! Resolves the account reference a payer typed into a student.
//!
//! Matching is a pure function of the reference and the current student set. Policy, in order:
//! 1. Exact match on the admission number, ignoring case and surrounding whitespace.
//! 2. Normalized match. Punctuation and whitespace are removed, the result is uppercased, a known prefix
//!    (`ADM`, `REG`, `STUDENT`, ...) is stripped from the front or the back and leading zeros of the numeric part are dropped. The same
//!    normalization is applied to every admission number before comparing.
//!
//! If more than one student matches at either stage, the result is `Ambiguous`. The matcher never guesses.
use crate::db_types::{MatchCandidate, MatchFailure, MatchFailureReason, StudentIndexEntry};

pub const DEFAULT_REFERENCE_PREFIXES: [&str; 8] = ["ADM", "ADMNO", "ADM NO", "REG", "STD", "STUDENT", "ACC", "ACCOUNT"];

/// The maximum number of suggestions attached to a `NotFound` failure.
pub const MAX_SUGGESTIONS: usize = 5;
/// Shorter shared digit runs than this are too weak to suggest.
const MIN_SHARED_DIGITS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched(StudentIndexEntry),
    Unmatched(MatchFailure),
}

impl MatchOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, MatchOutcome::Matched(_))
    }
}

#[derive(Debug, Clone)]
pub struct AccountMatcher {
    /// Normalized prefixes, longest first so that `ADMNO` wins over `ADM`
    prefixes: Vec<String>,
}

impl Default for AccountMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_REFERENCE_PREFIXES)
    }
}

impl AccountMatcher {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut prefixes = prefixes
            .into_iter()
            .map(|p| squash(p.as_ref()))
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>();
        prefixes.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        prefixes.dedup();
        Self { prefixes }
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// Reduces a reference (or an admission number) to its comparable core.
    ///
    /// A known code is only stripped when it sits directly against the digits, so `2045/KPS` becomes `2045`
    /// but `ADAM` is left alone.
    pub fn normalize(&self, reference: &str) -> String {
        let squashed = squash(reference);
        let core = self
            .prefixes
            .iter()
            .find_map(|p| {
                squashed.strip_prefix(p.as_str()).filter(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
            })
            .unwrap_or(squashed.as_str());
        let core = self
            .prefixes
            .iter()
            .find_map(|p| core.strip_suffix(p.as_str()).filter(|rest| rest.ends_with(|c: char| c.is_ascii_digit())))
            .unwrap_or(core);
        strip_leading_zeros(core)
    }

    /// `reference` is `None` when the provider did not send one at all.
    pub fn match_reference(&self, reference: Option<&str>, students: &[StudentIndexEntry]) -> MatchOutcome {
        let Some(reference) = reference else {
            return MatchOutcome::Unmatched(MatchFailure::new(MatchFailureReason::MissingReference));
        };
        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return MatchOutcome::Unmatched(MatchFailure::new(MatchFailureReason::EmptyReference));
        }
        let exact = students.iter().filter(|s| s.admission_no.trim().eq_ignore_ascii_case(trimmed)).collect::<Vec<_>>();
        if let Some(outcome) = decide(exact) {
            return outcome;
        }
        let normalized = self.normalize(trimmed);
        if normalized.is_empty() {
            return MatchOutcome::Unmatched(MatchFailure::new(MatchFailureReason::NotFound));
        }
        let fuzzy = students.iter().filter(|s| self.normalize(&s.admission_no) == normalized).collect::<Vec<_>>();
        if let Some(outcome) = decide(fuzzy) {
            return outcome;
        }
        let suggestions = self.suggestions(&normalized, students);
        MatchOutcome::Unmatched(MatchFailure::new(MatchFailureReason::NotFound).with_candidates(suggestions))
    }

    /// Students whose admission number shares the longest run of digits with the reference. Operator hints only.
    fn suggestions(&self, normalized: &str, students: &[StudentIndexEntry]) -> Vec<MatchCandidate> {
        let digits = only_digits(normalized);
        if digits.len() < MIN_SHARED_DIGITS {
            return vec![];
        }
        let mut scored = students
            .iter()
            .filter_map(|s| {
                let theirs = only_digits(&self.normalize(&s.admission_no));
                let shared = longest_common_run(&digits, &theirs);
                (shared >= MIN_SHARED_DIGITS).then_some((shared, s))
            })
            .collect::<Vec<_>>();
        scored.sort_by(|(la, a), (lb, b)| lb.cmp(la).then(a.id.cmp(&b.id)));
        scored.into_iter().take(MAX_SUGGESTIONS).map(|(_, s)| MatchCandidate::from(s)).collect()
    }
}

fn decide(matches: Vec<&StudentIndexEntry>) -> Option<MatchOutcome> {
    match matches.len() {
        0 => None,
        1 => Some(MatchOutcome::Matched(matches[0].clone())),
        _ => {
            let candidates = matches.into_iter().map(MatchCandidate::from).collect();
            Some(MatchOutcome::Unmatched(MatchFailure::new(MatchFailureReason::Ambiguous).with_candidates(candidates)))
        },
    }
}

/// Uppercase, with everything but ASCII letters and digits removed.
fn squash(s: &str) -> String {
    s.chars().filter(char::is_ascii_alphanumeric).map(|c| c.to_ascii_uppercase()).collect()
}

fn strip_leading_zeros(s: &str) -> String {
    if !s.starts_with('0') {
        return s.to_string();
    }
    let stripped = s.trim_start_matches('0');
    if stripped.starts_with(|c: char| c.is_ascii_digit()) {
        stripped.to_string()
    } else {
        // All zeros, or zeros followed by letters: keep one zero so "000" and "0A" stay distinct from "" and "A".
        format!("0{stripped}")
    }
}

fn only_digits(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Length of the longest common substring of two short digit strings.
fn longest_common_run(a: &str, b: &str) -> usize {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let mut best = 0;
    let mut prev = vec![0usize; b.len() + 1];
    for x in a {
        let mut row = vec![0usize; b.len() + 1];
        for (j, y) in b.iter().enumerate() {
            if x == y {
                row[j + 1] = prev[j] + 1;
                best = best.max(row[j + 1]);
            }
        }
        prev = row;
    }
    best
}
