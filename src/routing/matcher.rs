//! Segment-scoring path matcher.
//!
//! # Responsibilities
//! - Compare one candidate pattern against an inbound path
//! - Bind `:name` segments to inbound values
//! - Score the candidate by how many leading segments it walked
//!
//! # Design Decisions
//! - Segments are walked pairwise up to the shorter of the two lists
//! - A literal mismatch disqualifies the candidate outright
//! - Equal scores are broken in favour of the candidate whose segment count
//!   equals the inbound segment count, then the one with more literal
//!   segments; otherwise the earlier candidate stays

use std::collections::HashMap;

use crate::routing::pattern::{split_segments, RoutePattern, Segment};

/// A candidate that survived the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub score: usize,
    pub exact_length: bool,
    pub literals: usize,
    pub vars: HashMap<String, String>,
}

/// Walk `pattern` against the already split inbound path.
pub fn score(pattern: &RoutePattern, input: &[&str]) -> Option<Candidate> {
    let segments = pattern.segments();
    let mut vars = HashMap::new();
    let mut score = 0;
    let mut literals = 0;

    for (i, (segment, part)) in segments.iter().zip(input.iter()).enumerate() {
        match segment {
            Segment::Param(name) => {
                vars.insert(name.clone(), (*part).to_string());
            }
            Segment::Literal(lit) if lit == part => literals += 1,
            Segment::Literal(_) => return None,
        }
        score = i + 1;
    }

    Some(Candidate {
        score,
        exact_length: segments.len() == input.len(),
        literals,
        vars,
    })
}

/// Whether `challenger` should displace the current selection.
pub fn beats(challenger: &Candidate, current: Option<&Candidate>) -> bool {
    match current {
        None => true,
        Some(cur) => {
            if challenger.score != cur.score {
                return challenger.score > cur.score;
            }
            if challenger.exact_length != cur.exact_length {
                return challenger.exact_length;
            }
            challenger.exact_length && challenger.literals > cur.literals
        }
    }
}

/// Pick the best of `patterns` for `path`. Returns its index and bound vars.
pub fn select<'a, I>(patterns: I, path: &str) -> Option<(usize, HashMap<String, String>)>
where
    I: IntoIterator<Item = &'a RoutePattern>,
{
    let input: Vec<&str> = split_segments(path).collect();
    let mut best: Option<(usize, Candidate)> = None;

    for (idx, pattern) in patterns.into_iter().enumerate() {
        let Some(candidate) = score(pattern, &input) else {
            continue;
        };
        if beats(&candidate, best.as_ref().map(|(_, c)| c)) {
            best = Some((idx, candidate));
        }
    }

    best.map(|(idx, c)| (idx, c.vars))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pat(s: &str) -> RoutePattern {
        RoutePattern::parse(s).unwrap()
    }

    #[test]
    fn literal_mismatch_disqualifies() {
        let input: Vec<&str> = split_segments("/orders/1").collect();
        assert!(score(&pat("/users/:id"), &input).is_none());
    }

    #[test]
    fn params_bind_and_score() {
        let input: Vec<&str> = split_segments("/users/7").collect();
        let c = score(&pat("/users/:id"), &input).unwrap();
        assert_eq!(c.score, 3);
        assert!(c.exact_length);
        assert_eq!(c.vars["id"], "7");
    }

    #[test]
    fn shorter_pattern_is_a_prefix_match() {
        let input: Vec<&str> = split_segments("/api/v1/things").collect();
        let c = score(&pat("/api"), &input).unwrap();
        assert_eq!(c.score, 2);
        assert!(!c.exact_length);
    }

    #[test]
    fn exact_length_wins_tie() {
        let patterns = [pat("/users/:id/orders"), pat("/users/:id")];
        let (idx, vars) = select(patterns.iter(), "/users/5").unwrap();
        assert_eq!(idx, 1);
        assert_eq!(vars["id"], "5");
    }

    #[test]
    fn literal_wins_tie_between_exact_candidates() {
        let patterns = [pat("/users/:id"), pat("/users/active")];
        let (idx, vars) = select(patterns.iter(), "/users/active").unwrap();
        assert_eq!(idx, 1);
        assert!(vars.is_empty());

        let reversed = [pat("/users/active"), pat("/users/:id")];
        let (idx, _) = select(reversed.iter(), "/users/active").unwrap();
        assert_eq!(idx, 0);
    }

    #[test]
    fn equal_candidates_keep_first() {
        let patterns = [pat("/users/:id"), pat("/users/:name")];
        let (idx, vars) = select(patterns.iter(), "/users/9").unwrap();
        assert_eq!(idx, 0);
        assert_eq!(vars["id"], "9");
    }

    #[test]
    fn higher_score_wins() {
        let patterns = [pat("/a"), pat("/a/b/:c")];
        let (idx, vars) = select(patterns.iter(), "/a/b/z").unwrap();
        assert_eq!(idx, 1);
        assert_eq!(vars["c"], "z");
    }

    #[test]
    fn tying_non_exact_candidates_keep_first() {
        let patterns = [pat("/a/:x/one"), pat("/a/:y/two")];
        let (idx, _) = select(patterns.iter(), "/a/b").unwrap();
        assert_eq!(idx, 0);
    }

    #[test]
    fn no_candidate() {
        let patterns = [pat("/x")];
        assert!(select(patterns.iter(), "/y").is_none());
    }
}
