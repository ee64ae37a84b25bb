// "Did you mean" suggestions by edit distance

use std::collections::HashSet;

/// A name that could replace a hallucinated one. `own` marks members of
/// the resolved class itself, which win ties against ancestors and siblings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub name: String,
    pub own: bool,
}

impl Suggestion {
    pub fn new(name: impl Into<String>, own: bool) -> Self {
        Self { name: name.into(), own }
    }
}

/// Closest candidate within `max_distance` edits, ties broken by ownership
/// then alphabetically
pub fn nearest<I>(target: &str, candidates: I, max_distance: usize) -> Option<String>
where
    I: IntoIterator<Item = Suggestion>,
{
    let mut seen = HashSet::new();
    let mut best: Option<(usize, bool, String)> = None;

    for candidate in candidates {
        if candidate.name == target || !seen.insert((candidate.name.clone(), candidate.own)) {
            continue;
        }
        let distance = strsim::levenshtein(target, &candidate.name);
        if distance > max_distance {
            continue;
        }

        // Smaller is better: distance, then own members, then name
        let key = (distance, !candidate.own, candidate.name);
        let better = match &best {
            Some(current) => key < *current,
            None => true,
        };
        if better {
            best = Some(key);
        }
    }

    best.map(|(_, _, name)| name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_within_distance() {
        let candidates = vec![Suggestion::new("get", true), Suggestion::new("delete", true)];
        assert_eq!(nearest("gte", candidates.clone(), 2), Some("get".to_string()));
        assert_eq!(nearest("put", candidates.clone(), 2), Some("get".to_string()));
        assert_eq!(nearest("fetch_all", candidates, 2), None);
    }

    #[test]
    fn test_tie_breaks() {
        let candidates = vec![
            Suggestion::new("save", false),
            Suggestion::new("sane", true),
            Suggestion::new("safe", true),
        ];
        // All at distance 1 from "sate": own members first, then alphabetical
        assert_eq!(nearest("sate", candidates, 2), Some("safe".to_string()));
    }

    #[test]
    fn test_exact_name_is_not_suggested() {
        let candidates = vec![Suggestion::new("run", false)];
        assert_eq!(nearest("run", candidates, 2), None);
    }
}
