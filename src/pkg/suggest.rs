use strsim::jaro_winkler;

/// The closest candidate to `needle`, if any scores close enough to be worth
/// showing. Ties break toward the lexicographically smaller name so hints are
/// deterministic.
pub fn closest(needle: &str, candidates: impl IntoIterator<Item = String>) -> Option<String> {
    let needle = needle.trim();
    if needle.is_empty() {
        return None;
    }
    let mut best: Option<(f64, String)> = None;
    for c in candidates {
        if c.is_empty() || c == needle {
            continue;
        }
        let score = jaro_winkler(needle, &c);
        let better = match &best {
            None => true,
            Some((s, name)) => score > *s || (score == *s && c < *name),
        };
        if better {
            best = Some((score, c));
        }
    }
    match best {
        Some((score, name)) if score >= 0.84 => Some(name),
        _ => None,
    }
}

pub fn did_you_mean(needle: &str, candidates: impl IntoIterator<Item = String>) -> Option<String> {
    closest(needle, candidates).map(|name| format!("did you mean `{}`?", name))
}

#[cfg(test)]
mod tests {
    use super::{closest, did_you_mean};

    #[test]
    fn close_names_are_suggested() {
        let hint = did_you_mean(
            "hllo",
            ["hello".to_string(), "world".to_string()].into_iter(),
        );
        assert_eq!(hint.as_deref(), Some("did you mean `hello`?"));
    }

    #[test]
    fn distant_names_are_not() {
        assert!(closest("ls", ["network".to_string()].into_iter()).is_none());
    }

    #[test]
    fn exact_matches_are_skipped() {
        assert!(closest("ls", ["ls".to_string()].into_iter()).is_none());
    }
}
