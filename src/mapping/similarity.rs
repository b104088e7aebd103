/// Normalized edit-distance similarity between two strings, in [0, 1].
///
/// `1 - levenshtein / max_len`, computed over chars so CJK text is measured
/// per character rather than per byte.
pub fn normalized_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }

    let len_a = a.chars().count();
    let len_b = b.chars().count();
    if len_a == 0 || len_b == 0 {
        return 0.0;
    }

    let max_len = len_a.max(len_b);
    let distance = levenshtein(a, b);

    1.0 - (distance as f64 / max_len as f64)
}

/// Levenshtein distance over chars, two-row dynamic programming.
fn levenshtein(a: &str, b: &str) -> usize {
    let chars_a: Vec<char> = a.chars().collect();
    let chars_b: Vec<char> = b.chars().collect();

    if chars_a.is_empty() {
        return chars_b.len();
    }
    if chars_b.is_empty() {
        return chars_a.len();
    }

    let mut prev: Vec<usize> = (0..=chars_b.len()).collect();
    let mut curr = vec![0usize; chars_b.len() + 1];

    for (i, ca) in chars_a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in chars_b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[chars_b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_strings() {
        assert_eq!(normalized_similarity("北京", "北京"), 1.0);
        assert_eq!(normalized_similarity("shanghai", "shanghai"), 1.0);
    }

    #[test]
    fn test_empty_string_has_no_similarity() {
        assert_eq!(normalized_similarity("", "北京"), 0.0);
        assert_eq!(normalized_similarity("北京", ""), 0.0);
    }

    #[test]
    fn test_cjk_measured_per_char() {
        // one substitution across three chars
        let sim = normalized_similarity("北京市", "北京站");
        assert!((sim - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_disjoint_strings() {
        let sim = normalized_similarity("广州", "成都");
        assert_eq!(sim, 0.0);
    }

    #[test]
    fn test_partial_overlap() {
        let sim = normalized_similarity("hangzhou", "hangzho");
        assert!(sim > 0.8 && sim < 1.0);
    }
}
