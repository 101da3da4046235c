//! "Did you mean" hints for attribute keys. Suggestions are only ever shown
//! to the caller; the requested key is never replaced.

/// Closest known key within a small edit distance, compared case-insensitively.
/// Ties go to the earlier key in `known`.
pub fn closest_key<'a>(key: &str, known: &'a [String]) -> Option<&'a str> {
    let needle: Vec<char> = key.to_lowercase().chars().collect();
    if needle.is_empty() {
        return None;
    }
    let max_dist = (needle.len() / 3).clamp(1, 3);

    let mut best: Option<(usize, &str)> = None;
    for candidate in known {
        let dist = levenshtein_with_max(&candidate.to_lowercase(), &needle, max_dist);
        if dist > max_dist {
            continue;
        }
        if best.map_or(true, |(d, _)| dist < d) {
            best = Some((dist, candidate.as_str()));
        }
    }
    best.map(|(_, k)| k)
}

/// Edit distance, returning `max_dist + 1` as soon as every cell in a row
/// exceeds `max_dist`.
fn levenshtein_with_max(value: &str, needle: &[char], max_dist: usize) -> usize {
    let n = needle.len();
    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr: Vec<usize> = vec![0; n + 1];

    for (i, c) in value.chars().enumerate() {
        curr[0] = i + 1;
        let mut row_min = curr[0];
        for j in 1..=n {
            let cost = usize::from(c != needle[j - 1]);
            let d = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
            curr[j] = d;
            row_min = row_min.min(d);
        }
        if row_min > max_dist {
            return max_dist + 1;
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[n]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn near_miss_is_suggested() {
        let known = keys(&["owner", "lifecycle", "cost_center"]);
        assert_eq!(closest_key("ownr", &known), Some("owner"));
        assert_eq!(closest_key("LifeCycle", &known), Some("lifecycle"));
        assert_eq!(closest_key("cost-centre", &known), Some("cost_center"));
    }

    #[test]
    fn distant_keys_are_not_suggested() {
        let known = keys(&["owner", "lifecycle"]);
        assert_eq!(closest_key("budget", &known), None);
        assert_eq!(closest_key("", &known), None);
    }

    #[test]
    fn distance_is_bounded() {
        let needle: Vec<char> = "kitten".chars().collect();
        assert_eq!(levenshtein_with_max("sitting", &needle, 5), 3);
        assert_eq!(levenshtein_with_max("completely different", &needle, 2), 3);
    }
}
