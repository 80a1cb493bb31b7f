//! Dotted version comparison, used to check server compatibility.

use std::cmp::Ordering;

/// Split a dotted version string into its components.
pub fn split_version(version: &str) -> Vec<&str> {
    version.trim().split('.').filter(|s| !s.is_empty()).collect()
}

/// Compare two versions given as component lists.
///
/// Components are compared numerically when both are numbers and
/// lexically otherwise. When one version is a prefix of the other, the
/// shorter one is less: `1.2 < 1.2.0`.
pub fn compare_version<A, B>(left: &[A], right: &[B]) -> Ordering
where
    A: AsRef<str>,
    B: AsRef<str>,
{
    for (l, r) in left.iter().zip(right.iter()) {
        let ordering = compare_component(l.as_ref(), r.as_ref());
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    left.len().cmp(&right.len())
}

fn compare_component(left: &str, right: &str) -> Ordering {
    match (left.parse::<u64>(), right.parse::<u64>()) {
        (Ok(l), Ok(r)) => l.cmp(&r),
        _ => left.cmp(right),
    }
}

/// Check whether `actual` lies within `[min, max]`.
///
/// Any release of the `max` line counts as compatible, so `5.0.4` is
/// within a range ending at `5.0`.
pub fn is_compatible_version(min: &str, max: &str, actual: &str) -> bool {
    let min = split_version(min);
    let max = split_version(max);
    let actual = split_version(actual);

    if actual.is_empty() || compare_version(&actual, &min) == Ordering::Less {
        return false;
    }

    compare_version(&actual, &max) != Ordering::Greater || actual.starts_with(&max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_in_range() {
        assert!(is_compatible_version("1.0", "2.0", "1.5"));
    }

    #[test]
    fn test_version_bounds_inclusive() {
        assert!(is_compatible_version("1.0", "2.0", "1.0"));
        assert!(is_compatible_version("1.0", "2.0", "2.0"));
    }

    #[test]
    fn test_version_outside_range() {
        assert!(!is_compatible_version("1.0", "2.0", "0.9"));
        assert!(!is_compatible_version("1.0", "2.0", "2.1"));
    }

    #[test]
    fn test_patch_release_of_max_line_is_compatible() {
        assert!(is_compatible_version("3.6", "5.0", "5.0.4"));
    }

    #[test]
    fn test_shorter_version_is_less() {
        assert_eq!(compare_version(&["1", "2"], &["1", "2", "0"]), Ordering::Less);
    }

    #[test]
    fn test_numeric_components_compare_numerically() {
        assert_eq!(compare_version(&["1", "10"], &["1", "9"]), Ordering::Greater);
    }

    #[test]
    fn test_non_numeric_components_compare_lexically() {
        assert_eq!(compare_version(&["5", "rc1"], &["5", "rc2"]), Ordering::Less);
    }

    #[test]
    fn test_empty_version_incompatible() {
        assert!(!is_compatible_version("1.0", "2.0", ""));
    }
}
