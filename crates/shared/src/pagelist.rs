//! Page-list grammar: comma-separated items, each a non-negative integer
//! or `lo-hi` with `lo <= hi`.
use crate::error::GridError;
use std::collections::BTreeSet;

pub fn parse_page_list(input: &str) -> Result<BTreeSet<u8>, GridError> {
    let mut pages = BTreeSet::new();
    for item in input.split(',') {
        let item = item.trim();
        if item.is_empty() {
            return Err(GridError::config(format!("empty page-list item in {input:?}")));
        }
        if let Some((lo, hi)) = item.split_once('-') {
            let lo: u8 = lo
                .trim()
                .parse()
                .map_err(|_| GridError::config(format!("invalid range start {lo:?}")))?;
            let hi: u8 = hi
                .trim()
                .parse()
                .map_err(|_| GridError::config(format!("invalid range end {hi:?}")))?;
            if lo > hi {
                return Err(GridError::config(format!(
                    "invalid range {lo}-{hi}: lo must be <= hi"
                )));
            }
            pages.extend(lo..=hi);
        } else {
            let page: u8 = item
                .parse()
                .map_err(|_| GridError::config(format!("invalid page number {item:?}")))?;
            pages.insert(page);
        }
    }
    Ok(pages)
}

/// Resolves an `(include, exclude)` pair (at most one set) against the full
/// `0..4` page space.
pub fn resolve_page_filter(
    include: Option<&BTreeSet<u8>>,
    exclude: Option<&BTreeSet<u8>>,
) -> Result<BTreeSet<u8>, GridError> {
    if include.is_some() && exclude.is_some() {
        return Err(GridError::config(
            "at most one of --pages/--skip-pages may be set",
        ));
    }
    let all: BTreeSet<u8> = (0..4).collect();
    Ok(match (include, exclude) {
        (Some(include), None) => all.intersection(include).copied().collect(),
        (None, Some(exclude)) => all.difference(exclude).copied().collect(),
        (None, None) => all,
        (Some(_), Some(_)) => unreachable!(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_page_list() {
        let pages = parse_page_list("0,2-3").unwrap();
        assert_eq!(pages, BTreeSet::from([0, 2, 3]));
    }

    #[test]
    fn rejects_descending_page_range() {
        assert!(parse_page_list("3-1").is_err());
    }

    #[test]
    fn page_filter_law_include() {
        let include = BTreeSet::from([0u8, 2]);
        let resolved = resolve_page_filter(Some(&include), None).unwrap();
        assert_eq!(resolved, BTreeSet::from([0, 2]));
    }

    #[test]
    fn page_filter_law_exclude() {
        let exclude = BTreeSet::from([1u8]);
        let resolved = resolve_page_filter(None, Some(&exclude)).unwrap();
        assert_eq!(resolved, BTreeSet::from([0, 2, 3]));
    }
}
