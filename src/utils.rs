use std::fs;
use std::path::Path;

use ahash::AHashSet;
use anyhow::Context;
use url::Url;

pub fn ensure_dir(path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Keep the first occurrence of every entry.
pub fn dedupe_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen = AHashSet::with_capacity(items.len());
    items.into_iter().filter(|i| seen.insert(i.clone())).collect()
}

/// Newline-delimited endpoint list. Blank lines and `#` comments are
/// skipped, duplicates dropped, order kept.
pub fn parse_endpoints(text: &str) -> Vec<String> {
    let lines = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect();
    dedupe_preserving_order(lines)
}

pub fn load_endpoints(path: &Path) -> anyhow::Result<Vec<String>> {
    let text = fs::read_to_string(path).with_context(|| format!("reading endpoints from {}", path.display()))?;
    Ok(parse_endpoints(&text))
}

/// Set `key` to `value` in the query of `base`, keeping every other pair in
/// place. Later duplicates of `key` are dropped; a missing key is appended.
pub fn substitute_query(base: &Url, key: &str, value: &str) -> Url {
    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut placed = false;
    for (k, v) in base.query_pairs() {
        if k == key {
            if !placed {
                pairs.push((k.into_owned(), value.to_string()));
                placed = true;
            }
        } else {
            pairs.push((k.into_owned(), v.into_owned()));
        }
    }
    if !placed {
        pairs.push((key.to_string(), value.to_string()));
    }
    with_query_pairs(base, &pairs)
}

/// `base` with its query replaced by `pairs`; no pairs drops the `?`.
pub fn with_query_pairs(base: &Url, pairs: &[(String, String)]) -> Url {
    let mut url = base.clone();
    url.set_query(None);
    if !pairs.is_empty() {
        url.query_pairs_mut().extend_pairs(pairs.iter());
    }
    url
}

/// `scheme://host[:port]` of an http(s) URL.
pub fn site_root(endpoint: &str) -> Option<String> {
    let url = Url::parse(endpoint).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    })
}

/// Distinct site roots of a batch, in first-seen order.
pub fn unique_roots(endpoints: &[String]) -> Vec<String> {
    dedupe_preserving_order(endpoints.iter().filter_map(|e| site_root(e)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoints() {
        let text = "# targets\nhttps://a.test/x\n\n  https://b.test/  \nhttps://a.test/x\n#https://c.test/\n";
        assert_eq!(parse_endpoints(text), vec!["https://a.test/x", "https://b.test/"]);
    }

    fn pairs(u: &Url) -> Vec<(String, String)> {
        u.query_pairs().into_owned().collect()
    }

    #[test]
    fn test_substitute_replaces_in_place() {
        let base = Url::parse("https://a.test/search?page=2&q=1&sort=asc").unwrap();
        let u = substitute_query(&base, "q", "<b>BHXSS</b>");
        assert_eq!(
            pairs(&u),
            vec![
                ("page".to_string(), "2".to_string()),
                ("q".to_string(), "<b>BHXSS</b>".to_string()),
                ("sort".to_string(), "asc".to_string()),
            ]
        );
        assert_eq!(u.path(), "/search");
    }

    #[test]
    fn test_substitute_appends_missing_key() {
        let base = Url::parse("https://a.test/p").unwrap();
        let u = substitute_query(&base, "id", "1 AND 1=1");
        assert_eq!(pairs(&u), vec![("id".to_string(), "1 AND 1=1".to_string())]);

        let dup = Url::parse("https://a.test/p?id=1&id=2").unwrap();
        assert_eq!(pairs(&substitute_query(&dup, "id", "x")), vec![("id".to_string(), "x".to_string())]);
    }

    #[test]
    fn test_empty_pairs_drop_query() {
        let base = Url::parse("https://a.test/p?sig=abc").unwrap();
        assert_eq!(with_query_pairs(&base, &[]).as_str(), "https://a.test/p");
    }

    #[test]
    fn test_site_roots() {
        assert_eq!(site_root("https://a.test/x?y=1").as_deref(), Some("https://a.test"));
        assert_eq!(site_root("http://127.0.0.1:8080/p").as_deref(), Some("http://127.0.0.1:8080"));
        assert_eq!(site_root("ftp://a.test/"), None);
        assert_eq!(site_root("nope"), None);

        let roots = unique_roots(&["https://a.test/1".into(), "https://b.test/".into(), "https://a.test/2".into()]);
        assert_eq!(roots, vec!["https://a.test", "https://b.test"]);
    }

    #[test]
    fn test_ensure_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
