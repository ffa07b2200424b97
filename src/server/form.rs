// Request parameters gathered from the query string and form bodies.

use url::form_urlencoded;

/// Ordered multi-map of request parameters.
///
/// Body values are added before query values, so a body parameter wins when
/// both carry the same name.
#[derive(Debug, Clone, Default)]
pub struct FormValues {
    pairs: Vec<(String, String)>,
}

impl FormValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_query(query: Option<&str>) -> Self {
        let mut values = Self::new();
        values.extend_urlencoded(query.unwrap_or_default().as_bytes());
        values
    }

    pub fn extend_urlencoded(&mut self, input: &[u8]) {
        self.pairs.extend(
            form_urlencoded::parse(input).map(|(k, v)| (k.into_owned(), v.into_owned())),
        );
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First value for `key`, treating an empty value as absent.
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    pub fn get_all(&self, key: &str) -> Vec<String> {
        self.pairs
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// True only for `1`, `t`, `T`, `true`, `True` and `TRUE`; mixed spellings such as `tRuE` are false.
    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| matches!(v, "1" | "t" | "T" | "true" | "True" | "TRUE"))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_values() {
        let values = FormValues::from_query(Some("cmd=ls&args=-l&args=%2Ftmp&version="));
        assert_eq!(values.get("cmd"), Some("ls"));
        assert_eq!(values.get_all("args"), vec!["-l", "/tmp"]);
        assert_eq!(values.get("version"), Some(""));
        assert_eq!(values.get_non_empty("version"), None);
        assert_eq!(values.get("missing"), None);
    }

    #[test]
    fn test_body_values_take_precedence() {
        let mut values = FormValues::new();
        values.push("password", "from-body");
        values.extend_urlencoded(b"password=from-query");
        assert_eq!(values.get("password"), Some("from-body"));
    }

    #[test]
    fn test_get_bool() {
        let values = FormValues::from_query(Some("a=true&b=T&c=1&d=yes&e=false"));
        assert!(values.get_bool("a"));
        assert!(values.get_bool("b"));
        assert!(values.get_bool("c"));
        assert!(!values.get_bool("d"));
        assert!(!values.get_bool("e"));
        assert!(!values.get_bool("missing"));
    }

    #[test]
    fn test_get_bool_accepts_only_listed_spellings() {
        let values =
            FormValues::from_query(Some("a=True&b=TRUE&c=t&d=tRuE&e=TrUe&f=tRUE&g=trUE&h=yes&i=0"));
        assert!(values.get_bool("a"));
        assert!(values.get_bool("b"));
        assert!(values.get_bool("c"));
        for key in ["d", "e", "f", "g", "h", "i"] {
            assert!(!values.get_bool(key), "{} should be false", key);
        }
    }
}
