//! Case-insensitive header map and raw header line parsing.

/// Ordered header list addressed case-insensitively by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` to `value`, replacing any existing value under the same name.
    pub fn insert(&mut self, name: &str, value: &str) {
        let name = name.trim();
        let value = value.trim();
        match self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value.to_string(),
            None => self.entries.push((name.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse collected response header lines (status line and blank lines are skipped).
    pub fn from_lines(lines: &[String]) -> Self {
        let mut map = HeaderMap::new();
        for line in lines {
            let line = line.trim();
            if line.is_empty() || line.starts_with("HTTP/") {
                continue;
            }
            if let Some((name, value)) = line.split_once(':') {
                map.insert(name, value);
            }
        }
        map
    }
}
