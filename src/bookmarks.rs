use std::collections::HashSet;

/// Normalizes a title into a destination name: spaces become `_`, anything that is not
/// alphanumeric or `_` is dropped, the result is lowercased.
pub fn bookmark_id(title: &str) -> String {
    let id: String = title
        .trim()
        .chars()
        .filter_map(|ch| match ch {
            ' ' => Some('_'),
            c if c.is_alphanumeric() || c == '_' => Some(c),
            _ => None,
        })
        .flat_map(char::to_lowercase)
        .collect();
    if id.is_empty() {
        "section".to_string()
    } else {
        id
    }
}

/// Hands out unique bookmark ids; a collision gets `_2`, `_3`, ... appended.
#[derive(Debug, Clone, Default)]
pub struct BookmarkRegistry {
    issued: HashSet<String>,
}

impl BookmarkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, title: &str) -> String {
        let base = bookmark_id(title);
        let mut candidate = base.clone();
        let mut counter = 1usize;
        while self.issued.contains(&candidate) {
            counter += 1;
            candidate = format!("{base}_{counter}");
        }
        if counter > 1 {
            log::debug!("bookmark id '{base}' already taken; using '{candidate}'");
        }
        self.issued.insert(candidate.clone());
        candidate
    }

    pub fn len(&self) -> usize {
        self.issued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_normalized() {
        assert_eq!(bookmark_id("Overview"), "overview");
        assert_eq!(bookmark_id("Top 10 Holdings (USD)"), "top_10_holdings_usd");
        assert_eq!(bookmark_id("Risk & Return: Q1"), "risk__return_q1");
        assert_eq!(bookmark_id("!!!"), "section");
    }

    #[test]
    fn collisions_get_a_counter() {
        let mut registry = BookmarkRegistry::new();
        assert_eq!(registry.assign("Summary"), "summary");
        assert_eq!(registry.assign("summary"), "summary_2");
        assert_eq!(registry.assign("Summary!"), "summary_3");
        assert_eq!(registry.assign("Summary 2"), "summary_2_2");
        assert_eq!(registry.len(), 4);
    }
}
