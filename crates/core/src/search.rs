use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;

use crate::model::DocumentNode;

pub fn fuzzy_score(needle: &str, hay: &str) -> Option<i64> {
    let m = SkimMatcherV2::default();
    m.fuzzy_match(hay, needle)
}

/// Nodes whose display name (or id, when unnamed) matches `needle`, best first.
pub fn find_matches<'a>(root: &'a DocumentNode, needle: &str) -> Vec<(i64, &'a DocumentNode)> {
    let mut hits: Vec<(i64, &DocumentNode)> = root
        .walk()
        .filter_map(|n| {
            let hay = n.display_name().unwrap_or(n.id());
            fuzzy_score(needle, hay).map(|score| (score, n))
        })
        .collect();
    // stable: equal scores stay in tree order
    hits.sort_by(|a, b| b.0.cmp(&a.0));
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolveOptions;
    use crate::memory::{MemoryDocument, MemoryProvider};
    use crate::resolver::{load, CancelFlag};
    use crate::uri::DocumentRef;

    #[test]
    fn matches_by_display_name() {
        let provider = MemoryProvider::new("auth");
        provider.insert(MemoryDocument::directory("root"));
        provider.insert_child("root", MemoryDocument::file("1", "text/plain", 1).named("notes.txt"));
        provider.insert_child("root", MemoryDocument::file("2", "image/png", 1).named("photo.png"));
        provider.insert_child("root", MemoryDocument::file("3", "text/plain", 1).named("new_notes.md"));
        let root = load(
            &provider,
            &DocumentRef::new("auth", "root", "root"),
            &ResolveOptions::default(),
            &CancelFlag::new(),
        )
        .unwrap();

        let ids: Vec<&str> = find_matches(&root, "notes").iter().map(|(_, n)| n.id()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"1"));
        assert!(ids.contains(&"3"));
        assert!(find_matches(&root, "zzz").is_empty());
    }

    #[test]
    fn match_scores_come_from_fuzzy_score() {
        let provider = MemoryProvider::new("auth");
        provider.insert(MemoryDocument::directory("root").named("Root"));
        provider.insert_child("root", MemoryDocument::file("1", "text/plain", 1).named("readme.md"));
        let root = load(
            &provider,
            &DocumentRef::new("auth", "root", "root"),
            &ResolveOptions::default(),
            &CancelFlag::new(),
        )
        .unwrap();

        let hits = find_matches(&root, "rdme");
        assert_eq!(hits.len(), 1);
        assert_eq!(Some(hits[0].0), fuzzy_score("rdme", "readme.md"));
    }

    #[test]
    fn score_absent_for_non_match() {
        assert!(fuzzy_score("abc", "a-b-c").is_some());
        assert!(fuzzy_score("xyz", "abc").is_none());
    }
}
