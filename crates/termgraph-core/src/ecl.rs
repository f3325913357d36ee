//! # Expression Cache
//!
//! Resolves subsumption expressions (an ECL subset) to concept sets and
//! memoizes the results per (branch, normalized expression).
//!
//! Forms evaluated locally over the Inferred closure:
//! - `*` (every active concept)
//! - `< id` (descendants), `<< id` (descendants or self), `id` (self)
//! - a top-level `OR` of the forms above
//!
//! Everything else is delegated to the remote service with cursor
//! pagination. Entries loaded from disk are id-only until first access,
//! when they are rehydrated against the live graph.

use crate::closure::{ClosureCache, ConceptSet};
use crate::graph::GraphStore;
use crate::primitives;
use crate::remote::{RetryPolicy, TerminologyServer};
use crate::storage::{EclCacheStore, StoredExpression};
use crate::types::{ConceptId, GraphError, RemoteError};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

// =============================================================================
// NORMALISATION AND CLASSIFICATION
// =============================================================================

/// Byte offsets where `keyword` occurs at parenthesis depth 0, outside
/// `|term|` blocks, delimited by whitespace or parentheses.
fn top_level_keyword(expr: &str, keyword: &str) -> Vec<usize> {
    let mut hits = Vec::new();
    let mut depth: i32 = 0;
    let mut in_term = false;
    let mut previous: Option<char> = None;
    for (i, c) in expr.char_indices() {
        match c {
            '|' => in_term = !in_term,
            '(' if !in_term => depth += 1,
            ')' if !in_term => depth -= 1,
            _ if !in_term && depth == 0 => {
                let starts_word = previous.is_none_or(|p| p.is_whitespace() || p == ')');
                let matches = expr
                    .get(i..i + keyword.len())
                    .is_some_and(|s| s.eq_ignore_ascii_case(keyword));
                let ends_word = expr[i..]
                    .chars()
                    .nth(keyword.len())
                    .is_none_or(|n| n.is_whitespace() || n == '(');
                if starts_word && matches && ends_word {
                    hits.push(i);
                }
            }
            _ => {}
        }
        previous = Some(c);
    }
    hits
}

fn split_top_level<'a>(expr: &'a str, keyword: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for at in top_level_keyword(expr, keyword) {
        parts.push(expr[start..at].trim());
        start = at + keyword.len();
    }
    parts.push(expr[start..].trim());
    parts
}

/// Trim, then strip one layer of enclosing parentheses when they wrap the
/// whole expression and it has no top-level `OR` or `MINUS`.
#[must_use]
pub fn normalize(expression: &str) -> &str {
    let trimmed = expression.trim();
    if !(trimmed.starts_with('(') && trimmed.ends_with(')')) {
        return trimmed;
    }
    let mut depth: i32 = 0;
    let mut in_term = false;
    let last = trimmed.len() - 1;
    for (i, c) in trimmed.char_indices() {
        match c {
            '|' => in_term = !in_term,
            '(' if !in_term => depth += 1,
            ')' if !in_term => {
                depth -= 1;
                if depth == 0 && i != last {
                    return trimmed;
                }
            }
            _ => {}
        }
    }
    let inner = &trimmed[1..last];
    if top_level_keyword(inner, "OR").is_empty() && top_level_keyword(inner, "MINUS").is_empty() {
        inner.trim()
    } else {
        trimmed
    }
}

/// How an expression will be evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EclForm {
    All,
    Descendants(ConceptId),
    DescendantsOrSelf(ConceptId),
    Exact(ConceptId),
    /// Top-level disjunction of locally evaluable parts (normalized).
    Composite(Vec<String>),
    /// Anything that needs the remote service.
    Complex,
}

fn parse_simple(expr: &str) -> Option<EclForm> {
    let expr = expr.trim();
    if expr == "*" {
        return Some(EclForm::All);
    }
    let (make, rest): (fn(ConceptId) -> EclForm, &str) = if let Some(rest) = expr.strip_prefix("<<") {
        (EclForm::DescendantsOrSelf, rest)
    } else if let Some(rest) = expr.strip_prefix('<') {
        (EclForm::Descendants, rest)
    } else {
        (EclForm::Exact, expr)
    };
    let rest = rest.trim_start();
    let digits = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if digits == 0 {
        return None;
    }
    let id: u64 = rest[..digits].parse().ok()?;
    let tail = rest[digits..].trim();
    let term_ok = tail.is_empty()
        || (tail.len() >= 2
            && tail.starts_with('|')
            && tail.ends_with('|')
            && !tail[1..tail.len() - 1].contains('|'));
    term_ok.then(|| make(ConceptId(id)))
}

/// Classify an already normalized expression.
#[must_use]
pub fn classify(normalized: &str) -> EclForm {
    if let Some(simple) = parse_simple(normalized) {
        return simple;
    }
    let parts = split_top_level(normalized, "OR");
    if parts.len() < 2 {
        return EclForm::Complex;
    }
    let mut members = Vec::with_capacity(parts.len());
    for part in parts {
        let part = normalize(part);
        if parse_simple(part).is_none() {
            return EclForm::Complex;
        }
        members.push(part.to_string());
    }
    EclForm::Composite(members)
}

// =============================================================================
// CACHE
// =============================================================================

/// Tunables for remote evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EclSettings {
    pub page_size: usize,
    pub retry: RetryPolicy,
    /// Pause before the single retry of an empty remote result.
    pub empty_result_pause: Duration,
}

impl Default for EclSettings {
    fn default() -> Self {
        Self {
            page_size: primitives::DEFAULT_ECL_PAGE_SIZE,
            retry: RetryPolicy::default(),
            empty_result_pause: primitives::DEFAULT_EMPTY_RESULT_PAUSE,
        }
    }
}

/// Whether an entry has been checked against the live graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hydration {
    /// Id-only, as loaded from disk.
    Thin,
    Live,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    concepts: ConceptSet,
    hydration: Hydration,
}

/// What an evaluation may read.
#[derive(Clone, Copy)]
pub struct EclContext<'a> {
    pub store: &'a GraphStore,
    /// Inferred closure cache.
    pub closure: &'a ClosureCache,
    pub server: Option<&'a dyn TerminologyServer>,
}

type CacheKey = (String, String);

/// Memoized expression results keyed by (branch, normalized expression).
#[derive(Debug, Default)]
pub struct EclCache {
    settings: EclSettings,
    entries: DashMap<CacheKey, CacheEntry>,
}

impl EclCache {
    #[must_use]
    pub fn new(settings: EclSettings) -> Self {
        Self {
            settings,
            entries: DashMap::new(),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &EclSettings {
        &self.settings
    }

    /// Resolve an expression, serving repeated calls from the cache.
    pub fn resolve(
        &self,
        ctx: &EclContext<'_>,
        branch: &str,
        expression: &str,
    ) -> Result<ConceptSet, GraphError> {
        let normalized = normalize(expression);
        let key = (branch.to_string(), normalized.to_string());
        if let Some(hit) = self.cached(ctx.store, &key) {
            return Ok(hit);
        }

        let (concepts, cacheable) = self.evaluate(ctx, branch, normalized)?;
        if cacheable {
            self.entries.insert(
                key,
                CacheEntry {
                    concepts: Arc::clone(&concepts),
                    hydration: Hydration::Live,
                },
            );
        }
        Ok(concepts)
    }

    fn cached(&self, store: &GraphStore, key: &CacheKey) -> Option<ConceptSet> {
        let entry = self.entries.get(key).map(|e| e.value().clone())?;
        match entry.hydration {
            Hydration::Live => Some(entry.concepts),
            Hydration::Thin => {
                let live = hydrate(store, &entry.concepts, &key.1);
                self.entries.insert(
                    key.clone(),
                    CacheEntry {
                        concepts: Arc::clone(&live),
                        hydration: Hydration::Live,
                    },
                );
                Some(live)
            }
        }
    }

    fn evaluate(
        &self,
        ctx: &EclContext<'_>,
        branch: &str,
        normalized: &str,
    ) -> Result<(ConceptSet, bool), GraphError> {
        let store = ctx.store;
        let concepts = match classify(normalized) {
            EclForm::All => Arc::new(store.active_ids().into_iter().collect()),
            EclForm::Descendants(id) => ctx.closure.descendants(store, id)?,
            EclForm::DescendantsOrSelf(id) => ctx.closure.descendants_or_self(store, id)?,
            EclForm::Exact(id) => {
                store.require_active(id)?;
                Arc::new(BTreeSet::from([id]))
            }
            EclForm::Composite(parts) => {
                let mut union = BTreeSet::new();
                for part in &parts {
                    union.extend(self.resolve(ctx, branch, part)?.iter().copied());
                }
                Arc::new(union)
            }
            EclForm::Complex => return self.remote(ctx, branch, normalized),
        };
        Ok((concepts, true))
    }

    fn remote(
        &self,
        ctx: &EclContext<'_>,
        branch: &str,
        expression: &str,
    ) -> Result<(ConceptSet, bool), GraphError> {
        let server = ctx.server.ok_or(RemoteError::Unavailable)?;
        let mut ids = self.fetch(server, branch, expression)?;
        if ids.is_empty() {
            warn!(branch, expression, "empty remote result, retrying once");
            std::thread::sleep(self.settings.empty_result_pause);
            ids = self.fetch(server, branch, expression)?;
        }
        if ids.is_empty() {
            return Ok((Arc::new(BTreeSet::new()), false));
        }
        Ok((hydrate(ctx.store, &ids, expression), true))
    }

    fn fetch(
        &self,
        server: &dyn TerminologyServer,
        branch: &str,
        expression: &str,
    ) -> Result<BTreeSet<ConceptId>, GraphError> {
        let mut seen = BTreeSet::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.settings.retry.run("ecl search", || {
                server.search_concepts(branch, expression, cursor.as_deref(), self.settings.page_size)
            })?;
            let received = page.items.len();
            for id in page.items {
                if !seen.insert(id) {
                    return Err(GraphError::DuplicateResult {
                        expression: expression.to_string(),
                        concept: id,
                    });
                }
            }
            debug!(branch, expression, received, total = page.total, "ecl page");
            match page.search_after {
                Some(next) if received > 0 && seen.len() < page.total => cursor = Some(next),
                _ => break,
            }
        }
        Ok(seen)
    }

    #[must_use]
    pub fn hydration(&self, branch: &str, expression: &str) -> Option<Hydration> {
        self.entries
            .get(&(branch.to_string(), normalize(expression).to_string()))
            .map(|e| e.value().hydration)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn invalidate(&self) {
        self.entries.clear();
    }

    /// Load every persisted entry as a thin entry.
    pub fn load_thin(&self, disk: &EclCacheStore) -> Result<usize, GraphError> {
        let stored = disk.entries()?;
        let count = stored.len();
        for entry in stored {
            self.entries.insert(
                (entry.branch, entry.expression),
                CacheEntry {
                    concepts: Arc::new(entry.concepts.into_iter().collect()),
                    hydration: Hydration::Thin,
                },
            );
        }
        debug!(count, "expression cache entries loaded");
        Ok(count)
    }

    /// Write every entry to disk as ids.
    pub fn persist(&self, disk: &EclCacheStore) -> Result<usize, GraphError> {
        let stored: Vec<StoredExpression> = self
            .entries
            .iter()
            .map(|entry| StoredExpression {
                branch: entry.key().0.clone(),
                expression: entry.key().1.clone(),
                concepts: entry.value().concepts.iter().copied().collect(),
            })
            .collect();
        disk.put_many(&stored)?;
        Ok(stored.len())
    }
}

/// Keep the ids that are active in the live graph.
fn hydrate(store: &GraphStore, ids: &BTreeSet<ConceptId>, expression: &str) -> ConceptSet {
    let live: BTreeSet<ConceptId> = ids
        .iter()
        .copied()
        .filter(|id| store.concept(*id).is_some_and(|c| c.is_active()))
        .collect();
    let dropped = ids.len() - live.len();
    if dropped > 0 {
        warn!(expression, dropped, "expression result references unknown or inactive concepts");
    }
    Arc::new(live)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::StoreBuilder;
    use crate::primitives::ROOT;
    use crate::remote::{BranchMetadata, SearchPage};
    use crate::types::CharacteristicType;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves scripted pages in order and counts calls.
    #[derive(Default)]
    struct ScriptedSearch {
        pages: Mutex<Vec<Result<SearchPage, RemoteError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSearch {
        fn new(mut pages: Vec<Result<SearchPage, RemoteError>>) -> Self {
            pages.reverse();
            Self {
                pages: Mutex::new(pages),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl TerminologyServer for ScriptedSearch {
        fn branch_metadata(&self, _: &str) -> Result<BranchMetadata, RemoteError> {
            Err(RemoteError::Unavailable)
        }

        fn search_concepts(
            &self,
            _: &str,
            _: &str,
            _: Option<&str>,
            _: usize,
        ) -> Result<SearchPage, RemoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.pages
                .lock()
                .map_err(|_| RemoteError::Unavailable)?
                .pop()
                .unwrap_or_else(|| Ok(SearchPage::default()))
        }

        fn export_delta(&self, _: &str) -> Result<Vec<u8>, RemoteError> {
            Err(RemoteError::Unavailable)
        }

        fn download_package(&self, _: &str) -> Result<Vec<u8>, RemoteError> {
            Err(RemoteError::Unavailable)
        }
    }

    fn page(items: &[u64], total: usize, next: Option<&str>) -> Result<SearchPage, RemoteError> {
        Ok(SearchPage {
            items: items.iter().copied().map(ConceptId).collect(),
            total,
            search_after: next.map(str::to_string),
        })
    }

    fn fast() -> EclCache {
        EclCache::new(EclSettings {
            page_size: 2,
            retry: RetryPolicy::new(2, Duration::ZERO),
            empty_result_pause: Duration::ZERO,
        })
    }

    fn ids(set: &ConceptSet) -> Vec<u64> {
        set.iter().map(|c| c.0).collect()
    }

    #[test]
    fn normalisation() {
        assert_eq!(normalize("  << 10  "), "<< 10");
        assert_eq!(normalize("(<< 10)"), "<< 10");
        assert_eq!(normalize("(<< 10 |Thing (qualifier)|)"), "<< 10 |Thing (qualifier)|");
        assert_eq!(normalize("(< 1) OR (< 2)"), "(< 1) OR (< 2)");
        assert_eq!(normalize("(< 1 OR < 2)"), "(< 1 OR < 2)");
        assert_eq!(normalize("(< 1 MINUS < 2)"), "(< 1 MINUS < 2)");
        assert_eq!(normalize("((< 1))"), "(< 1)");
    }

    #[test]
    fn classification() {
        assert_eq!(classify("*"), EclForm::All);
        assert_eq!(classify("< 5"), EclForm::Descendants(ConceptId(5)));
        assert_eq!(classify("<<5 |Five|"), EclForm::DescendantsOrSelf(ConceptId(5)));
        assert_eq!(classify("5"), EclForm::Exact(ConceptId(5)));
        assert_eq!(
            classify("(< 5) or << 6"),
            EclForm::Composite(vec!["< 5".into(), "<< 6".into()])
        );
        assert_eq!(classify("< 5 : 7 = 8"), EclForm::Complex);
        assert_eq!(classify("< 5 MINUS < 6"), EclForm::Complex);
        assert_eq!(classify("< 5 OR < 6 : 7 = 8"), EclForm::Complex);
        assert_eq!(classify("<! 5"), EclForm::Complex);
        assert_eq!(classify("< 5 |a|b|"), EclForm::Complex);
    }

    #[test]
    fn local_forms_never_touch_the_server() {
        let store = StoreBuilder::new().isa(1, ROOT).isa(2, 1).isa(3, 1).build();
        let closure = ClosureCache::new(CharacteristicType::Inferred);
        let server = ScriptedSearch::default();
        let ctx = EclContext {
            store: &store,
            closure: &closure,
            server: Some(&server),
        };
        let cache = fast();

        assert_eq!(ids(&cache.resolve(&ctx, "MAIN", "<< 1").expect("dos")), vec![1, 2, 3]);
        assert_eq!(ids(&cache.resolve(&ctx, "MAIN", "< 1").expect("desc")), vec![2, 3]);
        assert_eq!(ids(&cache.resolve(&ctx, "MAIN", "2 OR (3)").expect("or")), vec![2, 3]);
        assert_eq!(cache.resolve(&ctx, "MAIN", "*").expect("all").len(), store.active_concept_count());
        assert!(matches!(
            cache.resolve(&ctx, "MAIN", "<< 99"),
            Err(GraphError::NotFound(_))
        ));
        assert_eq!(server.calls.load(Ordering::SeqCst), 0);

        let first = cache.resolve(&ctx, "MAIN", "(<< 1)").expect("first");
        let second = cache.resolve(&ctx, "MAIN", "<< 1").expect("second");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn remote_pages_are_followed_and_cached() {
        let store = StoreBuilder::new().isa(1, ROOT).isa(2, 1).isa(3, 1).build();
        let closure = ClosureCache::new(CharacteristicType::Inferred);
        let server = ScriptedSearch::new(vec![
            Err(RemoteError::Transient("blip".into())),
            page(&[1, 2], 3, Some("c1")),
            page(&[3], 3, None),
        ]);
        let ctx = EclContext {
            store: &store,
            closure: &closure,
            server: Some(&server),
        };
        let cache = fast();
        let found = cache.resolve(&ctx, "MAIN", "< 1 : 7 = 8").expect("remote");
        assert_eq!(ids(&found), vec![1, 2, 3]);
        assert_eq!(server.calls.load(Ordering::SeqCst), 3);

        cache.resolve(&ctx, "MAIN", "< 1 : 7 = 8").expect("cached");
        assert_eq!(server.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn duplicate_ids_across_pages_fail() {
        let store = StoreBuilder::new().isa(1, ROOT).build();
        let closure = ClosureCache::new(CharacteristicType::Inferred);
        let server = ScriptedSearch::new(vec![page(&[1, ROOT], 4, Some("c")), page(&[1], 4, None)]);
        let ctx = EclContext {
            store: &store,
            closure: &closure,
            server: Some(&server),
        };
        assert!(matches!(
            fast().resolve(&ctx, "MAIN", "^ 123"),
            Err(GraphError::DuplicateResult { concept: ConceptId(1), .. })
        ));
    }

    #[test]
    fn empty_remote_results_retry_once_and_are_not_cached() {
        let store = StoreBuilder::new().isa(1, ROOT).build();
        let closure = ClosureCache::new(CharacteristicType::Inferred);
        let server = ScriptedSearch::new(vec![page(&[], 0, None), page(&[], 0, None)]);
        let ctx = EclContext {
            store: &store,
            closure: &closure,
            server: Some(&server),
        };
        let cache = fast();
        assert!(cache.resolve(&ctx, "MAIN", "^ 123").expect("empty").is_empty());
        assert_eq!(server.calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn complex_forms_need_a_server() {
        let store = StoreBuilder::new().build();
        let closure = ClosureCache::new(CharacteristicType::Inferred);
        let ctx = EclContext {
            store: &store,
            closure: &closure,
            server: None,
        };
        assert!(matches!(
            fast().resolve(&ctx, "MAIN", "^ 123"),
            Err(GraphError::Remote(RemoteError::Unavailable))
        ));
    }

    #[test]
    fn thin_entries_rehydrate_against_the_live_graph() {
        let dir = tempfile::tempdir().expect("tempdir");
        let disk = EclCacheStore::open_in(dir.path()).expect("open");
        disk.put_many(&[StoredExpression {
            branch: "MAIN".into(),
            expression: "^ 123".into(),
            concepts: vec![ConceptId(1), ConceptId(2), ConceptId(424_242)],
        }])
        .expect("seed");

        let store = StoreBuilder::new().isa(1, ROOT).isa(2, 1).inactive(2).build();
        let closure = ClosureCache::new(CharacteristicType::Inferred);
        let ctx = EclContext {
            store: &store,
            closure: &closure,
            server: None,
        };
        let cache = fast();
        assert_eq!(cache.load_thin(&disk).expect("load"), 1);
        assert_eq!(cache.hydration("MAIN", "^ 123"), Some(Hydration::Thin));

        assert_eq!(ids(&cache.resolve(&ctx, "MAIN", "(^ 123)").expect("hit")), vec![1]);
        assert_eq!(cache.hydration("MAIN", "^ 123"), Some(Hydration::Live));

        disk.clear().expect("clear");
        assert_eq!(cache.persist(&disk).expect("persist"), 1);
        assert_eq!(
            disk.get("MAIN", "^ 123").expect("get"),
            Some(vec![ConceptId(1)])
        );
    }
}
