use std::collections::{BTreeSet, HashSet};
use std::hash::{BuildHasher, Hash, RandomState};
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockWriteGuard};

use warden_core::tuple::{Tuple, TupleFilter};

use crate::keys::{SubjectKey, TupleKey, decode_cursor, encode_cursor};
use crate::traits::{
    Page, RelationshipStore, SchemaStore, StorageError, StoredSchema, TuplePage, WriteSummary,
    clamp_limit, validate_delete_filters, validate_filter,
};

const SHARDS: usize = 16;

/// In-process store. The primary index is sharded by object and the
/// secondary index by subject, so batches on unrelated objects only contend
/// when their shards collide.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    primary: Vec<RwLock<BTreeSet<TupleKey>>>,
    secondary: Vec<RwLock<BTreeSet<SubjectKey>>>,
    schemas: RwLock<Vec<String>>,
    hasher: RandomState,
}

impl Inner {
    fn shard_of<K: Hash>(&self, key: &K) -> usize {
        (self.hasher.hash_one(key) as usize) % SHARDS
    }

    fn object_shard(&self, object_type: &str, object_id: &str) -> usize {
        self.shard_of(&(object_type, object_id))
    }

    fn subject_shard(&self, subject_type: &str, subject_id: &str) -> usize {
        self.shard_of(&(subject_type, subject_id))
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                primary: (0..SHARDS).map(|_| RwLock::new(BTreeSet::new())).collect(),
                secondary: (0..SHARDS).map(|_| RwLock::new(BTreeSet::new())).collect(),
                schemas: RwLock::new(Vec::new()),
                hasher: RandomState::new(),
            }),
        }
    }

    fn primary_shards_for(&self, writes: &[Tuple], deletes: &[TupleFilter]) -> BTreeSet<usize> {
        let inner = &self.inner;
        let mut shards: BTreeSet<usize> = writes
            .iter()
            .map(|t| inner.object_shard(&t.object.object_type, &t.object.object_id))
            .collect();
        for filter in deletes {
            match filter.object() {
                Some(object) => {
                    shards.insert(inner.object_shard(&object.object_type, &object.object_id));
                }
                None => return (0..SHARDS).collect(),
            }
        }
        shards
    }

    fn apply_batch(&self, writes: &[Tuple], deletes: &[TupleFilter]) -> WriteSummary {
        let inner = &self.inner;

        // Lock order: primary before secondary, ascending shard index within each.
        let mut primary: Vec<(usize, RwLockWriteGuard<'_, BTreeSet<TupleKey>>)> = self
            .primary_shards_for(writes, deletes)
            .into_iter()
            .map(|idx| (idx, inner.primary[idx].write()))
            .collect();

        let mut doomed: BTreeSet<TupleKey> = BTreeSet::new();
        for filter in deletes {
            for (_, shard) in &primary {
                doomed.extend(scan(shard, filter).cloned());
            }
        }

        let inserts: Vec<TupleKey> = writes.iter().map(TupleKey::from_tuple).collect();
        let secondary_idx: BTreeSet<usize> = doomed
            .iter()
            .chain(inserts.iter())
            .map(|k| inner.subject_shard(&k.subject_type, &k.subject_id))
            .collect();
        let mut secondary: Vec<(usize, RwLockWriteGuard<'_, BTreeSet<SubjectKey>>)> =
            secondary_idx
                .into_iter()
                .map(|idx| (idx, inner.secondary[idx].write()))
                .collect();

        let mut summary = WriteSummary::default();
        for key in &doomed {
            let p = inner.object_shard(&key.object_type, &key.object_id);
            let s = inner.subject_shard(&key.subject_type, &key.subject_id);
            if let Some((_, shard)) = primary.iter_mut().find(|(idx, _)| *idx == p)
                && shard.remove(key)
            {
                summary.deleted += 1;
            }
            if let Some((_, shard)) = secondary.iter_mut().find(|(idx, _)| *idx == s) {
                shard.remove(&key.to_subject_key());
            }
        }
        for key in inserts {
            let p = inner.object_shard(&key.object_type, &key.object_id);
            let s = inner.subject_shard(&key.subject_type, &key.subject_id);
            if let Some((_, shard)) = secondary.iter_mut().find(|(idx, _)| *idx == s) {
                shard.insert(key.to_subject_key());
            }
            if let Some((_, shard)) = primary.iter_mut().find(|(idx, _)| *idx == p)
                && shard.insert(key)
            {
                summary.written += 1;
            }
        }
        summary
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Keys in `shard` matching `filter`, starting at the narrowest range the
/// filter allows.
fn scan<'a>(
    shard: &'a BTreeSet<TupleKey>,
    filter: &'a TupleFilter,
) -> impl Iterator<Item = &'a TupleKey> + 'a {
    scan_from(shard, filter, None)
}

fn scan_from<'a>(
    shard: &'a BTreeSet<TupleKey>,
    filter: &'a TupleFilter,
    after: Option<&TupleKey>,
) -> impl Iterator<Item = &'a TupleKey> + 'a {
    let lower = match (&filter.object_type, &filter.object_id) {
        (Some(ot), Some(oi)) => Some(TupleKey::lower_bound(ot, oi, filter.relation.as_deref())),
        (Some(ot), None) => Some(TupleKey::lower_bound(ot, "", None)),
        _ => None,
    };
    let start = match (lower, after) {
        (Some(lower), Some(after)) if after >= &lower => Bound::Excluded(after.clone()),
        (Some(lower), _) => Bound::Included(lower),
        (None, Some(after)) => Bound::Excluded(after.clone()),
        (None, None) => Bound::Unbounded,
    };

    shard
        .range((start, Bound::Unbounded))
        .take_while(move |k| {
            filter
                .object_type
                .as_ref()
                .is_none_or(|ot| &k.object_type == ot)
                && filter
                    .object_id
                    .as_ref()
                    .is_none_or(|oi| &k.object_id == oi)
        })
        .filter(move |k| key_matches(k, filter))
}

fn key_matches(key: &TupleKey, filter: &TupleFilter) -> bool {
    filter.relation.as_ref().is_none_or(|r| &key.relation == r)
        && filter
            .subject_type
            .as_ref()
            .is_none_or(|st| &key.subject_type == st)
        && filter
            .subject_id
            .as_ref()
            .is_none_or(|si| &key.subject_id == si)
        && filter
            .subject_relation
            .as_ref()
            .is_none_or(|sr| key.subject_relation == sr.as_deref().unwrap_or_default())
}

/// Takes `limit` items from an ordered candidate set, emitting a cursor when
/// more remain.
fn paginate<K: serde::Serialize + Clone>(
    mut keys: Vec<K>,
    limit: usize,
) -> (Vec<K>, Option<String>) {
    let next_cursor = if keys.len() > limit {
        keys.truncate(limit);
        keys.last().map(encode_cursor)
    } else {
        None
    };
    (keys, next_cursor)
}

impl RelationshipStore for InMemoryStore {
    async fn write(
        &self,
        writes: &[Tuple],
        deletes: &[TupleFilter],
    ) -> Result<WriteSummary, StorageError> {
        validate_delete_filters(deletes)?;
        Ok(self.apply_batch(writes, deletes))
    }

    async fn read(&self, filter: &TupleFilter, page: &Page) -> Result<TuplePage, StorageError> {
        validate_filter(filter)?;
        let limit = page.effective_limit();
        let after: Option<TupleKey> = page.cursor.as_deref().map(decode_cursor).transpose()?;

        let shards: Vec<usize> = match filter.object() {
            Some(object) => vec![
                self.inner
                    .object_shard(&object.object_type, &object.object_id),
            ],
            None => (0..SHARDS).collect(),
        };

        let mut keys: Vec<TupleKey> = Vec::new();
        for idx in shards {
            let shard = self.inner.primary[idx].read();
            keys.extend(scan_from(&shard, filter, after.as_ref()).take(limit + 1).cloned());
        }
        keys.sort();
        keys.truncate(limit + 1);

        let (keys, next_cursor) = paginate(keys, limit);
        Ok(TuplePage {
            tuples: keys.iter().map(TupleKey::to_tuple).collect(),
            next_cursor,
        })
    }

    async fn read_by_subject(
        &self,
        subject_type: &str,
        subject_id: &str,
        object_type: Option<&str>,
        page: &Page,
    ) -> Result<TuplePage, StorageError> {
        let limit = page.effective_limit();
        let after: Option<SubjectKey> = page.cursor.as_deref().map(decode_cursor).transpose()?;
        let lower = SubjectKey::lower_bound(subject_type, subject_id, object_type);
        let start = match after {
            Some(after) if after >= lower => Bound::Excluded(after),
            _ => Bound::Included(lower),
        };

        let idx = self.inner.subject_shard(subject_type, subject_id);
        let keys: Vec<SubjectKey> = {
            let shard = self.inner.secondary[idx].read();
            shard
                .range((start, Bound::Unbounded))
                .take_while(|k| {
                    k.subject_type == subject_type
                        && k.subject_id == subject_id
                        && object_type.is_none_or(|ot| k.object_type == ot)
                })
                .take(limit + 1)
                .cloned()
                .collect()
        };

        let (keys, next_cursor) = paginate(keys, limit);
        Ok(TuplePage {
            tuples: keys.iter().map(SubjectKey::to_tuple).collect(),
            next_cursor,
        })
    }

    async fn list_object_ids(
        &self,
        object_type: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, StorageError> {
        let limit = clamp_limit(limit);
        let mut ids: BTreeSet<String> = BTreeSet::new();

        for shard in &self.inner.primary {
            let shard = shard.read();
            let start = TupleKey::lower_bound(object_type, after.unwrap_or_default(), None);
            let mut seen: HashSet<&str> = HashSet::new();
            for key in shard
                .range(start..)
                .take_while(|k| k.object_type == object_type)
            {
                if after.is_some_and(|a| key.object_id.as_str() <= a) {
                    continue;
                }
                if seen.insert(&key.object_id) {
                    ids.insert(key.object_id.clone());
                    if seen.len() >= limit {
                        break;
                    }
                }
            }
        }

        Ok(ids.into_iter().take(limit).collect())
    }
}

impl SchemaStore for InMemoryStore {
    async fn write_schema(&self, definition: &str) -> Result<u64, StorageError> {
        let mut schemas = self.inner.schemas.write();
        schemas.push(definition.to_string());
        Ok(schemas.len() as u64)
    }

    async fn read_schema(&self) -> Result<Option<StoredSchema>, StorageError> {
        let schemas = self.inner.schemas.read();
        Ok(schemas.last().map(|definition| StoredSchema {
            version: schemas.len() as u64,
            definition: definition.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> Tuple {
        s.parse().unwrap()
    }

    async fn store_with(tuples: &[&str]) -> InMemoryStore {
        let store = InMemoryStore::new();
        let writes: Vec<Tuple> = tuples.iter().map(|s| t(s)).collect();
        store.write(&writes, &[]).await.unwrap();
        store
    }

    async fn read_all(store: &InMemoryStore, filter: &TupleFilter) -> Vec<Tuple> {
        store.read(filter, &Page::first(0)).await.unwrap().tuples
    }

    // --- writes ---

    #[tokio::test]
    async fn written_tuple_can_be_read_back() {
        let store = store_with(&["doc:readme#viewer@user:john"]).await;

        let results = read_all(&store, &TupleFilter::default()).await;

        assert_eq!(results, vec![t("doc:readme#viewer@user:john")]);
    }

    #[tokio::test]
    async fn duplicate_write_is_idempotent() {
        let store = InMemoryStore::new();

        let first = store
            .write(&[t("doc:readme#viewer@user:john")], &[])
            .await
            .unwrap();
        let second = store
            .write(&[t("doc:readme#viewer@user:john")], &[])
            .await
            .unwrap();

        assert_eq!(first.written, 1);
        assert_eq!(second.written, 0);
        assert_eq!(read_all(&store, &TupleFilter::default()).await.len(), 1);
    }

    #[tokio::test]
    async fn batch_applies_deletes_before_writes() {
        let store = store_with(&["doc:readme#viewer@user:john"]).await;
        let tuple = t("doc:readme#viewer@user:john");

        let summary = store
            .write(
                std::slice::from_ref(&tuple),
                &[TupleFilter::for_object(&tuple.object, Some("viewer"))],
            )
            .await
            .unwrap();

        assert_eq!((summary.written, summary.deleted), (1, 1));
        assert_eq!(read_all(&store, &TupleFilter::default()).await, vec![tuple]);
    }

    #[tokio::test]
    async fn invalid_delete_leaves_store_untouched() {
        let store = store_with(&["doc:readme#viewer@user:john"]).await;

        let err = store
            .write(&[t("doc:other#viewer@user:amy")], &[TupleFilter::default()])
            .await
            .unwrap_err();

        assert_eq!(err, StorageError::EmptyDeleteFilter);
        assert_eq!(read_all(&store, &TupleFilter::default()).await.len(), 1);
    }

    // --- deletes ---

    #[tokio::test]
    async fn delete_by_object_and_relation() {
        let store = store_with(&[
            "doc:readme#viewer@user:a",
            "doc:readme#viewer@user:b",
            "doc:readme#owner@user:a",
        ])
        .await;
        let filter = TupleFilter {
            object_type: Some("doc".to_string()),
            object_id: Some("readme".to_string()),
            relation: Some("viewer".to_string()),
            ..Default::default()
        };

        let summary = store.write(&[], &[filter]).await.unwrap();

        assert_eq!(summary.deleted, 2);
        assert_eq!(
            read_all(&store, &TupleFilter::default()).await,
            vec![t("doc:readme#owner@user:a")]
        );
    }

    #[tokio::test]
    async fn delete_by_subject_spans_shards() {
        let store = store_with(&[
            "doc:1#viewer@user:bob",
            "doc:2#viewer@user:bob",
            "folder:x#owner@user:bob",
            "doc:3#viewer@user:amy",
        ])
        .await;
        let filter = TupleFilter {
            subject_type: Some("user".to_string()),
            subject_id: Some("bob".to_string()),
            ..Default::default()
        };

        let summary = store.write(&[], &[filter]).await.unwrap();

        assert_eq!(summary.deleted, 3);
        let by_subject = store
            .read_by_subject("user", "bob", None, &Page::first(0))
            .await
            .unwrap();
        assert!(by_subject.tuples.is_empty());
    }

    #[tokio::test]
    async fn delete_only_matches_direct_subjects_when_asked() {
        let store = store_with(&["doc:1#viewer@group:eng#member", "doc:1#viewer@group:eng"]).await;
        let filter = TupleFilter {
            object_type: Some("doc".to_string()),
            subject_type: Some("group".to_string()),
            subject_relation: Some(None),
            ..Default::default()
        };

        store.write(&[], &[filter]).await.unwrap();

        assert_eq!(
            read_all(&store, &TupleFilter::default()).await,
            vec![t("doc:1#viewer@group:eng#member")]
        );
    }

    // --- reads ---

    #[tokio::test]
    async fn read_filters_by_relation() {
        let store = store_with(&["doc:1#viewer@user:a", "doc:1#editor@user:b"]).await;

        let results = read_all(
            &store,
            &TupleFilter::for_object(&"doc:1".parse().unwrap(), Some("editor")),
        )
        .await;

        assert_eq!(results, vec![t("doc:1#editor@user:b")]);
    }

    #[tokio::test]
    async fn read_by_object_type_spans_shards_in_order() {
        let store = store_with(&[
            "doc:c#viewer@user:a",
            "doc:a#viewer@user:a",
            "folder:a#viewer@user:a",
            "doc:b#viewer@user:a",
        ])
        .await;
        let filter = TupleFilter {
            object_type: Some("doc".to_string()),
            ..Default::default()
        };

        let ids: Vec<String> = read_all(&store, &filter)
            .await
            .into_iter()
            .map(|t| t.object.object_id)
            .collect();

        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn read_rejects_malformed_filter() {
        let store = InMemoryStore::new();
        let filter = TupleFilter {
            object_id: Some("readme".to_string()),
            ..Default::default()
        };

        let err = store.read(&filter, &Page::first(10)).await.unwrap_err();

        assert!(matches!(err, StorageError::InvalidFilter(_)));
    }

    #[tokio::test]
    async fn pagination_is_stable_and_complete() {
        let lines: Vec<String> = (0..25)
            .map(|i| format!("doc:readme#viewer@user:u{i:02}"))
            .collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let store = store_with(&refs).await;
        let filter = TupleFilter::for_object(&"doc:readme".parse().unwrap(), None);

        let mut seen = Vec::new();
        let mut page = Page::first(10);
        loop {
            let result = store.read(&filter, &page).await.unwrap();
            assert!(result.tuples.len() <= 10);
            seen.extend(result.tuples);
            match result.next_cursor {
                Some(cursor) => page = Page::after(cursor, 10),
                None => break,
            }
        }

        let expected: Vec<Tuple> = lines.iter().map(|l| t(l)).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn bad_cursor_rejected() {
        let store = InMemoryStore::new();

        let err = store
            .read(&TupleFilter::default(), &Page::after("%%%", 10))
            .await
            .unwrap_err();

        assert_eq!(err, StorageError::InvalidCursor);
    }

    #[tokio::test]
    async fn read_by_subject_returns_sets_and_direct() {
        let store = store_with(&[
            "doc:1#viewer@group:eng#member",
            "doc:2#viewer@group:eng",
            "folder:1#viewer@group:eng#member",
            "doc:3#viewer@group:ops#member",
        ])
        .await;

        let all = store
            .read_by_subject("group", "eng", None, &Page::first(0))
            .await
            .unwrap();
        let docs = store
            .read_by_subject("group", "eng", Some("doc"), &Page::first(0))
            .await
            .unwrap();

        assert_eq!(all.tuples.len(), 3);
        assert_eq!(
            docs.tuples,
            vec![t("doc:1#viewer@group:eng#member"), t("doc:2#viewer@group:eng")]
        );
    }

    #[tokio::test]
    async fn read_by_subject_paginates() {
        let store = store_with(&[
            "doc:1#viewer@user:bob",
            "doc:2#viewer@user:bob",
            "doc:3#viewer@user:bob",
        ])
        .await;

        let first = store
            .read_by_subject("user", "bob", Some("doc"), &Page::first(2))
            .await
            .unwrap();
        let second = store
            .read_by_subject(
                "user",
                "bob",
                Some("doc"),
                &Page::after(first.next_cursor.clone().unwrap(), 2),
            )
            .await
            .unwrap();

        assert_eq!(first.tuples.len(), 2);
        assert_eq!(second.tuples, vec![t("doc:3#viewer@user:bob")]);
        assert!(second.next_cursor.is_none());
    }

    #[tokio::test]
    async fn list_object_ids_distinct_sorted() {
        let store = store_with(&[
            "doc:b#viewer@user:a",
            "doc:b#owner@user:a",
            "doc:a#viewer@user:a",
            "doc:c#viewer@user:a",
            "folder:z#viewer@user:a",
        ])
        .await;

        let all = store.list_object_ids("doc", None, 10).await.unwrap();
        let after_a = store.list_object_ids("doc", Some("a"), 1).await.unwrap();

        assert_eq!(all, vec!["a", "b", "c"]);
        assert_eq!(after_a, vec!["b"]);
    }

    // --- schema ---

    #[tokio::test]
    async fn schema_versions_increment() {
        let store = InMemoryStore::new();
        assert!(store.read_schema().await.unwrap().is_none());

        let v1 = store.write_schema("definition user {}").await.unwrap();
        let v2 = store.write_schema("definition team {}").await.unwrap();

        assert_eq!((v1, v2), (1, 2));
        assert_eq!(
            store.read_schema().await.unwrap(),
            Some(StoredSchema {
                version: 2,
                definition: "definition team {}".to_string(),
            })
        );
    }

    // --- concurrency ---

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_do_not_lose_tuples() {
        let store = InMemoryStore::new();

        let handles: Vec<_> = (0..8)
            .map(|w| {
                let store = store.clone();
                tokio::spawn(async move {
                    for i in 0..50 {
                        let tuple: Tuple =
                            format!("doc:d{w}_{i}#viewer@user:u{i}").parse().unwrap();
                        store.write(&[tuple], &[]).await.unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let mut total = 0;
        let mut page = Page::first(0);
        loop {
            let result = store.read(&TupleFilter::default(), &page).await.unwrap();
            total += result.tuples.len();
            match result.next_cursor {
                Some(cursor) => page = Page::after(cursor, 0),
                None => break,
            }
        }
        assert_eq!(total, 400);
    }
}
