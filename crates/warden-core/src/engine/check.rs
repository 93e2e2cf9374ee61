use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream;

use crate::schema::types::{Member, RelationDef, RewriteRule, Schema};
use crate::tuple::{ObjectRef, SubjectRef, Tuple, TupleFilter};

use super::{CheckError, EngineConfig, TupleReader};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRequest {
    pub object: ObjectRef,
    pub permission: String,
    pub subject: SubjectRef,
    /// Overrides the configured check timeout.
    pub timeout: Option<Duration>,
}

impl CheckRequest {
    pub fn new(subject: SubjectRef, permission: impl Into<String>, object: ObjectRef) -> Self {
        Self {
            object,
            permission: permission.into(),
            subject,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// The steps from the requested `object#permission` down to the tuples that
/// granted it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trace(pub Vec<String>);

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" -> "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub allowed: bool,
    pub trace: Option<Trace>,
}

impl CheckResult {
    pub fn denied() -> Self {
        Self {
            allowed: false,
            trace: None,
        }
    }
}

type Steps = Vec<String>;
type EvalResult = Result<Option<Steps>, CheckError>;
type EvalFuture<'a> = Pin<Box<dyn Future<Output = EvalResult> + Send + 'a>>;

struct CheckContext<'a> {
    schema: &'a Schema,
    subject: &'a SubjectRef,
}

pub struct CheckEngine<T: TupleReader> {
    reader: Arc<T>,
    config: EngineConfig,
}

impl<T: TupleReader> CheckEngine<T> {
    pub fn new(reader: Arc<T>, config: EngineConfig) -> Self {
        Self { reader, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Evaluates `request` against `schema`. The caller pins the schema
    /// snapshot for the whole check; dropping the returned future cancels
    /// every outstanding sub-check.
    pub async fn check(
        &self,
        schema: &Schema,
        request: &CheckRequest,
    ) -> Result<CheckResult, CheckError> {
        // Surface resolution errors before any storage I/O.
        let expr =
            schema.resolve_permission_expr(&request.object.object_type, &request.permission)?;
        tracing::trace!(
            object = %request.object,
            permission = %request.permission,
            ?expr,
            "evaluating permission"
        );

        let ctx = CheckContext {
            schema,
            subject: &request.subject,
        };
        let timeout = request.timeout.unwrap_or(self.config.check_timeout);

        let evaluation = self.check_member(&ctx, &request.object, &request.permission, 0);
        let outcome = tokio::time::timeout(timeout, evaluation)
            .await
            .map_err(|_| CheckError::Timeout(timeout))?;

        match outcome {
            Ok(Some(steps)) => Ok(CheckResult {
                allowed: true,
                trace: Some(Trace(steps)),
            }),
            Ok(None) => Ok(CheckResult::denied()),
            Err(CheckError::MaxDepthExceeded(depth)) => {
                tracing::error!(
                    object = %request.object,
                    permission = %request.permission,
                    subject = %request.subject,
                    depth,
                    "check exceeded maximum traversal depth"
                );
                Err(CheckError::MaxDepthExceeded(depth))
            }
            Err(err) => Err(err),
        }
    }

    /// Does the context subject hold `name` on `object`? Starts with a direct
    /// tuple lookup, then evaluates the permission rule or expands subject
    /// sets of the relation.
    fn check_member<'a>(
        &'a self,
        ctx: &'a CheckContext<'a>,
        object: &'a ObjectRef,
        name: &'a str,
        depth: usize,
    ) -> EvalFuture<'a> {
        Box::pin(async move {
            if depth > self.config.max_depth {
                return Err(CheckError::MaxDepthExceeded(self.config.max_depth));
            }
            let step = format!("{object}#{name}");

            let direct = Tuple::new(object.clone(), name, ctx.subject.clone());
            let found = self
                .reader
                .read_tuples(&TupleFilter::exact(&direct))
                .await?;
            if !found.is_empty() {
                return Ok(Some(vec![step, direct.to_string()]));
            }

            let inner = match ctx.schema.resolve(&object.object_type, name)? {
                Member::Permission(perm) => {
                    self.evaluate_rule(ctx, &perm.rule, object, depth).await?
                }
                Member::Relation(rel) => self.expand_relation(ctx, rel, object, depth).await?,
            };
            Ok(inner.map(|steps| prepend(step, steps)))
        })
    }

    fn evaluate_rule<'a>(
        &'a self,
        ctx: &'a CheckContext<'a>,
        rule: &'a RewriteRule,
        object: &'a ObjectRef,
        depth: usize,
    ) -> EvalFuture<'a> {
        Box::pin(async move {
            match rule {
                RewriteRule::Ref(name) => self.check_member(ctx, object, name, depth + 1).await,
                RewriteRule::Union(children) => {
                    let branches = children
                        .iter()
                        .map(|child| self.evaluate_rule(ctx, child, object, depth))
                        .collect();
                    any_branch(branches, self.config.max_concurrent_branches).await
                }
                RewriteRule::Intersection(children) => {
                    let branches = children
                        .iter()
                        .map(|child| self.evaluate_rule(ctx, child, object, depth))
                        .collect();
                    all_branches(branches, self.config.max_concurrent_branches).await
                }
                RewriteRule::Arrow(tupleset, computed) => {
                    self.evaluate_arrow(ctx, tupleset, computed, object, depth)
                        .await
                }
            }
        })
    }

    /// Follows subject-set tuples of `rel`. Direct subjects were already
    /// covered by the point lookup in `check_member`.
    async fn expand_relation(
        &self,
        ctx: &CheckContext<'_>,
        rel: &RelationDef,
        object: &ObjectRef,
        depth: usize,
    ) -> EvalResult {
        let mut tuples = Vec::new();
        for st in &rel.subject_types {
            let Some(ref subject_relation) = st.relation else {
                continue;
            };
            let filter = TupleFilter {
                subject_type: Some(st.type_name.clone()),
                subject_relation: Some(Some(subject_relation.clone())),
                ..TupleFilter::for_object(object, Some(&rel.name))
            };
            tuples.extend(self.reader.read_tuples(&filter).await?);
        }

        let targets: Vec<(String, ObjectRef, &str)> = tuples
            .iter()
            .filter(|t| &t.subject != ctx.subject)
            .filter_map(|t| {
                let relation = t.subject.relation()?;
                let target = t.subject.as_object();
                self.resolvable(ctx, &target, relation)
                    .then(|| (t.to_string(), target, relation))
            })
            .collect();

        tracing::debug!(
            %object,
            relation = %rel.name,
            depth,
            subject_sets = targets.len(),
            "expanding subject sets"
        );

        let branches = targets
            .iter()
            .map(|(step, target, relation)| self.prefixed(step, ctx, target, relation, depth + 1))
            .collect();
        any_branch(branches, self.config.max_concurrent_branches).await
    }

    async fn evaluate_arrow(
        &self,
        ctx: &CheckContext<'_>,
        tupleset: &str,
        computed: &str,
        object: &ObjectRef,
        depth: usize,
    ) -> EvalResult {
        let filter = TupleFilter::for_object(object, Some(tupleset));
        let tuples = self.reader.read_tuples(&filter).await?;

        let targets: Vec<(String, ObjectRef)> = tuples
            .iter()
            .filter_map(|t| {
                let target = t.subject.as_object();
                self.resolvable(ctx, &target, computed)
                    .then(|| (t.to_string(), target))
            })
            .collect();

        tracing::debug!(
            %object,
            tupleset,
            computed,
            depth,
            targets = targets.len(),
            "following arrow"
        );

        let branches = targets
            .iter()
            .map(|(step, target)| self.prefixed(step, ctx, target, computed, depth + 1))
            .collect();
        let steps = any_branch(branches, self.config.max_concurrent_branches).await?;
        Ok(steps.map(|steps| prepend(format!("{object}#{tupleset}->{computed}"), steps)))
    }

    fn prefixed<'a>(
        &'a self,
        step: &'a str,
        ctx: &'a CheckContext<'a>,
        object: &'a ObjectRef,
        name: &'a str,
        depth: usize,
    ) -> EvalFuture<'a> {
        Box::pin(async move {
            let steps = self.check_member(ctx, object, name, depth).await?;
            Ok(steps.map(|steps| prepend(step.to_string(), steps)))
        })
    }

    /// Tuples left behind by an older schema may point at members that no
    /// longer exist; those are skipped rather than failing the check.
    fn resolvable(&self, ctx: &CheckContext<'_>, object: &ObjectRef, name: &str) -> bool {
        let ok = ctx.schema.resolve(&object.object_type, name).is_ok();
        if !ok {
            tracing::debug!(%object, name, "skipping unresolvable traversal target");
        }
        ok
    }
}

fn prepend(step: String, rest: Steps) -> Steps {
    let mut steps = Vec::with_capacity(rest.len() + 1);
    steps.push(step);
    steps.extend(rest);
    steps
}

/// OR over branches. The first success wins and drops the rest. Without a
/// success, the error of the lowest-indexed failing branch is returned so the
/// outcome does not depend on completion order. Storage errors short-circuit.
async fn any_branch(branches: Vec<EvalFuture<'_>>, limit: usize) -> EvalResult {
    let mut results = stream::iter(branches.into_iter().enumerate().map(tagged))
        .buffer_unordered(limit.max(1));

    let mut first_err: Option<(usize, CheckError)> = None;
    while let Some((idx, result)) = results.next().await {
        match result {
            Ok(Some(steps)) => return Ok(Some(steps)),
            Ok(None) => {}
            Err(err @ CheckError::StorageError(_)) => return Err(err),
            Err(err) => keep_first(&mut first_err, idx, err),
        }
    }
    match first_err {
        Some((_, err)) => Err(err),
        None => Ok(None),
    }
}

/// AND over branches, symmetric to [`any_branch`]. The trace of a granted
/// intersection concatenates the branch traces in listed order.
async fn all_branches(branches: Vec<EvalFuture<'_>>, limit: usize) -> EvalResult {
    let mut granted: Vec<Option<Steps>> = vec![None; branches.len()];
    let mut results = stream::iter(branches.into_iter().enumerate().map(tagged))
        .buffer_unordered(limit.max(1));

    let mut first_err: Option<(usize, CheckError)> = None;
    while let Some((idx, result)) = results.next().await {
        match result {
            Ok(Some(steps)) => granted[idx] = Some(steps),
            Ok(None) => return Ok(None),
            Err(err @ CheckError::StorageError(_)) => return Err(err),
            Err(err) => keep_first(&mut first_err, idx, err),
        }
    }
    match first_err {
        Some((_, err)) => Err(err),
        None => Ok(Some(granted.into_iter().flatten().flatten().collect())),
    }
}

type TaggedFuture<'a> = Pin<Box<dyn Future<Output = (usize, EvalResult)> + Send + 'a>>;

/// Pairs a branch with its listed position. Must stay a named fn: a closure
/// here loses the higher-ranked `Send` bound the boxed recursion needs.
fn tagged<'a>((idx, branch): (usize, EvalFuture<'a>)) -> TaggedFuture<'a> {
    Box::pin(async move { (idx, branch.await) })
}

fn keep_first(slot: &mut Option<(usize, CheckError)>, idx: usize, err: CheckError) {
    if slot.as_ref().is_none_or(|(current, _)| idx < *current) {
        *slot = Some((idx, err));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::schema::parse_schema;

    struct TestStore {
        tuples: Vec<Tuple>,
        reads: AtomicUsize,
        delay: Option<Duration>,
        fail: bool,
    }

    impl TestStore {
        fn new(tuples: &[&str]) -> Self {
            Self {
                tuples: tuples.iter().map(|t| t.parse().unwrap()).collect(),
                reads: AtomicUsize::new(0),
                delay: None,
                fail: false,
            }
        }
    }

    impl TupleReader for TestStore {
        async fn read_tuples(&self, filter: &TupleFilter) -> Result<Vec<Tuple>, CheckError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(CheckError::StorageError("connection refused".to_string()));
            }
            Ok(self
                .tuples
                .iter()
                .filter(|t| filter.matches(t))
                .cloned()
                .collect())
        }
    }

    const DOC_SCHEMA: &str = "
        definition user {}
        definition group { relation member: user | group#member }
        definition document {
            relation owner: user
            relation viewer: user | group#member
            relation reviewer: user
            permission view = owner + viewer
            permission edit = owner
            permission approve = owner & reviewer
        }";

    const WADDLE_SCHEMA: &str = "
        definition user {}
        definition waddle {
            relation owner: user
            relation admin: user | waddle#owner
            relation member: user | waddle#admin
        }
        definition channel {
            relation parent: waddle
            relation moderator: user
            permission delete = parent->admin
            permission moderate = moderator + parent->admin
        }";

    fn engine(store: TestStore) -> CheckEngine<TestStore> {
        CheckEngine::new(Arc::new(store), EngineConfig::default())
    }

    async fn check(
        engine: &CheckEngine<TestStore>,
        schema: &Schema,
        subject: &str,
        permission: &str,
        object: &str,
    ) -> Result<CheckResult, CheckError> {
        let request = CheckRequest::new(
            subject.parse().unwrap(),
            permission,
            object.parse().unwrap(),
        );
        engine.check(schema, &request).await
    }

    async fn allowed(
        engine: &CheckEngine<TestStore>,
        schema: &Schema,
        subject: &str,
        permission: &str,
        object: &str,
    ) -> bool {
        check(engine, schema, subject, permission, object)
            .await
            .unwrap()
            .allowed
    }

    // --- resolution errors ---

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn branching_checks_run_on_spawned_tasks() {
        let schema = parse_schema(DOC_SCHEMA).unwrap();
        let engine = engine(TestStore::new(&[
            "document:d#viewer@group:eng#member",
            "group:eng#member@user:x",
            "document:d#owner@user:y",
            "document:d#reviewer@user:y",
        ]));

        let handle = tokio::spawn(async move {
            let view = check(&engine, &schema, "user:x", "view", "document:d").await;
            let approve = check(&engine, &schema, "user:y", "approve", "document:d").await;
            (view, approve)
        });
        let (view, approve) = handle.await.unwrap();

        assert!(view.unwrap().allowed);
        assert!(approve.unwrap().allowed);
    }

    #[tokio::test]
    async fn check_rejects_unknown_type() {
        let schema = parse_schema(DOC_SCHEMA).unwrap();
        let engine = engine(TestStore::new(&[]));

        let err = check(&engine, &schema, "user:alice", "view", "folder:a")
            .await
            .unwrap_err();

        assert!(
            matches!(err, CheckError::TypeNotFound(ref t) if t == "folder"),
            "expected TypeNotFound, got: {err}"
        );
    }

    #[tokio::test]
    async fn check_rejects_unknown_permission() {
        let schema = parse_schema(DOC_SCHEMA).unwrap();
        let store = TestStore::new(&[]);
        let engine = engine(store);

        let err = check(&engine, &schema, "user:alice", "delete", "document:readme")
            .await
            .unwrap_err();

        assert!(
            matches!(
                err,
                CheckError::PermissionNotFound {
                    ref type_name,
                    ref permission,
                } if type_name == "document" && permission == "delete"
            ),
            "expected PermissionNotFound, got: {err}"
        );
        assert_eq!(engine.reader.reads.load(Ordering::SeqCst), 0);
    }

    // --- direct grants ---

    #[tokio::test]
    async fn relation_name_is_checkable() {
        let schema = parse_schema(DOC_SCHEMA).unwrap();
        let engine = engine(TestStore::new(&["document:readme#viewer@user:bob"]));

        assert!(allowed(&engine, &schema, "user:bob", "viewer", "document:readme").await);
        assert!(!allowed(&engine, &schema, "user:alice", "viewer", "document:readme").await);
    }

    #[tokio::test]
    async fn direct_grant_trace() {
        let schema = parse_schema(DOC_SCHEMA).unwrap();
        let engine = engine(TestStore::new(&["document:readme#owner@user:alice"]));

        let result = check(&engine, &schema, "user:alice", "edit", "document:readme")
            .await
            .unwrap();

        assert!(result.allowed);
        assert_eq!(
            result.trace.unwrap().to_string(),
            "document:readme#edit -> document:readme#owner -> document:readme#owner@user:alice"
        );
    }

    #[tokio::test]
    async fn literal_permission_tuple_short_circuits() {
        let schema = parse_schema(DOC_SCHEMA).unwrap();
        let engine = engine(TestStore::new(&["document:readme#view@user:carol"]));

        let result = check(&engine, &schema, "user:carol", "view", "document:readme")
            .await
            .unwrap();

        assert!(result.allowed);
        assert_eq!(
            result.trace.unwrap().0,
            vec!["document:readme#view", "document:readme#view@user:carol"]
        );
        assert_eq!(engine.reader.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn denied_result_has_no_trace() {
        let schema = parse_schema(DOC_SCHEMA).unwrap();
        let engine = engine(TestStore::new(&[]));

        let result = check(&engine, &schema, "user:alice", "view", "document:readme")
            .await
            .unwrap();

        assert_eq!(result, CheckResult::denied());
    }

    // --- union / intersection ---

    #[tokio::test]
    async fn union_truth_table() {
        let schema = parse_schema(DOC_SCHEMA).unwrap();
        let cases: [(&[&str], bool); 4] = [
            (&[], false),
            (&["document:d#owner@user:u"], true),
            (&["document:d#viewer@user:u"], true),
            (&["document:d#owner@user:u", "document:d#viewer@user:u"], true),
        ];

        for (tuples, expected) in cases {
            let engine = engine(TestStore::new(tuples));
            assert_eq!(
                allowed(&engine, &schema, "user:u", "view", "document:d").await,
                expected,
                "tuples: {tuples:?}"
            );
        }
    }

    #[tokio::test]
    async fn intersection_truth_table() {
        let schema = parse_schema(DOC_SCHEMA).unwrap();
        let cases: [(&[&str], bool); 4] = [
            (&[], false),
            (&["document:d#owner@user:u"], false),
            (&["document:d#reviewer@user:u"], false),
            (&["document:d#owner@user:u", "document:d#reviewer@user:u"], true),
        ];

        for (tuples, expected) in cases {
            let engine = engine(TestStore::new(tuples));
            assert_eq!(
                allowed(&engine, &schema, "user:u", "approve", "document:d").await,
                expected,
                "tuples: {tuples:?}"
            );
        }
    }

    #[tokio::test]
    async fn intersection_trace_includes_every_branch() {
        let schema = parse_schema(DOC_SCHEMA).unwrap();
        let engine = engine(TestStore::new(&[
            "document:d#owner@user:u",
            "document:d#reviewer@user:u",
        ]));

        let trace = check(&engine, &schema, "user:u", "approve", "document:d")
            .await
            .unwrap()
            .trace
            .unwrap();

        assert_eq!(
            trace.0,
            vec![
                "document:d#approve",
                "document:d#owner",
                "document:d#owner@user:u",
                "document:d#reviewer",
                "document:d#reviewer@user:u",
            ]
        );
    }

    #[tokio::test]
    async fn nested_parenthesised_expression() {
        let schema = parse_schema(
            "definition user {}
             definition doc {
                relation a: user
                relation b: user
                relation c: user
                permission p = (a + b) & c
             }",
        )
        .unwrap();

        let engine_b_c = engine(TestStore::new(&["doc:x#b@user:u", "doc:x#c@user:u"]));
        assert!(allowed(&engine_b_c, &schema, "user:u", "p", "doc:x").await);

        let engine_a_only = engine(TestStore::new(&["doc:x#a@user:u"]));
        assert!(!allowed(&engine_a_only, &schema, "user:u", "p", "doc:x").await);
    }

    // --- subject sets ---

    #[tokio::test]
    async fn subject_set_expands_group_membership() {
        let schema = parse_schema(DOC_SCHEMA).unwrap();
        let engine = engine(TestStore::new(&[
            "document:readme#viewer@group:eng#member",
            "group:eng#member@user:bob",
        ]));

        let result = check(&engine, &schema, "user:bob", "view", "document:readme")
            .await
            .unwrap();

        assert!(result.allowed);
        assert_eq!(
            result.trace.unwrap().to_string(),
            "document:readme#view -> document:readme#viewer -> \
             document:readme#viewer@group:eng#member -> group:eng#member -> \
             group:eng#member@user:bob"
        );
        assert!(!allowed(&engine, &schema, "user:eve", "view", "document:readme").await);
    }

    #[tokio::test]
    async fn nested_groups_expand_transitively() {
        let schema = parse_schema(DOC_SCHEMA).unwrap();
        let engine = engine(TestStore::new(&[
            "document:readme#viewer@group:all#member",
            "group:all#member@group:eng#member",
            "group:eng#member@user:bob",
        ]));

        assert!(allowed(&engine, &schema, "user:bob", "view", "document:readme").await);
    }

    #[tokio::test]
    async fn subject_set_query_matches_exact_set() {
        let schema = parse_schema(DOC_SCHEMA).unwrap();
        let engine = engine(TestStore::new(&["document:readme#viewer@group:eng#member"]));

        assert!(allowed(&engine, &schema, "group:eng#member", "view", "document:readme").await);
    }

    #[tokio::test]
    async fn owner_expands_to_admin_and_member() {
        let schema = parse_schema(WADDLE_SCHEMA).unwrap();
        let engine = engine(TestStore::new(&[
            "waddle:w1#owner@user:alice",
            "waddle:w1#admin@waddle:w1#owner",
            "waddle:w1#member@waddle:w1#admin",
        ]));

        assert!(allowed(&engine, &schema, "user:alice", "member", "waddle:w1").await);
        assert!(allowed(&engine, &schema, "user:alice", "admin", "waddle:w1").await);
        assert!(!allowed(&engine, &schema, "user:bob", "member", "waddle:w1").await);
    }

    // --- arrows ---

    #[tokio::test]
    async fn arrow_follows_parent_admin() {
        let schema = parse_schema(WADDLE_SCHEMA).unwrap();
        let engine = engine(TestStore::new(&[
            "channel:general#parent@waddle:w1",
            "waddle:w1#admin@user:bob",
        ]));

        let result = check(&engine, &schema, "user:bob", "delete", "channel:general")
            .await
            .unwrap();

        assert!(result.allowed);
        assert_eq!(
            result.trace.unwrap().to_string(),
            "channel:general#delete -> channel:general#parent->admin -> \
             channel:general#parent@waddle:w1 -> waddle:w1#admin -> waddle:w1#admin@user:bob"
        );
    }

    #[tokio::test]
    async fn arrow_denies_without_parent_grant() {
        let schema = parse_schema(WADDLE_SCHEMA).unwrap();
        let engine = engine(TestStore::new(&[
            "channel:general#parent@waddle:w1",
            "waddle:w2#admin@user:bob",
        ]));

        assert!(!allowed(&engine, &schema, "user:bob", "delete", "channel:general").await);
    }

    #[tokio::test]
    async fn arrow_checks_every_parent() {
        let schema = parse_schema(WADDLE_SCHEMA).unwrap();
        let engine = engine(TestStore::new(&[
            "channel:general#parent@waddle:w1",
            "channel:general#parent@waddle:w2",
            "waddle:w2#admin@user:bob",
        ]));

        assert!(allowed(&engine, &schema, "user:bob", "moderate", "channel:general").await);
    }

    #[tokio::test]
    async fn arrow_skips_targets_unknown_to_schema() {
        let schema = parse_schema(WADDLE_SCHEMA).unwrap();
        let engine = engine(TestStore::new(&[
            "channel:general#parent@team:t1",
            "channel:general#parent@waddle:w1",
            "waddle:w1#admin@user:bob",
        ]));

        assert!(allowed(&engine, &schema, "user:bob", "delete", "channel:general").await);
    }

    // --- safety nets ---

    #[tokio::test]
    async fn data_cycle_hits_depth_bound() {
        let schema = parse_schema(DOC_SCHEMA).unwrap();
        let engine = engine(TestStore::new(&[
            "group:a#member@group:b#member",
            "group:b#member@group:a#member",
        ]));

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            check(&engine, &schema, "user:x", "member", "group:a"),
        )
        .await
        .expect("depth bound must terminate the check");

        assert_eq!(result.unwrap_err(), CheckError::MaxDepthExceeded(25));
    }

    #[tokio::test]
    async fn union_prefers_success_over_depth_error() {
        let schema = parse_schema(DOC_SCHEMA).unwrap();
        let engine = engine(TestStore::new(&[
            "document:d#viewer@group:a#member",
            "group:a#member@group:b#member",
            "group:b#member@group:a#member",
            "document:d#owner@user:x",
        ]));

        assert!(allowed(&engine, &schema, "user:x", "view", "document:d").await);
    }

    #[tokio::test]
    async fn storage_errors_propagate() {
        let schema = parse_schema(DOC_SCHEMA).unwrap();
        let mut store = TestStore::new(&[]);
        store.fail = true;
        let engine = engine(store);

        let err = check(&engine, &schema, "user:x", "view", "document:d")
            .await
            .unwrap_err();

        assert!(matches!(err, CheckError::StorageError(_)));
    }

    #[tokio::test]
    async fn deadline_yields_timeout() {
        let schema = parse_schema(DOC_SCHEMA).unwrap();
        let mut store = TestStore::new(&[]);
        store.delay = Some(Duration::from_millis(200));
        let engine = engine(store);

        let request = CheckRequest::new(
            "user:x".parse().unwrap(),
            "view",
            "document:d".parse().unwrap(),
        )
        .with_timeout(Duration::from_millis(20));
        let err = engine.check(&schema, &request).await.unwrap_err();

        assert_eq!(err, CheckError::Timeout(Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn small_depth_limit_applies() {
        let schema = parse_schema(DOC_SCHEMA).unwrap();
        let store = TestStore::new(&[
            "document:readme#viewer@group:all#member",
            "group:all#member@group:eng#member",
            "group:eng#member@user:bob",
        ]);
        let engine = CheckEngine::new(
            Arc::new(store),
            EngineConfig {
                max_depth: 2,
                ..EngineConfig::default()
            },
        );

        let err = check(&engine, &schema, "user:bob", "view", "document:readme")
            .await
            .unwrap_err();

        assert_eq!(err, CheckError::MaxDepthExceeded(2));
    }
}
