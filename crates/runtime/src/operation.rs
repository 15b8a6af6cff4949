//! Operation registry — one entry per tracked run.
//!
//! An operation owns a [`CancellationToken`]. Cancelling flips the status
//! and fires the token; stopping is up to whoever holds the token.
//! Parent/child links are stored but never acted on: a child's token is
//! independent of its parent's, so cascading a cancellation is always an
//! explicit [`OperationRegistry::cancel_children`] call.

use agentloop_core::error::OperationError;
use chrono::{DateTime, TimeDelta, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tokio_util::sync::CancellationToken;

/// How long a terminal operation stays queryable after it ends.
pub const FINISHED_RETENTION: TimeDelta = TimeDelta::minutes(10);

/// Lifecycle of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Running,
    Cancelled,
    Completed,
    Failed,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Who a run speaks for in a multi-agent conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationScope {
    /// The group's supervisor
    Group,
    /// A member agent speaking in a group
    GroupAgent,
    /// A delegated task on its own thread
    SubAgent,
}

/// Identifiers supplied by the caller when starting a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationContext {
    pub agent_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_agent_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<OperationScope>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

impl OperationContext {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Self::default()
        }
    }

    pub fn with_topic(mut self, topic_id: impl Into<String>) -> Self {
        self.topic_id = Some(topic_id.into());
        self
    }

    pub fn in_group(mut self, group_id: impl Into<String>, scope: OperationScope) -> Self {
        self.group_id = Some(group_id.into());
        self.scope = Some(scope);
        self
    }

    pub fn with_sub_agent(mut self, sub_agent_id: impl Into<String>) -> Self {
        self.sub_agent_id = Some(sub_agent_id.into());
        self
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Whether the run belongs to a group chat.
    pub fn is_group(&self) -> bool {
        matches!(self.scope, Some(OperationScope::Group | OperationScope::GroupAgent))
    }

    /// The agent that owns messages generated by this run.
    ///
    /// Inside a group the speaking member (`sub_agent_id`) owns them.
    pub fn message_owner(&self) -> &str {
        match (self.scope, self.sub_agent_id.as_deref()) {
            (Some(OperationScope::Group | OperationScope::GroupAgent), Some(member)) => member,
            _ => &self.agent_id,
        }
    }
}

/// Read-only view of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSnapshot {
    pub id: String,
    pub status: OperationStatus,
    pub context: OperationContext,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    #[serde(default)]
    pub children: Vec<String>,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Work deferred until a whole run has finished.
pub type AfterCompletionHook = Box<
    dyn FnOnce(OperationSnapshot) -> BoxFuture<'static, agentloop_core::Result<()>> + Send + Sync,
>;

struct Operation {
    snapshot: OperationSnapshot,
    token: CancellationToken,
    hooks: Vec<AfterCompletionHook>,
}

/// Process-wide map from operation id to run metadata.
#[derive(Default)]
pub struct OperationRegistry {
    operations: RwLock<HashMap<String, Operation>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, context: OperationContext, parent_id: Option<String>) -> String {
        let id = format!("op_{}", uuid::Uuid::new_v4().simple());
        let operation = Operation {
            snapshot: OperationSnapshot {
                id: id.clone(),
                status: OperationStatus::Running,
                context,
                parent_id,
                children: Vec::new(),
                started_at: Utc::now(),
                ended_at: None,
                error: None,
            },
            token: CancellationToken::new(),
            hooks: Vec::new(),
        };
        self.operations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), operation);
        id
    }

    /// Register a new running operation.
    pub fn start(&self, context: OperationContext) -> String {
        let id = self.insert(context, None);
        tracing::debug!(operation_id = %id, "Operation started");
        id
    }

    /// Register an operation linked to `parent_id`.
    pub fn start_child(
        &self,
        parent_id: &str,
        context: OperationContext,
    ) -> Result<String, OperationError> {
        if !self.contains(parent_id) {
            return Err(OperationError::NotFound(parent_id.to_string()));
        }
        let id = self.insert(context, Some(parent_id.to_string()));
        let mut ops = self.operations.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = ops.get_mut(parent_id) {
            parent.snapshot.children.push(id.clone());
        }
        tracing::debug!(operation_id = %id, parent_id, "Child operation started");
        Ok(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// The abort signal of an operation.
    pub fn token(&self, id: &str) -> Option<CancellationToken> {
        self.operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|op| op.token.clone())
    }

    pub fn is_cancelled(&self, id: &str) -> bool {
        self.operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .is_some_and(|op| op.snapshot.status == OperationStatus::Cancelled)
    }

    fn finish(
        &self,
        id: &str,
        status: OperationStatus,
        error: Option<String>,
    ) -> Result<(), OperationError> {
        let mut ops = self.operations.write().unwrap_or_else(PoisonError::into_inner);
        let op = ops
            .get_mut(id)
            .ok_or_else(|| OperationError::NotFound(id.to_string()))?;
        if op.snapshot.status.is_terminal() {
            return Err(OperationError::AlreadyTerminal {
                id: id.to_string(),
                status: op.snapshot.status.to_string(),
            });
        }
        op.snapshot.status = status;
        op.snapshot.ended_at = Some(Utc::now());
        op.snapshot.error = error;
        if status == OperationStatus::Cancelled {
            op.token.cancel();
        }
        Ok(())
    }

    /// Flag a running operation cancelled and fire its abort signal.
    pub fn cancel(&self, id: &str) -> Result<(), OperationError> {
        self.finish(id, OperationStatus::Cancelled, None)?;
        tracing::info!(operation_id = %id, "Operation cancelled");
        Ok(())
    }

    /// Cancel every running descendant of `id`. Returns the ids cancelled.
    pub fn cancel_children(&self, id: &str) -> Vec<String> {
        let mut cancelled = Vec::new();
        let mut queue = self.children(id);
        while let Some(child) = queue.pop() {
            queue.extend(self.children(&child));
            if self.cancel(&child).is_ok() {
                cancelled.push(child);
            }
        }
        cancelled
    }

    pub fn complete(&self, id: &str) -> Result<(), OperationError> {
        self.finish(id, OperationStatus::Completed, None)?;
        tracing::debug!(operation_id = %id, "Operation completed");
        Ok(())
    }

    pub fn fail(&self, id: &str, error: impl Into<String>) -> Result<(), OperationError> {
        let error = error.into();
        tracing::warn!(operation_id = %id, error = %error, "Operation failed");
        self.finish(id, OperationStatus::Failed, Some(error))
    }

    pub fn get(&self, id: &str) -> Option<OperationSnapshot> {
        self.operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|op| op.snapshot.clone())
    }

    pub fn children(&self, id: &str) -> Vec<String> {
        self.operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|op| op.snapshot.children.clone())
            .unwrap_or_default()
    }

    /// Queue work to run after the whole operation finishes.
    pub fn register_after_completion(
        &self,
        id: &str,
        hook: AfterCompletionHook,
    ) -> Result<(), OperationError> {
        let mut ops = self.operations.write().unwrap_or_else(PoisonError::into_inner);
        let op = ops
            .get_mut(id)
            .ok_or_else(|| OperationError::NotFound(id.to_string()))?;
        op.hooks.push(hook);
        Ok(())
    }

    /// Remove and return the queued hooks, in registration order.
    pub fn take_after_completion_hooks(&self, id: &str) -> Vec<AfterCompletionHook> {
        self.operations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(id)
            .map(|op| std::mem::take(&mut op.hooks))
            .unwrap_or_default()
    }

    /// Forget terminal operations. Returns how many were removed.
    pub fn prune_finished(&self) -> usize {
        self.prune_finished_before(Utc::now())
    }

    /// Forget terminal operations that ended at or before `cutoff`.
    ///
    /// The runner calls this on every settle with [`FINISHED_RETENTION`],
    /// so a long-lived registry only holds recent snapshots.
    pub fn prune_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut ops = self.operations.write().unwrap_or_else(PoisonError::into_inner);
        let before = ops.len();
        ops.retain(|_, op| {
            !op.snapshot.status.is_terminal()
                || op.snapshot.ended_at.is_none_or(|ended| ended > cutoff)
        });
        let removed = before - ops.len();
        if removed > 0 {
            tracing::debug!(removed, "Pruned finished operations");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.operations.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::{Arc, Mutex};

    #[test]
    fn start_and_complete() {
        let registry = OperationRegistry::new();
        let id = registry.start(OperationContext::new("agent"));
        assert_eq!(registry.get(&id).unwrap().status, OperationStatus::Running);

        registry.complete(&id).unwrap();
        let snapshot = registry.get(&id).unwrap();
        assert_eq!(snapshot.status, OperationStatus::Completed);
        assert!(snapshot.ended_at.is_some());
    }

    #[test]
    fn cancel_fires_token() {
        let registry = OperationRegistry::new();
        let id = registry.start(OperationContext::new("agent"));
        let token = registry.token(&id).unwrap();

        registry.cancel(&id).unwrap();

        assert!(token.is_cancelled());
        assert!(registry.is_cancelled(&id));
    }

    #[test]
    fn terminal_operations_reject_transitions() {
        let registry = OperationRegistry::new();
        let id = registry.start(OperationContext::new("agent"));
        registry.fail(&id, "boom").unwrap();

        let err = registry.cancel(&id).unwrap_err();
        assert!(matches!(err, OperationError::AlreadyTerminal { ref status, .. } if status == "failed"));
        assert_eq!(registry.get(&id).unwrap().error.as_deref(), Some("boom"));
    }

    #[test]
    fn unknown_operation_is_not_found() {
        let registry = OperationRegistry::new();
        assert!(matches!(registry.complete("nope"), Err(OperationError::NotFound(_))));
        assert!(registry.start_child("nope", OperationContext::new("a")).is_err());
    }

    #[test]
    fn cancelling_parent_does_not_cascade() {
        let registry = OperationRegistry::new();
        let parent = registry.start(OperationContext::new("agent"));
        let child = registry
            .start_child(&parent, OperationContext::new("agent").with_thread("t1"))
            .unwrap();

        registry.cancel(&parent).unwrap();

        assert_eq!(registry.get(&child).unwrap().status, OperationStatus::Running);
        assert!(!registry.token(&child).unwrap().is_cancelled());
        assert_eq!(registry.get(&child).unwrap().parent_id.as_deref(), Some(parent.as_str()));
    }

    #[test]
    fn cancel_children_is_explicit_and_recursive() {
        let registry = OperationRegistry::new();
        let parent = registry.start(OperationContext::new("agent"));
        let a = registry.start_child(&parent, OperationContext::new("a")).unwrap();
        let b = registry.start_child(&parent, OperationContext::new("b")).unwrap();
        let grandchild = registry.start_child(&a, OperationContext::new("c")).unwrap();
        registry.complete(&b).unwrap();

        let mut cancelled = registry.cancel_children(&parent);
        cancelled.sort();
        let mut expected = vec![a.clone(), grandchild.clone()];
        expected.sort();

        assert_eq!(cancelled, expected);
        assert_eq!(registry.get(&b).unwrap().status, OperationStatus::Completed);
        assert_eq!(registry.get(&parent).unwrap().status, OperationStatus::Running);
    }

    #[tokio::test]
    async fn hooks_come_back_in_registration_order() {
        let registry = OperationRegistry::new();
        let id = registry.start(OperationContext::new("agent"));
        let seen = Arc::new(Mutex::new(Vec::new()));

        for n in 0..3 {
            let seen = seen.clone();
            registry
                .register_after_completion(
                    &id,
                    Box::new(move |_snapshot| {
                        async move {
                            seen.lock().unwrap().push(n);
                            Ok(())
                        }
                        .boxed()
                    }),
                )
                .unwrap();
        }

        let snapshot = registry.get(&id).unwrap();
        for hook in registry.take_after_completion_hooks(&id) {
            hook(snapshot.clone()).await.unwrap();
        }
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
        assert!(registry.take_after_completion_hooks(&id).is_empty());
    }

    #[test]
    fn message_owner_follows_scope() {
        let plain = OperationContext::new("agent").with_sub_agent("member");
        assert_eq!(plain.message_owner(), "agent");

        let group = OperationContext::new("agent")
            .in_group("g1", OperationScope::GroupAgent)
            .with_sub_agent("member");
        assert_eq!(group.message_owner(), "member");
        assert!(group.is_group());
    }

    #[test]
    fn prune_removes_only_finished() {
        let registry = OperationRegistry::new();
        let done = registry.start(OperationContext::new("a"));
        let _running = registry.start(OperationContext::new("b"));
        registry.complete(&done).unwrap();

        assert_eq!(registry.prune_finished(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn prune_before_keeps_recent_snapshots() {
        let registry = OperationRegistry::new();
        let done = registry.start(OperationContext::new("a"));
        registry.complete(&done).unwrap();

        assert_eq!(registry.prune_finished_before(Utc::now() - FINISHED_RETENTION), 0);
        assert!(registry.get(&done).is_some());
        assert_eq!(registry.prune_finished_before(Utc::now() + TimeDelta::seconds(1)), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn registry_is_shareable_across_tasks() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<OperationRegistry>();
        assert_send_sync::<Arc<OperationRegistry>>();
    }
}
