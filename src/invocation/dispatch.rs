use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::broker::{ExecutionQueue, ResultStore};
use crate::error::{FaasError, Result};
use crate::function::FunctionService;
use crate::invocation::model::{Invocation, InvocationCompletion};
use crate::messages::ExecutionRequest;
use crate::store::Store;

pub const DEFAULT_LIST_LIMIT: usize = 20;
pub const MAX_LIST_LIMIT: usize = 1000;

/// Creates invocations, hands them to workers, and reconciles worker
/// results back into the persisted record.
#[derive(Clone)]
pub struct InvocationDispatcher {
    functions: FunctionService,
    store: Arc<dyn Store>,
    queue: Arc<dyn ExecutionQueue>,
    results: Arc<dyn ResultStore>,
}

impl InvocationDispatcher {
    pub fn new(
        functions: FunctionService,
        store: Arc<dyn Store>,
        queue: Arc<dyn ExecutionQueue>,
        results: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            functions,
            store,
            queue,
            results,
        }
    }

    /// Persist a pending invocation and enqueue it on the function's
    /// runtime partition.
    ///
    /// If the enqueue fails after the row is written, the invocation stays
    /// pending forever. The error is still returned to the caller.
    pub async fn invoke(
        &self,
        function_id: Uuid,
        input: Value,
        invoked_by: &str,
    ) -> Result<Invocation> {
        let function = self.functions.get_function(function_id).await?;
        let code = function.code.clone().ok_or_else(|| {
            FaasError::validation(format!("function {} has no code bound yet", function_id))
        })?;

        let input = match input {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };

        let invocation = Invocation::new(function_id, input, invoked_by);
        self.store.create_invocation(&invocation).await?;

        let request = ExecutionRequest {
            invocation_id: invocation.id,
            function_id,
            code,
            input: invocation.input_event.clone(),
            runtime: function.runtime.clone(),
        };
        let family = function.family();
        if let Err(e) = self.queue.push(family, &request).await {
            tracing::error!(
                invocation_id = %invocation.id,
                function_id = %function_id,
                runtime = %family,
                error = %e,
                "Failed to enqueue execution request; invocation left pending"
            );
            return Err(e);
        }

        tracing::info!(
            invocation_id = %invocation.id,
            function_id = %function_id,
            runtime = %family,
            invoked_by,
            "Invocation enqueued"
        );
        Ok(invocation)
    }

    /// Current state of an invocation, completing it from the result store
    /// if a worker result is available.
    ///
    /// Terminal records are returned without touching the result store.
    /// A missing or expired result leaves the record pending.
    pub async fn poll_result(&self, invocation_id: Uuid) -> Result<Invocation> {
        let invocation = self.load(invocation_id).await?;
        self.reconcile(invocation).await
    }

    /// Like [`poll_result`](Self::poll_result), scoped to one function. An
    /// invocation owned by another function is reported as not found and
    /// left untouched.
    pub async fn poll_function_result(
        &self,
        function_id: Uuid,
        invocation_id: Uuid,
    ) -> Result<Invocation> {
        let invocation = self.load(invocation_id).await?;
        if invocation.function_id != function_id {
            return Err(FaasError::InvocationNotFound(invocation_id));
        }
        self.reconcile(invocation).await
    }

    async fn load(&self, invocation_id: Uuid) -> Result<Invocation> {
        self.store
            .get_invocation(invocation_id)
            .await?
            .ok_or(FaasError::InvocationNotFound(invocation_id))
    }

    async fn reconcile(&self, invocation: Invocation) -> Result<Invocation> {
        let invocation_id = invocation.id;
        if invocation.status.is_terminal() {
            return Ok(invocation);
        }

        let Some(result) = self.results.get(invocation_id).await? else {
            return Ok(invocation);
        };

        let completion = InvocationCompletion::from_result(&result);
        let applied = self
            .store
            .complete_invocation(invocation_id, &completion)
            .await?;
        if applied {
            tracing::info!(
                invocation_id = %invocation_id,
                status = %completion.status,
                duration_ms = completion.duration_ms,
                "Invocation completed"
            );
        } else {
            tracing::debug!(invocation_id = %invocation_id, "Invocation already completed by another poller");
        }

        self.load(invocation_id).await
    }

    /// Invocations of a function, newest first. A zero limit selects the
    /// default; larger limits are capped.
    pub async fn list_invocations(
        &self,
        function_id: Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<Invocation>> {
        let limit = match limit {
            None | Some(0) => DEFAULT_LIST_LIMIT,
            Some(n) => n.min(MAX_LIST_LIMIT),
        };
        self.store.list_invocations(function_id, limit).await
    }
}
