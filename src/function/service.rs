use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{FaasError, Result};
use crate::function::model::{CreateFunctionRequest, Function, DEFAULT_RUNTIME};
use crate::store::{CodeStore, Store};

/// Function metadata plus code blob management.
#[derive(Clone)]
pub struct FunctionService {
    store: Arc<dyn Store>,
    code: Arc<dyn CodeStore>,
}

impl FunctionService {
    pub fn new(store: Arc<dyn Store>, code: Arc<dyn CodeStore>) -> Self {
        Self { store, code }
    }

    /// Create a function in two phases: insert the row without a code
    /// locator, write the source blob, then bind the locator.
    pub async fn create_function(&self, req: CreateFunctionRequest) -> Result<Function> {
        if req.name.trim().is_empty() {
            return Err(FaasError::validation("name is required"));
        }
        if req.code.trim().is_empty() {
            return Err(FaasError::validation("code is required"));
        }
        if let Some(param) = req.params.iter().find(|p| p.key.trim().is_empty()) {
            return Err(FaasError::validation(format!(
                "parameter of type '{}' has an empty key",
                param.param_type
            )));
        }

        let runtime = req
            .runtime
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_RUNTIME.to_string());

        let now = Utc::now();
        let mut function = Function {
            id: Uuid::new_v4(),
            name: req.name,
            description: req.description,
            runtime,
            code_locator: None,
            code: None,
            sample_event: req.sample_event,
            params: req.params,
            created_at: now,
            updated_at: now,
        };

        self.store.create_function(&function).await?;

        let locator = function.default_code_locator();
        self.code.save_code(&locator, &req.code).await?;
        self.store.bind_code_locator(function.id, &locator).await?;

        tracing::info!(
            function_id = %function.id,
            runtime = %function.runtime,
            family = %function.family(),
            "Function created"
        );

        function.code_locator = Some(locator);
        function.code = Some(req.code);
        Ok(function)
    }

    /// Load a function with its source text.
    ///
    /// A function whose locator has not been bound yet is returned without
    /// code.
    pub async fn get_function(&self, id: Uuid) -> Result<Function> {
        let mut function = self
            .store
            .get_function(id)
            .await?
            .ok_or(FaasError::FunctionNotFound(id))?;

        if let Some(locator) = function.code_locator.as_deref() {
            function.code = Some(self.code.get_code(locator).await?);
        }
        Ok(function)
    }

    /// All functions, newest first, without code.
    pub async fn list_functions(&self) -> Result<Vec<Function>> {
        self.store.list_functions().await
    }

    /// Delete a function, its invocations and schedules, and its code blob.
    pub async fn delete_function(&self, id: Uuid) -> Result<Function> {
        let function = self
            .store
            .delete_function(id)
            .await?
            .ok_or(FaasError::FunctionNotFound(id))?;

        if let Some(locator) = function.code_locator.as_deref() {
            if let Err(e) = self.code.delete_code(locator).await {
                tracing::warn!(function_id = %id, locator, error = %e, "Failed to delete code blob");
            }
        }

        tracing::info!(function_id = %id, "Function deleted");
        Ok(function)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::FunctionParam;
    use crate::store::{MemoryCodeStore, MemoryStore};

    fn service() -> (FunctionService, Arc<MemoryCodeStore>) {
        let code = Arc::new(MemoryCodeStore::new());
        (
            FunctionService::new(Arc::new(MemoryStore::new()), code.clone()),
            code,
        )
    }

    fn request(name: &str, code: &str) -> CreateFunctionRequest {
        CreateFunctionRequest {
            name: name.to_string(),
            code: code.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_binds_code_and_defaults_runtime() {
        let (svc, code) = service();
        let created = svc
            .create_function(request("double", "def handler(e): return e"))
            .await
            .unwrap();

        assert_eq!(created.runtime, DEFAULT_RUNTIME);
        let locator = created.code_locator.clone().unwrap();
        assert!(locator.ends_with(".py"));
        assert_eq!(
            code.get_code(&locator).await.unwrap(),
            "def handler(e): return e"
        );

        let loaded = svc.get_function(created.id).await.unwrap();
        assert_eq!(loaded.code.as_deref(), Some("def handler(e): return e"));
        assert_eq!(loaded.code_locator, Some(locator));
    }

    #[tokio::test]
    async fn create_rejects_missing_name_and_code() {
        let (svc, _) = service();
        let err = svc.create_function(request(" ", "x")).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "name is required");

        let err = svc.create_function(request("f", "")).await.unwrap_err();
        assert_eq!(err.to_string(), "code is required");
    }

    #[tokio::test]
    async fn create_rejects_blank_param_key() {
        let (svc, _) = service();
        let mut req = request("f", "x");
        req.params.push(FunctionParam {
            key: "".into(),
            param_type: "number".into(),
            required: true,
            description: None,
            default_value: None,
        });
        assert!(svc.create_function(req).await.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn get_missing_function_is_not_found() {
        let (svc, _) = service();
        let err = svc.get_function(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_removes_row_and_blob() {
        let (svc, code) = service();
        let created = svc.create_function(request("f", "x")).await.unwrap();
        let locator = created.code_locator.clone().unwrap();

        svc.delete_function(created.id).await.unwrap();
        assert!(svc.get_function(created.id).await.unwrap_err().is_not_found());
        assert!(code.get_code(&locator).await.is_err());
        assert!(svc
            .delete_function(created.id)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn list_omits_code() {
        let (svc, _) = service();
        svc.create_function(request("a", "x")).await.unwrap();
        svc.create_function(request("b", "y")).await.unwrap();

        let listed = svc.list_functions().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|f| f.code.is_none()));
    }
}
