//! Task-local tenant context.
//!
//! Callers that do not thread an explicit tenant through an API can run
//! work inside a tenant scope and let downstream code read it. The value
//! is task-local: concurrent tasks never observe each other's tenant.

use std::future::Future;

tokio::task_local! {
    static CURRENT_TENANT: Option<String>;
}

/// Scoped access to the current tenant id.
pub struct TenantContext;

impl TenantContext {
    /// Run `future` with the given tenant id in scope.
    pub async fn scope<F>(tenant_id: Option<String>, future: F) -> F::Output
    where
        F: Future,
    {
        CURRENT_TENANT.scope(tenant_id, future).await
    }

    /// The current tenant id, or `None` outside any scope.
    pub fn current() -> Option<String> {
        CURRENT_TENANT
            .try_with(|tenant| tenant.clone())
            .ok()
            .flatten()
    }
}
