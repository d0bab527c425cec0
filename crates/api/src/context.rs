use settlekit_core::TenantId;

/// Tenant context for a request.
///
/// Inserted by the tenant middleware; every settlement route reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: TenantId,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }
}

/// Correlation id carried into job payloads and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    request_id: String,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
        }
    }

    pub fn generate() -> Self {
        Self::new(format!("req-{}", uuid::Uuid::now_v7().simple()))
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}
