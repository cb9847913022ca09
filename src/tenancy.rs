//! Multi-tenancy guard.
//!
//! The tenancy mode is fixed for the whole backend at startup. Every entry
//! point that can produce work or read documents (indexer, indexing plan,
//! workspace, search query builder) checks the session's tenant identifier
//! first, so a mismatched caller is rejected before anything is queued.

use crate::error::{Result, StackshardError};
use crate::reporting::EventContext;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MultiTenancyMode {
    /// Every operation must come without a tenant identifier.
    #[default]
    None,
    /// Every operation must carry a tenant identifier; documents of all
    /// tenants share the shards and are told apart by a discriminator field.
    Discriminator,
}

impl MultiTenancyMode {
    pub fn create_strategy(self) -> Arc<dyn MultiTenancyStrategy> {
        match self {
            MultiTenancyMode::None => Arc::new(NoMultiTenancyStrategy),
            MultiTenancyMode::Discriminator => Arc::new(DiscriminatorMultiTenancyStrategy),
        }
    }
}

pub trait MultiTenancyStrategy: Send + Sync + Debug {
    fn is_enabled(&self) -> bool;

    /// Reject a tenant identifier that does not match the configured mode.
    fn check_tenant_id(&self, tenant_id: Option<&str>, context: &EventContext) -> Result<()>;

    /// Key identifying one document of one tenant, used for update/delete terms.
    fn document_uid(&self, tenant_id: Option<&str>, document_id: &str) -> String;

    /// Discriminator value stored on every document.
    fn tenant_value<'a>(&self, tenant_id: Option<&'a str>) -> &'a str;

    /// Term value reads must be restricted to, if any.
    fn tenant_filter(&self, tenant_id: Option<&str>) -> Option<String>;
}

#[derive(Debug)]
pub struct NoMultiTenancyStrategy;

impl MultiTenancyStrategy for NoMultiTenancyStrategy {
    fn is_enabled(&self) -> bool {
        false
    }

    fn check_tenant_id(&self, tenant_id: Option<&str>, context: &EventContext) -> Result<()> {
        match tenant_id {
            Some(tenant) => Err(StackshardError::UnexpectedTenantId {
                tenant: tenant.to_string(),
                context: context.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn document_uid(&self, _tenant_id: Option<&str>, document_id: &str) -> String {
        document_id.to_string()
    }

    fn tenant_value<'a>(&self, _tenant_id: Option<&'a str>) -> &'a str {
        ""
    }

    fn tenant_filter(&self, _tenant_id: Option<&str>) -> Option<String> {
        None
    }
}

#[derive(Debug)]
pub struct DiscriminatorMultiTenancyStrategy;

impl MultiTenancyStrategy for DiscriminatorMultiTenancyStrategy {
    fn is_enabled(&self) -> bool {
        true
    }

    fn check_tenant_id(&self, tenant_id: Option<&str>, context: &EventContext) -> Result<()> {
        match tenant_id {
            Some(tenant) if !tenant.is_empty() => Ok(()),
            _ => Err(StackshardError::MissingTenantId {
                context: context.to_string(),
            }),
        }
    }

    /// `<tenant length>:<tenant>_<id>`. The length prefix keeps uids distinct
    /// when tenant or document ids contain the separator.
    fn document_uid(&self, tenant_id: Option<&str>, document_id: &str) -> String {
        let tenant = tenant_id.unwrap_or_default();
        format!("{}:{}_{}", tenant.len(), tenant, document_id)
    }

    fn tenant_value<'a>(&self, tenant_id: Option<&'a str>) -> &'a str {
        tenant_id.unwrap_or_default()
    }

    fn tenant_filter(&self, tenant_id: Option<&str>) -> Option<String> {
        Some(tenant_id.unwrap_or_default().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> EventContext {
        EventContext::index("products")
    }

    #[test]
    fn disabled_rejects_tenant_id() {
        let strategy = MultiTenancyMode::None.create_strategy();
        assert!(strategy.check_tenant_id(None, &ctx()).is_ok());
        let err = strategy.check_tenant_id(Some("acme"), &ctx()).unwrap_err();
        assert!(matches!(err, StackshardError::UnexpectedTenantId { ref tenant, .. } if tenant == "acme"));
        assert!(err.to_string().contains("index 'products'"));
    }

    #[test]
    fn discriminator_requires_tenant_id() {
        let strategy = MultiTenancyMode::Discriminator.create_strategy();
        assert!(strategy.check_tenant_id(Some("acme"), &ctx()).is_ok());
        let err = strategy.check_tenant_id(None, &ctx()).unwrap_err();
        assert!(matches!(err, StackshardError::MissingTenantId { .. }));
        let err = strategy.check_tenant_id(Some(""), &ctx()).unwrap_err();
        assert!(matches!(err, StackshardError::MissingTenantId { .. }));
    }

    #[test]
    fn discriminator_scopes_uids_per_tenant() {
        let strategy = DiscriminatorMultiTenancyStrategy;
        assert_eq!(strategy.document_uid(Some("acme"), "1"), "4:acme_1");
        assert_ne!(
            strategy.document_uid(Some("acme"), "1"),
            strategy.document_uid(Some("globex"), "1")
        );
        assert_eq!(strategy.tenant_filter(Some("acme")), Some("acme".to_string()));
    }

    #[test]
    fn discriminator_uids_survive_separators_in_ids() {
        let strategy = DiscriminatorMultiTenancyStrategy;
        assert_ne!(
            strategy.document_uid(Some("a"), "b_c"),
            strategy.document_uid(Some("a_b"), "c")
        );
        assert_ne!(
            strategy.document_uid(Some("a:1"), "x"),
            strategy.document_uid(Some("a"), "1_x")
        );
    }

    #[test]
    fn disabled_uses_raw_ids_and_no_filter() {
        let strategy = NoMultiTenancyStrategy;
        assert_eq!(strategy.document_uid(None, "1"), "1");
        assert_eq!(strategy.tenant_value(None), "");
        assert_eq!(strategy.tenant_filter(None), None);
    }
}
