use std::sync::OnceLock;

use crate::optimizer::OptimizeCache;
use crate::principal::Principal;

/// State scoped to one request: who is acting, plus the caches the
/// permission engine and query optimizer fill while serving it. Dropped with
/// the request; nothing here is shared across requests.
pub struct RequestContext {
    principal: Principal,
    pub(crate) editable_types: OnceLock<Vec<String>>,
    pub(crate) admin_types: OnceLock<Vec<String>>,
    optimize: OptimizeCache,
}

impl RequestContext {
    pub fn new(principal: Principal) -> Self {
        Self {
            principal,
            editable_types: OnceLock::new(),
            admin_types: OnceLock::new(),
            optimize: OptimizeCache::default(),
        }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn optimize_cache(&self) -> &OptimizeCache {
        &self.optimize
    }
}
