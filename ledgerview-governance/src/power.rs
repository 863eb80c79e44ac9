//! Voting power reads.

use std::sync::Arc;

use async_trait::async_trait;
use ledgerview_core::{
    CacheNamespace, ChainReader, FetchError, FetchResult, GovernanceConfig, Identity, ValueCall,
    Weight,
};
use ledgerview_storage::{CacheKey, OwnerContext, ValueFetcher};

/// Fetches an identity's voting weight from the configured contract method.
///
/// The identity is taken from the cache key's owner, so one fetcher serves
/// every voter.
pub struct VotingPowerFetcher {
    reader: Arc<dyn ChainReader>,
    contract: String,
    method: String,
}

impl VotingPowerFetcher {
    pub fn new(reader: Arc<dyn ChainReader>, config: &GovernanceConfig) -> Self {
        Self {
            reader,
            contract: config.power_contract.clone(),
            method: config.power_method.clone(),
        }
    }

    /// Cache key under which `identity`'s weight is kept.
    pub fn cache_key(&self, identity: &Identity) -> CacheKey {
        CacheKey::for_identity(
            CacheNamespace::VotingPower,
            identity,
            format!("{}.{}", self.contract, self.method),
        )
    }

    fn call_for(&self, identity: &Identity) -> ValueCall {
        ValueCall::new(&self.contract, &self.method).arg(identity.as_str())
    }
}

#[async_trait]
impl ValueFetcher<Weight> for VotingPowerFetcher {
    async fn fetch(&self, key: &CacheKey) -> FetchResult<Weight> {
        let identity = match key.owner() {
            OwnerContext::Identity(identity) => identity,
            OwnerContext::Shared => {
                return Err(FetchError::Upstream {
                    key: key.to_string(),
                    reason: "voting power is only defined for an identity".to_string(),
                })
            }
        };

        let call = self.call_for(identity);
        let value = self.reader.read_value(&call).await?;
        value.as_weight(&call.to_string())
    }
}
