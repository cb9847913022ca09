//! Partitioning a logical index into shards.
//!
//! A strategy is initialized once, at index startup, and declares either a
//! set of shard identifiers or that the index is not sharded. The declared
//! layout is frozen into a [`ShardRouter`] that routes documents for the
//! rest of the index's life.

use crate::config::{ShardingConfig, ShardingStrategyName};
use crate::error::{Result, StackshardError};
use crate::types::ShardId;
use indexmap::IndexSet;
use std::fmt::Debug;
use std::sync::Arc;

/// Handed to [`ShardingStrategy::initialize`].
#[derive(Debug)]
pub struct ShardingStrategyInitializationContext<'a> {
    index: &'a str,
    config: &'a ShardingConfig,
    identifiers: Option<IndexSet<String>>,
    sharding_disabled: bool,
}

impl<'a> ShardingStrategyInitializationContext<'a> {
    pub fn new(index: &'a str, config: &'a ShardingConfig) -> Self {
        ShardingStrategyInitializationContext {
            index,
            config,
            identifiers: None,
            sharding_disabled: false,
        }
    }

    pub fn index_name(&self) -> &str {
        self.index
    }

    pub fn config(&self) -> &ShardingConfig {
        self.config
    }

    pub fn shard_identifiers(&mut self, identifiers: IndexSet<String>) {
        self.identifiers = Some(identifiers);
        self.sharding_disabled = false;
    }

    pub fn disable_sharding(&mut self) {
        self.identifiers = None;
        self.sharding_disabled = true;
    }

    /// The declared layout. Declaring neither, or an empty set, is a
    /// configuration error.
    fn finish(self) -> Result<ShardLayout> {
        if self.sharding_disabled {
            return Ok(ShardLayout::Unsharded);
        }
        match self.identifiers {
            Some(identifiers) if !identifiers.is_empty() => Ok(ShardLayout::Sharded(identifiers)),
            _ => Err(StackshardError::MissingShardIdentifiers {
                index: self.index.to_string(),
            }),
        }
    }
}

pub trait ShardingStrategy: Send + Sync + Debug {
    fn initialize(&mut self, context: &mut ShardingStrategyInitializationContext<'_>)
        -> Result<()>;

    /// The shard a document belongs to. Only called on sharded indexes.
    fn to_shard_identifier(&self, document_id: &str, routing_key: Option<&str>) -> Result<String>;

    /// The shards that may hold documents with any of the given routing keys.
    fn to_shard_identifiers(&self, routing_keys: &[String]) -> Result<IndexSet<String>>;
}

pub fn create_sharding_strategy(config: &ShardingConfig) -> Box<dyn ShardingStrategy> {
    match config.strategy {
        ShardingStrategyName::None => Box::new(NoShardingStrategy),
        ShardingStrategyName::Hash => Box::new(HashShardingStrategy::default()),
        ShardingStrategyName::Explicit => Box::new(ExplicitShardingStrategy::default()),
    }
}

#[derive(Debug, Clone, Default)]
pub struct NoShardingStrategy;

impl ShardingStrategy for NoShardingStrategy {
    fn initialize(
        &mut self,
        context: &mut ShardingStrategyInitializationContext<'_>,
    ) -> Result<()> {
        context.disable_sharding();
        Ok(())
    }

    fn to_shard_identifier(
        &self,
        _document_id: &str,
        _routing_key: Option<&str>,
    ) -> Result<String> {
        Err(StackshardError::Internal(
            "routing requested on an unsharded index".to_string(),
        ))
    }

    fn to_shard_identifiers(&self, _routing_keys: &[String]) -> Result<IndexSet<String>> {
        Ok(IndexSet::new())
    }
}

/// `number_of_shards` shards named `"0"` to `"n-1"`; documents are spread by
/// a hash of their routing key.
#[derive(Debug, Clone, Default)]
pub struct HashShardingStrategy {
    identifiers: Vec<String>,
}

impl HashShardingStrategy {
    /// 31-multiplier hash over UTF-16 code units, stable across runs and platforms.
    pub fn hash(key: &str) -> i32 {
        key.encode_utf16()
            .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
    }

    fn pick(&self, key: &str) -> Result<&String> {
        let n = self.identifiers.len() as i64;
        if n == 0 {
            return Err(StackshardError::Internal(
                "hash sharding strategy used before initialization".to_string(),
            ));
        }
        let slot = (i64::from(Self::hash(key)) % n).unsigned_abs() as usize;
        self.identifiers
            .get(slot)
            .ok_or_else(|| StackshardError::Internal(format!("no shard at slot {}", slot)))
    }
}

impl ShardingStrategy for HashShardingStrategy {
    fn initialize(
        &mut self,
        context: &mut ShardingStrategyInitializationContext<'_>,
    ) -> Result<()> {
        let count = context.config().number_of_shards.unwrap_or(0);
        if count == 0 {
            return Err(StackshardError::Config(format!(
                "index '{}': the hash sharding strategy requires sharding.number_of_shards >= 1",
                context.index_name()
            )));
        }
        self.identifiers = (0..count).map(|i| i.to_string()).collect();
        context.shard_identifiers(self.identifiers.iter().cloned().collect());
        Ok(())
    }

    fn to_shard_identifier(&self, document_id: &str, routing_key: Option<&str>) -> Result<String> {
        self.pick(routing_key.unwrap_or(document_id)).cloned()
    }

    fn to_shard_identifiers(&self, routing_keys: &[String]) -> Result<IndexSet<String>> {
        routing_keys
            .iter()
            .map(|key| self.pick(key).cloned())
            .collect()
    }
}

/// Shards named by configuration; a document's routing key must be the
/// name of its shard.
#[derive(Debug, Clone, Default)]
pub struct ExplicitShardingStrategy {
    identifiers: IndexSet<String>,
    index: String,
}

impl ExplicitShardingStrategy {
    fn check(&self, key: &str) -> Result<String> {
        if self.identifiers.contains(key) {
            Ok(key.to_string())
        } else {
            Err(StackshardError::UnknownShard {
                index: self.index.clone(),
                shard: key.to_string(),
            })
        }
    }
}

impl ShardingStrategy for ExplicitShardingStrategy {
    fn initialize(
        &mut self,
        context: &mut ShardingStrategyInitializationContext<'_>,
    ) -> Result<()> {
        self.index = context.index_name().to_string();
        self.identifiers = context.config().shard_identifiers.iter().cloned().collect();
        context.shard_identifiers(self.identifiers.clone());
        Ok(())
    }

    fn to_shard_identifier(&self, document_id: &str, routing_key: Option<&str>) -> Result<String> {
        self.check(routing_key.unwrap_or(document_id))
    }

    fn to_shard_identifiers(&self, routing_keys: &[String]) -> Result<IndexSet<String>> {
        routing_keys.iter().map(|key| self.check(key)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardLayout {
    Unsharded,
    Sharded(IndexSet<String>),
}

/// A strategy frozen after initialization, with its shard layout.
#[derive(Debug, Clone)]
pub struct ShardRouter {
    index: String,
    strategy: Arc<dyn ShardingStrategy>,
    layout: ShardLayout,
}

impl ShardRouter {
    pub fn initialize(
        index: &str,
        config: &ShardingConfig,
        mut strategy: Box<dyn ShardingStrategy>,
    ) -> Result<Self> {
        let mut context = ShardingStrategyInitializationContext::new(index, config);
        strategy.initialize(&mut context)?;
        let layout = context.finish()?;
        match &layout {
            ShardLayout::Unsharded => tracing::info!("[{}] sharding disabled", index),
            ShardLayout::Sharded(ids) => tracing::info!(
                "[{}] {} shard(s): {}",
                index,
                ids.len(),
                ids.iter().cloned().collect::<Vec<_>>().join(", ")
            ),
        }
        Ok(ShardRouter {
            index: index.to_string(),
            strategy: Arc::from(strategy),
            layout,
        })
    }

    pub fn layout(&self) -> &ShardLayout {
        &self.layout
    }

    /// Every shard of the index, in declaration order.
    pub fn shard_ids(&self) -> Vec<ShardId> {
        match &self.layout {
            ShardLayout::Unsharded => vec![None],
            ShardLayout::Sharded(ids) => ids.iter().cloned().map(Some).collect(),
        }
    }

    pub fn route(&self, document_id: &str, routing_key: Option<&str>) -> Result<ShardId> {
        match &self.layout {
            ShardLayout::Unsharded => Ok(None),
            ShardLayout::Sharded(ids) => {
                let shard = self.strategy.to_shard_identifier(document_id, routing_key)?;
                if ids.contains(&shard) {
                    Ok(Some(shard))
                } else {
                    Err(StackshardError::UnknownShard {
                        index: self.index.clone(),
                        shard,
                    })
                }
            }
        }
    }

    /// Shards targeted by the routing keys; every shard when there are none.
    pub fn route_all(&self, routing_keys: &[String]) -> Result<Vec<ShardId>> {
        match &self.layout {
            ShardLayout::Unsharded => Ok(vec![None]),
            ShardLayout::Sharded(_) if routing_keys.is_empty() => Ok(self.shard_ids()),
            ShardLayout::Sharded(_) => Ok(self
                .strategy
                .to_shard_identifiers(routing_keys)?
                .into_iter()
                .map(Some)
                .collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router(config: ShardingConfig) -> Result<ShardRouter> {
        ShardRouter::initialize("products", &config, create_sharding_strategy(&config))
    }

    fn hash_config(n: usize) -> ShardingConfig {
        ShardingConfig {
            strategy: ShardingStrategyName::Hash,
            number_of_shards: Some(n),
            shard_identifiers: vec![],
        }
    }

    fn explicit_config(ids: &[&str]) -> ShardingConfig {
        ShardingConfig {
            strategy: ShardingStrategyName::Explicit,
            number_of_shards: None,
            shard_identifiers: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn unsharded_always_routes_to_the_sentinel() {
        let router = router(ShardingConfig::default()).unwrap();
        assert_eq!(router.layout(), &ShardLayout::Unsharded);
        assert_eq!(router.shard_ids(), vec![None]);
        for id in ["a", "b", "zzz"] {
            assert_eq!(router.route(id, None).unwrap(), None);
            assert_eq!(router.route(id, Some("eu")).unwrap(), None);
        }
        assert_eq!(router.route_all(&["x".to_string()]).unwrap(), vec![None]);
    }

    #[test]
    fn hash_routing_is_deterministic_and_in_range() {
        let router = router(hash_config(3)).unwrap();
        assert_eq!(
            router.shard_ids(),
            vec![Some("0".into()), Some("1".into()), Some("2".into())]
        );
        for i in 0..200 {
            let id = format!("doc-{}", i);
            let first = router.route(&id, None).unwrap();
            assert_eq!(router.route(&id, None).unwrap(), first);
            assert!(router.shard_ids().contains(&first));
        }
    }

    #[test]
    fn hash_matches_reference_values() {
        assert_eq!(HashShardingStrategy::hash(""), 0);
        assert_eq!(HashShardingStrategy::hash("a"), 97);
        assert_eq!(HashShardingStrategy::hash("hello"), 99_162_322);
        // Overflows to a negative hash; the slot must still be in range.
        let router = router(hash_config(7)).unwrap();
        let long = "a-very-long-routing-key-that-overflows";
        assert!(HashShardingStrategy::hash(long) != 0);
        assert!(router.route(long, None).unwrap().is_some());
    }

    #[test]
    fn hash_routes_on_routing_key_when_present() {
        let router = router(hash_config(5)).unwrap();
        let by_key = router.route("doc-1", Some("tenant-a")).unwrap();
        assert_eq!(router.route("doc-2", Some("tenant-a")).unwrap(), by_key);
        assert_eq!(
            router.route_all(&["tenant-a".to_string()]).unwrap(),
            vec![by_key]
        );
    }

    #[test]
    fn hash_without_shard_count_fails_at_startup() {
        let err = router(hash_config(0)).unwrap_err();
        assert!(matches!(err, StackshardError::Config(_)));
    }

    #[test]
    fn explicit_routes_by_name_and_rejects_unknown() {
        let router = router(explicit_config(&["eu", "us"])).unwrap();
        assert_eq!(router.route("1", Some("eu")).unwrap(), Some("eu".into()));
        let err = router.route("1", Some("apac")).unwrap_err();
        assert!(matches!(err, StackshardError::UnknownShard { ref shard, .. } if shard == "apac"));
        assert_eq!(router.route_all(&[]).unwrap().len(), 2);
    }

    #[test]
    fn empty_explicit_set_fails_at_startup() {
        let err = router(explicit_config(&[])).unwrap_err();
        assert!(matches!(err, StackshardError::MissingShardIdentifiers { ref index } if index == "products"));
    }

    #[derive(Debug)]
    struct Forgetful;

    impl ShardingStrategy for Forgetful {
        fn initialize(&mut self, _: &mut ShardingStrategyInitializationContext<'_>) -> Result<()> {
            Ok(())
        }
        fn to_shard_identifier(&self, _: &str, _: Option<&str>) -> Result<String> {
            Ok("nowhere".into())
        }
        fn to_shard_identifiers(&self, _: &[String]) -> Result<IndexSet<String>> {
            Ok(IndexSet::new())
        }
    }

    #[test]
    fn strategy_declaring_nothing_fails_at_startup() {
        let err =
            ShardRouter::initialize("products", &ShardingConfig::default(), Box::new(Forgetful))
                .unwrap_err();
        assert!(matches!(err, StackshardError::MissingShardIdentifiers { .. }));
    }
}
