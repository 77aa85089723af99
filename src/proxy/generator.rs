use super::{
    Error, InterceptorPipeline, PlanKey, ProxyContract, ProxyFactory, ProxyType, RuntimeLibrary,
    Settings,
};
use crate::cache::ProxyCache;
use crate::il::{Backend, Interpreter};
use crate::util::ArcId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Builds proxy types on demand and reuses them for identical requests
///
/// This is what a container talks to: it asks for a proxy type for a contract and a pipeline,
/// and gets back the same `Arc<ProxyType>` every time it asks again with the same pair. The
/// generator can be shared freely between threads.
pub struct ProxyGenerator {
    settings: Settings,
    runtime: RuntimeLibrary,
    backend: Arc<dyn Backend>,
    cache: ProxyCache<PlanKey, Arc<ProxyType>, Error>,

    /// Used to give generated types unique names
    generated: AtomicUsize,
}

impl ProxyGenerator {
    /// Generator running generated code on the [`Interpreter`]
    pub fn new(settings: Settings) -> Result<ProxyGenerator, Error> {
        ProxyGenerator::with_backend(settings, Arc::new(Interpreter))
    }

    pub fn with_backend(
        settings: Settings,
        backend: Arc<dyn Backend>,
    ) -> Result<ProxyGenerator, Error> {
        settings.validate()?;
        let cache = ProxyCache::with_shard_amount(settings.cache_shard_amount);
        Ok(ProxyGenerator {
            runtime: RuntimeLibrary::new()?,
            settings,
            backend,
            cache,
            generated: AtomicUsize::new(0),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Runtime types (including the `System.Object` user types derive from)
    pub fn runtime(&self) -> &RuntimeLibrary {
        &self.runtime
    }

    pub fn cache(&self) -> &ProxyCache<PlanKey, Arc<ProxyType>, Error> {
        &self.cache
    }

    /// Get the proxy type for a contract and pipeline, building it on first use
    ///
    /// Concurrent requests for the same pair wait for a single build. Failed builds are not
    /// remembered.
    pub fn get_or_build(
        &self,
        contract: &ProxyContract,
        pipeline: &Arc<InterceptorPipeline>,
    ) -> Result<Arc<ProxyType>, Error> {
        let key = PlanKey {
            contract: contract.clone(),
            pipeline: ArcId(pipeline.clone()),
        };
        self.cache
            .get_or_build(key, || self.build_uncached(contract, pipeline).map(Arc::new))
    }

    /// Build a fresh proxy type, bypassing the cache
    pub fn build_uncached(
        &self,
        contract: &ProxyContract,
        pipeline: &Arc<InterceptorPipeline>,
    ) -> Result<ProxyType, Error> {
        let name = self.next_name(contract);
        ProxyFactory::new(&self.settings, &self.runtime, &*self.backend)
            .build_proxy(&name, contract, pipeline)
    }

    /// `{namespace}.{short target name}{suffix}_{n}`
    fn next_name(&self, contract: &ProxyContract) -> String {
        let target_name = &contract.target().name;
        let short_name = target_name.rsplit('.').next().unwrap_or(target_name);
        format!(
            "{}.{}{}_{}",
            self.settings.proxy_namespace,
            short_name,
            self.settings.type_suffix,
            self.generated.fetch_add(1, Ordering::Relaxed)
        )
    }
}
