// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Memoizing metadata resolver.
//!
//! Wraps a [`TypeMetadataProvider`] and caches every answer for the lifetime of
//! one deployment or validation run. Processor schemas are cached together with
//! their precomputed [`AliasTable`].

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::live_system::LiveSystemError;
use crate::domain::metadata::{Bundle, ServiceImplementation, TypeMetadataProvider, TypeSchema};
use crate::domain::properties::AliasTable;

/// A type schema and the alias table derived from it.
#[derive(Debug)]
pub struct ResolvedType {
    pub schema: TypeSchema,
    pub aliases: AliasTable,
}

impl ResolvedType {
    fn new(schema: TypeSchema) -> Self {
        let aliases = AliasTable::build(&schema);
        Self { schema, aliases }
    }
}

#[derive(Default)]
struct Cache {
    processors: HashMap<String, Arc<ResolvedType>>,
    services: HashMap<(String, Bundle), Arc<ResolvedType>>,
    implementations: HashMap<(String, Option<Bundle>), Vec<ServiceImplementation>>,
}

pub struct CachingMetadataResolver {
    provider: Arc<dyn TypeMetadataProvider>,
    cache: Mutex<Cache>,
}

impl CachingMetadataResolver {
    pub fn new(provider: Arc<dyn TypeMetadataProvider>) -> Self {
        Self {
            provider,
            cache: Mutex::new(Cache::default()),
        }
    }

    pub async fn processor(&self, processor_type: &str) -> Result<Arc<ResolvedType>, LiveSystemError> {
        let cached = self.cache.lock().processors.get(processor_type).cloned();
        if let Some(hit) = cached {
            return Ok(hit);
        }
        tracing::debug!("Fetching processor metadata for {}", processor_type);
        let resolved = Arc::new(ResolvedType::new(
            self.provider.processor_schema(processor_type).await?,
        ));
        self.cache
            .lock()
            .processors
            .insert(processor_type.to_string(), resolved.clone());
        Ok(resolved)
    }

    pub async fn service(
        &self,
        service_type: &str,
        bundle: &Bundle,
    ) -> Result<Arc<ResolvedType>, LiveSystemError> {
        let key = (service_type.to_string(), bundle.clone());
        let cached = self.cache.lock().services.get(&key).cloned();
        if let Some(hit) = cached {
            return Ok(hit);
        }
        tracing::debug!("Fetching controller service metadata for {} ({})", service_type, bundle);
        let resolved = Arc::new(ResolvedType::new(
            self.provider.service_schema(service_type, bundle).await?,
        ));
        self.cache.lock().services.insert(key, resolved.clone());
        Ok(resolved)
    }

    pub async fn implementations(
        &self,
        api_type: &str,
        api_bundle: Option<&Bundle>,
    ) -> Result<Vec<ServiceImplementation>, LiveSystemError> {
        let key = (api_type.to_string(), api_bundle.cloned());
        let cached = self.cache.lock().implementations.get(&key).cloned();
        if let Some(hit) = cached {
            return Ok(hit);
        }
        let listed = self.provider.service_implementations(api_type, api_bundle).await?;
        self.cache.lock().implementations.insert(key, listed.clone());
        Ok(listed)
    }

    /// Number of distinct processor types fetched so far.
    pub fn cached_processor_types(&self) -> usize {
        self.cache.lock().processors.len()
    }
}
