//! Factory registry keyed by source kind

use std::collections::HashMap;
use std::sync::Arc;

use super::{ConnectionConfig, Connector, MemoryConnector, MemorySource, PostgresConnector, SourceKind};
use crate::etl::error::{EtlError, EtlResult};

pub type ConnectorFactory = Arc<dyn Fn(&ConnectionConfig) -> EtlResult<Box<dyn Connector>> + Send + Sync>;

/// Builds a fresh, unconnected connector for each workflow run
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    factories: HashMap<SourceKind, ConnectorFactory>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in SQL connectors
    pub fn with_defaults(stream_channel_capacity: usize) -> Self {
        let mut registry = Self::new();
        registry.register(SourceKind::Postgres, move |config| {
            let connector: Box<dyn Connector> = Box::new(
                PostgresConnector::new(config.clone()).with_stream_capacity(stream_channel_capacity),
            );
            Ok(connector)
        });
        registry
    }

    pub fn register<F>(&mut self, kind: SourceKind, factory: F)
    where
        F: Fn(&ConnectionConfig) -> EtlResult<Box<dyn Connector>> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Arc::new(factory));
    }

    /// Serve every `memory` connection from one shared source
    pub fn register_memory(&mut self, source: MemorySource) {
        self.register(SourceKind::Memory, move |_| {
            let connector: Box<dyn Connector> = Box::new(MemoryConnector::new(source.clone()));
            Ok(connector)
        });
    }

    pub fn supports(&self, kind: SourceKind) -> bool {
        self.factories.contains_key(&kind)
    }

    pub fn create(&self, config: &ConnectionConfig) -> EtlResult<Box<dyn Connector>> {
        let factory = self.factories.get(&config.kind).ok_or_else(|| {
            EtlError::validation(format!("no connector registered for source kind {}", config.kind.as_str()))
        })?;
        factory(config)
    }
}
