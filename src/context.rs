//! The services a presentment session draws on, assembled once and shared.
use std::fmt;
use std::sync::Arc;

use crate::config::{self, PresentmentConfig};
use crate::definitions::x509::TrustPoint;
use crate::presentation::credential::{DocumentStore, InMemoryDocumentStore};
use crate::presentation::presentment::{DocumentMatcher, MatcherRegistry, PresentmentCoordinator};
use crate::presentation::trust::TrustEvaluator;
use crate::transport::TransportFactory;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] config::Error),
    #[error("no transport factory was provided")]
    MissingTransports,
}

pub struct AppContext {
    config: PresentmentConfig,
    documents: Arc<dyn DocumentStore>,
    trust: TrustEvaluator,
    coordinator: PresentmentCoordinator,
    transports: Arc<dyn TransportFactory>,
}

impl AppContext {
    pub fn builder(config: PresentmentConfig) -> AppContextBuilder {
        AppContextBuilder {
            config,
            documents: None,
            trust_points: Vec::new(),
            matchers: MatcherRegistry::default(),
            transports: None,
        }
    }

    pub fn config(&self) -> &PresentmentConfig {
        &self.config
    }

    pub fn documents(&self) -> &dyn DocumentStore {
        self.documents.as_ref()
    }

    pub fn trust(&self) -> &TrustEvaluator {
        &self.trust
    }

    pub fn coordinator(&self) -> &PresentmentCoordinator {
        &self.coordinator
    }

    pub fn transports(&self) -> &dyn TransportFactory {
        self.transports.as_ref()
    }
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("config", &self.config)
            .field("trust", &self.trust)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

pub struct AppContextBuilder {
    config: PresentmentConfig,
    documents: Option<Arc<dyn DocumentStore>>,
    trust_points: Vec<TrustPoint>,
    matchers: MatcherRegistry,
    transports: Option<Arc<dyn TransportFactory>>,
}

impl AppContextBuilder {
    pub fn documents(mut self, documents: Arc<dyn DocumentStore>) -> Self {
        self.documents = Some(documents);
        self
    }

    /// A trust point in addition to those in the configuration.
    pub fn trust_point(mut self, trust_point: TrustPoint) -> Self {
        self.trust_points.push(trust_point);
        self
    }

    pub fn matcher(mut self, doc_type: impl Into<String>, matcher: Arc<dyn DocumentMatcher>) -> Self {
        self.matchers.register(doc_type, matcher);
        self
    }

    pub fn transports(mut self, transports: Arc<dyn TransportFactory>) -> Self {
        self.transports = Some(transports);
        self
    }

    pub fn build(self) -> Result<Arc<AppContext>, Error> {
        let transports = self.transports.ok_or(Error::MissingTransports)?;
        let mut trust_manager = self.config.trust_manager()?;
        for trust_point in self.trust_points {
            let name = trust_point.display_name.clone();
            trust_manager
                .add_trust_point(trust_point)
                .map_err(|e| config::Error::TrustPoint {
                    name,
                    reason: e.to_string(),
                })?;
        }
        let documents = self
            .documents
            .unwrap_or_else(|| Arc::new(InMemoryDocumentStore::default()));
        Ok(Arc::new(AppContext {
            config: self.config,
            documents,
            trust: TrustEvaluator::new(Arc::new(trust_manager)),
            coordinator: PresentmentCoordinator::new(self.matchers),
            transports,
        }))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::definitions::x509::test::{issue_chain, TestCurve};
    use crate::definitions::x509::CertificateWithDer;
    use crate::transport::loopback::LoopbackMedium;

    #[test]
    fn builder_requires_transports() {
        assert!(matches!(
            AppContext::builder(PresentmentConfig::default()).build(),
            Err(Error::MissingTransports)
        ));
    }

    #[test]
    fn builder_merges_trust_points() {
        let chain = issue_chain(TestCurve::P256);
        let context = AppContext::builder(PresentmentConfig::default())
            .transports(Arc::new(LoopbackMedium::new()))
            .trust_point(TrustPoint::new(
                CertificateWithDer::from_cert(chain.root.clone()).unwrap(),
                "Reader Root",
            ))
            .build()
            .unwrap();
        assert_eq!(context.trust().trust_manager().len(), 1);
        assert!(context.documents().documents().is_empty());
    }
}
