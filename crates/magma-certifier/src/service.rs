//! The certifier unit: one provider per certificate kind over a shared bundle.

use std::collections::BTreeMap;

use tracing::{debug, info};

use magma_relation::{
    CertificateKind, Delivery, Outcome, Provider, RelationBroker, RelationState, Side,
};

use crate::bundle::CertificateBundle;
use crate::config::CertifierConfig;
use crate::error::{CertifierError, Result};
use crate::source::BundleSource;

/// Serves every certificate relation the certifier provides.
#[derive(Debug)]
pub struct CertifierService {
    config: CertifierConfig,
    bundle: CertificateBundle,
    providers: BTreeMap<CertificateKind, Provider>,
}

impl CertifierService {
    /// Creates the service. Provider state is restored from
    /// `config.state_dir` when it is set.
    pub fn new(config: CertifierConfig, bundle: CertificateBundle) -> Self {
        let providers = CertificateKind::ALL
            .into_iter()
            .map(|kind| {
                let provider = match &config.state_dir {
                    Some(dir) => Provider::with_state_dir(kind.protocol(), dir),
                    None => Provider::new(kind.protocol()),
                };
                (kind, provider)
            })
            .collect();
        info!(domain = %config.domain, "Certifier service ready");
        Self {
            config,
            bundle,
            providers,
        }
    }

    /// Loads or generates the bundle for `config`, then creates the service.
    pub fn start(config: CertifierConfig) -> Result<Self> {
        config.validate()?;
        let bundle = CertificateBundle::load_or_generate(&config)?;
        Ok(Self::new(config, bundle))
    }

    /// The bundle being served.
    pub const fn bundle(&self) -> &CertificateBundle {
        &self.bundle
    }

    /// The active configuration.
    pub const fn config(&self) -> &CertifierConfig {
        &self.config
    }

    /// Provider state of a relation.
    pub fn state(&self, kind: CertificateKind, relation_id: magma_relation::RelationId) -> Option<RelationState> {
        self.providers.get(&kind).and_then(|provider| provider.state(relation_id))
    }

    /// Handles one delivery addressed to the certifier.
    ///
    /// Deliveries for the requirer side or for relations the certifier does
    /// not provide are ignored.
    pub fn handle(&mut self, broker: &mut RelationBroker, delivery: &Delivery) -> magma_relation::Result<Outcome> {
        if delivery.side != Side::Provider {
            return Ok(Outcome::Handled);
        }
        let Some(kind) = CertificateKind::from_relation_name(&delivery.relation_name) else {
            debug!(relation = %delivery.relation_name, "Ignoring relation the certifier does not provide");
            return Ok(Outcome::Handled);
        };
        let Some(provider) = self.providers.get_mut(&kind) else {
            return Ok(Outcome::Handled);
        };
        let mut source = BundleSource::new(&self.bundle, &self.config);
        provider.serve(broker, delivery, &mut source)
    }

    /// Delivers pending events until the broker is idle, returning how many
    /// deliveries were processed.
    ///
    /// Only provider-side deliveries are acted on, so this is meant for a
    /// broker that models the certifier's own view.
    pub fn run(&mut self, broker: &mut RelationBroker) -> Result<usize> {
        Ok(broker.run_until_idle(|broker, delivery| self.handle(broker, delivery))?)
    }

    /// Renews `kind`, saves the bundle and republishes to every open
    /// relation of that kind. Returns how many relations were updated.
    pub fn renew(&mut self, broker: &mut RelationBroker, kind: CertificateKind) -> Result<usize> {
        self.bundle.renew(kind, &self.config)?;
        self.bundle.save(&self.config.certs_dir)?;

        let provider = self
            .providers
            .get_mut(&kind)
            .ok_or(CertifierError::NotRenewable(kind))?;
        let mut source = BundleSource::new(&self.bundle, &self.config);
        Ok(provider.republish(broker, &mut source)?)
    }
}
