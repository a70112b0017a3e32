//! Serves relation requests from the certificate bundle.

use tracing::debug;

use magma_relation::{
    CertificateKind, CertificateRequest, Error as RelationError, Field, Material, MaterialSource,
};

use crate::bundle::CertificateBundle;
use crate::config::CertifierConfig;

/// Answers [`CertificateRequest`]s with bundle material.
///
/// Fixed kinds get the bundle's current material; `cert-csr` requests are
/// signed with the certifier CA.
#[derive(Debug, Clone, Copy)]
pub struct BundleSource<'a> {
    bundle: &'a CertificateBundle,
    config: &'a CertifierConfig,
}

impl<'a> BundleSource<'a> {
    /// Creates a source over `bundle`.
    pub const fn new(bundle: &'a CertificateBundle, config: &'a CertifierConfig) -> Self {
        Self { bundle, config }
    }
}

impl MaterialSource for BundleSource<'_> {
    fn material(&mut self, request: &CertificateRequest) -> magma_relation::Result<Material> {
        let kind = CertificateKind::from_relation_name(&request.relation_name).ok_or_else(|| {
            RelationError::Material(format!("no certificate kind for relation '{}'", request.relation_name))
        })?;
        debug!(kind = %kind, relation_id = %request.relation_id, "Serving certificate request");

        if let Some(material) = self.bundle.material(kind) {
            return Ok(material);
        }

        let csr = request.request.certificate_signing_request().ok_or(
            RelationError::IncompleteMaterial {
                relation_id: request.relation_id,
                missing: vec![Field::CertificateSigningRequest],
            },
        )?;
        let certificate = self.bundle.sign_csr(csr, self.config)?;
        Ok(Material::new().with(Field::Certificate, certificate.pem()))
    }
}
