//! The certificate bundle the certifier owns and distributes.
//!
//! A bundle holds two CAs and the material issued from them:
//!
//! | File | Contents | Issuer |
//! |------|----------|--------|
//! | `rootCA.pem`, `rootCA.key` | root CA | self |
//! | `certifier.pem`, `certifier.key` | certifier CA | self |
//! | `controller.crt`, `controller.key` | `*.<domain>` wildcard | root CA |
//! | `admin_operator.pem`, `admin_operator.key.pem`, `admin_operator.pfx` | operator client certificate | certifier CA |
//! | `fluentd.pem`, `fluentd.key` | `fluentd.<domain>` | certifier CA |
//! | `bootstrapper.key` | bootstrapper key | - |

use std::fs;
use std::path::Path;

use tracing::{debug, info};

use magma_pki::{
    Certificate, CertificateAuthority, CertificateSigningRequest, CsrRequest, Pkcs12Package,
    PrivateKey, generate_ca, generate_pfx_package, generate_private_key, verify_key_pair,
    verify_signature,
};
use magma_relation::{CertificateKind, Field, Material};

use crate::config::CertifierConfig;
use crate::error::{CertifierError, Result};

/// Root CA certificate file.
pub const ROOT_CA_CERT: &str = "rootCA.pem";
/// Root CA key file.
pub const ROOT_CA_KEY: &str = "rootCA.key";
/// Certifier CA certificate file.
pub const CERTIFIER_CERT: &str = "certifier.pem";
/// Certifier CA key file.
pub const CERTIFIER_KEY: &str = "certifier.key";
/// Controller certificate file.
pub const CONTROLLER_CERT: &str = "controller.crt";
/// Controller key file.
pub const CONTROLLER_KEY: &str = "controller.key";
/// Admin-operator certificate file.
pub const ADMIN_OPERATOR_CERT: &str = "admin_operator.pem";
/// Admin-operator key file.
pub const ADMIN_OPERATOR_KEY: &str = "admin_operator.key.pem";
/// Admin-operator PFX file.
pub const ADMIN_OPERATOR_PFX: &str = "admin_operator.pfx";
/// Fluentd certificate file.
pub const FLUENTD_CERT: &str = "fluentd.pem";
/// Fluentd key file.
pub const FLUENTD_KEY: &str = "fluentd.key";
/// Bootstrapper key file.
pub const BOOTSTRAPPER_KEY: &str = "bootstrapper.key";

/// Every file a complete bundle consists of, in load order.
pub const BUNDLE_FILES: [&str; 12] = [
    ROOT_CA_CERT,
    ROOT_CA_KEY,
    CERTIFIER_CERT,
    CERTIFIER_KEY,
    CONTROLLER_CERT,
    CONTROLLER_KEY,
    ADMIN_OPERATOR_CERT,
    ADMIN_OPERATOR_KEY,
    ADMIN_OPERATOR_PFX,
    FLUENTD_CERT,
    FLUENTD_KEY,
    BOOTSTRAPPER_KEY,
];

/// Common name of the admin-operator client certificate.
pub const ADMIN_OPERATOR_SUBJECT: &str = "admin_operator";

/// A leaf certificate and its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    /// The signed certificate.
    pub certificate: Certificate,
    /// Its private key, unencrypted.
    pub key: PrivateKey,
}

impl From<(Certificate, PrivateKey)> for IssuedCertificate {
    fn from((certificate, key): (Certificate, PrivateKey)) -> Self {
        Self { certificate, key }
    }
}

/// The full set of certifier material.
#[derive(Debug)]
pub struct CertificateBundle {
    root_ca: CertificateAuthority,
    certifier_ca: CertificateAuthority,
    controller: IssuedCertificate,
    admin_operator: IssuedCertificate,
    admin_operator_pfx: Pkcs12Package,
    fluentd: IssuedCertificate,
    bootstrapper_key: PrivateKey,
}

impl CertificateBundle {
    /// Generates every key and certificate from scratch.
    pub fn generate(config: &CertifierConfig) -> Result<Self> {
        config.validate()?;
        info!(domain = %config.domain, "Generating certificate bundle");

        let key_params = config.key_params();
        let ca_options = config.ca_options();
        let root_ca = CertificateAuthority::generate(&config.root_ca_subject(), &key_params, &ca_options)?;
        let certifier_ca =
            CertificateAuthority::generate(&config.certifier_subject(), &key_params, &ca_options)?;

        let controller = issue_controller(&root_ca, config)?;
        let admin_operator = issue_admin_operator(&certifier_ca, config)?;
        let admin_operator_pfx = package_admin_operator(&admin_operator, config)?;
        let fluentd = issue_fluentd(&certifier_ca, config)?;
        let bootstrapper_key = generate_private_key(&key_params)?;

        Ok(Self {
            root_ca,
            certifier_ca,
            controller,
            admin_operator,
            admin_operator_pfx,
            fluentd,
            bootstrapper_key,
        })
    }

    /// Returns true if any bundle file is present in `dir`.
    pub fn exists(dir: &Path) -> bool {
        BUNDLE_FILES.iter().any(|file| dir.join(file).exists())
    }

    /// Loads a complete bundle from `dir`.
    ///
    /// Key/certificate pairs and issuer signatures are checked; expiry is
    /// not, so an expired bundle can still be loaded and renewed.
    pub fn load(dir: &Path) -> Result<Self> {
        if let Some(file) = BUNDLE_FILES.into_iter().find(|file| !dir.join(file).is_file()) {
            return Err(CertifierError::IncompleteBundle {
                dir: dir.to_path_buf(),
                file,
            });
        }

        let root_ca = load_ca(dir, ROOT_CA_CERT, ROOT_CA_KEY)?;
        let certifier_ca = load_ca(dir, CERTIFIER_CERT, CERTIFIER_KEY)?;
        let controller = load_leaf(dir, CONTROLLER_CERT, CONTROLLER_KEY, &root_ca)?;
        let admin_operator = load_leaf(dir, ADMIN_OPERATOR_CERT, ADMIN_OPERATOR_KEY, &certifier_ca)?;
        let fluentd = load_leaf(dir, FLUENTD_CERT, FLUENTD_KEY, &certifier_ca)?;
        let admin_operator_pfx = Pkcs12Package::from_der(read_bytes(dir, ADMIN_OPERATOR_PFX)?);
        let bootstrapper_key = PrivateKey::from_pem(read_text(dir, BOOTSTRAPPER_KEY)?)?;

        info!(dir = %dir.display(), "Loaded certificate bundle");
        Ok(Self {
            root_ca,
            certifier_ca,
            controller,
            admin_operator,
            admin_operator_pfx,
            fluentd,
            bootstrapper_key,
        })
    }

    /// Loads the bundle from the configured directory, generating and saving
    /// a new one if the directory holds no bundle files at all.
    pub fn load_or_generate(config: &CertifierConfig) -> Result<Self> {
        let dir = config.certs_dir.as_path();
        if Self::exists(dir) {
            return Self::load(dir);
        }
        let bundle = Self::generate(config)?;
        bundle.save(dir)?;
        Ok(bundle)
    }

    /// Writes every bundle file into `dir`. Key files are owner-only.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).map_err(|e| CertifierError::io(dir, e))?;

        write_file(dir, ROOT_CA_CERT, self.root_ca.certificate().pem().as_bytes(), false)?;
        write_file(dir, ROOT_CA_KEY, self.root_ca.key().as_bytes(), true)?;
        write_file(dir, CERTIFIER_CERT, self.certifier_ca.certificate().pem().as_bytes(), false)?;
        write_file(dir, CERTIFIER_KEY, self.certifier_ca.key().as_bytes(), true)?;
        save_leaf(dir, &self.controller, CONTROLLER_CERT, CONTROLLER_KEY)?;
        save_leaf(dir, &self.admin_operator, ADMIN_OPERATOR_CERT, ADMIN_OPERATOR_KEY)?;
        write_file(dir, ADMIN_OPERATOR_PFX, self.admin_operator_pfx.as_bytes(), true)?;
        save_leaf(dir, &self.fluentd, FLUENTD_CERT, FLUENTD_KEY)?;
        write_file(dir, BOOTSTRAPPER_KEY, self.bootstrapper_key.as_bytes(), true)?;

        info!(dir = %dir.display(), files = BUNDLE_FILES.len(), "Saved certificate bundle");
        Ok(())
    }

    /// Regenerates the material behind `kind`.
    ///
    /// The root CA is re-certified over its existing key, so certificates it
    /// already issued stay valid. Leaf kinds get a fresh key and certificate;
    /// renewing the admin-operator also repackages its PFX.
    pub fn renew(&mut self, kind: CertificateKind, config: &CertifierConfig) -> Result<()> {
        match kind {
            CertificateKind::RootCa => {
                let key = self.root_ca.key().clone();
                let certificate = generate_ca(&key, None, &config.root_ca_subject(), &config.ca_options())?;
                self.root_ca = CertificateAuthority::from_existing(certificate, key, None)?;
            }
            CertificateKind::Controller => {
                self.controller = issue_controller(&self.root_ca, config)?;
            }
            CertificateKind::AdminOperator => {
                let admin_operator = issue_admin_operator(&self.certifier_ca, config)?;
                self.admin_operator_pfx = package_admin_operator(&admin_operator, config)?;
                self.admin_operator = admin_operator;
            }
            CertificateKind::Fluentd => {
                self.fluentd = issue_fluentd(&self.certifier_ca, config)?;
            }
            CertificateKind::Bootstrapper => {
                self.bootstrapper_key = generate_private_key(&config.key_params())?;
            }
            CertificateKind::SignedCsr => return Err(CertifierError::NotRenewable(kind)),
        }
        info!(kind = %kind, "Renewed certificate material");
        Ok(())
    }

    /// The material published on relations of `kind`.
    ///
    /// Returns `None` for [`CertificateKind::SignedCsr`], whose material is
    /// produced per request by [`Self::sign_csr`].
    pub fn material(&self, kind: CertificateKind) -> Option<Material> {
        let material = match kind {
            CertificateKind::RootCa => {
                Material::new().with(Field::Certificate, self.root_ca.certificate().pem())
            }
            CertificateKind::Controller => {
                Material::new().with(Field::Certificate, self.controller.certificate.pem())
            }
            CertificateKind::AdminOperator => leaf_material(&self.admin_operator),
            CertificateKind::Fluentd => leaf_material(&self.fluentd),
            CertificateKind::Bootstrapper => {
                Material::new().with(Field::PrivateKey, self.bootstrapper_key.pem())
            }
            CertificateKind::SignedCsr => return None,
        };
        Some(material)
    }

    /// Signs a requirer's PEM CSR with the certifier CA.
    pub fn sign_csr(&self, csr_pem: &str, config: &CertifierConfig) -> Result<Certificate> {
        let csr = CertificateSigningRequest::from_pem(csr_pem)?;
        let certificate = self.certifier_ca.sign(&csr, &config.leaf_options())?;
        debug!(subject = %certificate.subject(), serial = %certificate.serial(), "Signed relation CSR");
        Ok(certificate)
    }

    /// The root CA.
    pub const fn root_ca(&self) -> &CertificateAuthority {
        &self.root_ca
    }

    /// The certifier CA.
    pub const fn certifier_ca(&self) -> &CertificateAuthority {
        &self.certifier_ca
    }

    /// The controller wildcard certificate.
    pub const fn controller(&self) -> &IssuedCertificate {
        &self.controller
    }

    /// The admin-operator client certificate.
    pub const fn admin_operator(&self) -> &IssuedCertificate {
        &self.admin_operator
    }

    /// The admin-operator PFX.
    pub const fn admin_operator_pfx(&self) -> &Pkcs12Package {
        &self.admin_operator_pfx
    }

    /// The fluentd certificate.
    pub const fn fluentd(&self) -> &IssuedCertificate {
        &self.fluentd
    }

    /// The bootstrapper key.
    pub const fn bootstrapper_key(&self) -> &PrivateKey {
        &self.bootstrapper_key
    }

    /// Every certificate in the bundle with the file it is stored in.
    pub fn certificates(&self) -> [(&'static str, &Certificate); 5] {
        [
            (ROOT_CA_CERT, self.root_ca.certificate()),
            (CERTIFIER_CERT, self.certifier_ca.certificate()),
            (CONTROLLER_CERT, &self.controller.certificate),
            (ADMIN_OPERATOR_CERT, &self.admin_operator.certificate),
            (FLUENTD_CERT, &self.fluentd.certificate),
        ]
    }
}

fn leaf_material(leaf: &IssuedCertificate) -> Material {
    Material::new()
        .with(Field::Certificate, leaf.certificate.pem())
        .with(Field::PrivateKey, leaf.key.pem())
}

fn issue_controller(root_ca: &CertificateAuthority, config: &CertifierConfig) -> Result<IssuedCertificate> {
    let subject = config.controller_subject();
    let request = CsrRequest::new(&subject).alt_name(&subject);
    let options = config.leaf_options().alt_names([subject]);
    Ok(root_ca.issue(&request, &config.key_params(), &options)?.into())
}

fn issue_admin_operator(
    certifier_ca: &CertificateAuthority,
    config: &CertifierConfig,
) -> Result<IssuedCertificate> {
    let request = CsrRequest::new(ADMIN_OPERATOR_SUBJECT);
    Ok(certifier_ca
        .issue(&request, &config.key_params(), &config.leaf_options())?
        .into())
}

fn issue_fluentd(certifier_ca: &CertificateAuthority, config: &CertifierConfig) -> Result<IssuedCertificate> {
    let subject = config.fluentd_subject();
    let request = CsrRequest::new(&subject).alt_name(&subject);
    let options = config.leaf_options().alt_names([subject]);
    Ok(certifier_ca
        .issue(&request, &config.key_params(), &options)?
        .into())
}

fn package_admin_operator(leaf: &IssuedCertificate, config: &CertifierConfig) -> Result<Pkcs12Package> {
    Ok(generate_pfx_package(&leaf.certificate, &leaf.key, None, &config.passphrase)?)
}

fn save_leaf(dir: &Path, leaf: &IssuedCertificate, cert: &str, key: &str) -> Result<()> {
    write_file(dir, cert, leaf.certificate.pem().as_bytes(), false)?;
    write_file(dir, key, leaf.key.as_bytes(), true)
}

fn load_ca(dir: &Path, cert: &str, key: &str) -> Result<CertificateAuthority> {
    let certificate = Certificate::from_pem(&read_text(dir, cert)?)?;
    let key = PrivateKey::from_pem(read_text(dir, key)?)?;
    Ok(CertificateAuthority::from_existing(certificate, key, None)?)
}

fn load_leaf(
    dir: &Path,
    cert: &str,
    key: &str,
    issuer: &CertificateAuthority,
) -> Result<IssuedCertificate> {
    let certificate = Certificate::from_pem(&read_text(dir, cert)?)?;
    let key = PrivateKey::from_pem(read_text(dir, key)?)?;
    verify_key_pair(&certificate, &key, None)?;
    verify_signature(&certificate, issuer.certificate())?;
    Ok(IssuedCertificate { certificate, key })
}

fn read_text(dir: &Path, file: &str) -> Result<String> {
    let path = dir.join(file);
    fs::read_to_string(&path).map_err(|e| CertifierError::io(path, e))
}

fn read_bytes(dir: &Path, file: &str) -> Result<Vec<u8>> {
    let path = dir.join(file);
    fs::read(&path).map_err(|e| CertifierError::io(path, e))
}

fn write_file(dir: &Path, file: &str, contents: &[u8], secret: bool) -> Result<()> {
    write_path(&dir.join(file), contents, secret)
}

/// Writes `contents` to `path`; `secret` files are made owner-only.
pub(crate) fn write_path(path: &Path, contents: &[u8], secret: bool) -> Result<()> {
    fs::write(path, contents).map_err(|e| CertifierError::io(path, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if secret {
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))
                .map_err(|e| CertifierError::io(path, e))?;
        }
    }
    #[cfg(not(unix))]
    let _ = secret;
    debug!(path = %path.display(), bytes = contents.len(), "Wrote file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{BUNDLE, config};
    use magma_pki::{open_pfx_package, validate_certificate};

    #[test]
    fn generated_bundle_chains_to_its_cas() {
        let bundle = &*BUNDLE;
        let root = bundle.root_ca().certificate();
        let certifier = bundle.certifier_ca().certificate();

        assert_eq!(root.common_name(), Some("rootca.magma.test"));
        assert_eq!(certifier.common_name(), Some("certifier.magma.test"));
        assert!(root.is_ca() && certifier.is_ca());

        validate_certificate(&bundle.controller().certificate, root).unwrap();
        validate_certificate(&bundle.admin_operator().certificate, certifier).unwrap();
        validate_certificate(&bundle.fluentd().certificate, certifier).unwrap();

        assert_eq!(bundle.controller().certificate.common_name(), Some("*.magma.test"));
        assert_eq!(bundle.fluentd().certificate.common_name(), Some("fluentd.magma.test"));
        assert_eq!(
            bundle.admin_operator().certificate.common_name(),
            Some(ADMIN_OPERATOR_SUBJECT)
        );
    }

    #[test]
    fn admin_operator_pfx_opens_with_passphrase() {
        let bundle = &*BUNDLE;
        let contents = open_pfx_package(bundle.admin_operator_pfx(), &config().passphrase).unwrap();

        assert_eq!(contents.certificate, bundle.admin_operator().certificate);
        assert_eq!(contents.friendly_name, bundle.admin_operator().certificate.subject());
        assert_eq!(contents.private_key().unwrap(), bundle.admin_operator().key);
    }

    #[test]
    fn material_matches_each_kind_protocol() {
        let bundle = &*BUNDLE;
        for kind in CertificateKind::ALL {
            match bundle.material(kind) {
                Some(material) => {
                    assert!(kind.protocol().missing_provided(&material).is_empty(), "{kind}");
                }
                None => assert_eq!(kind, CertificateKind::SignedCsr),
            }
        }
        let root = bundle.material(CertificateKind::RootCa).unwrap();
        assert_eq!(root.certificate(), Some(bundle.root_ca().certificate().pem()));
        assert!(root.private_key().is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = &*BUNDLE;
        bundle.save(dir.path()).unwrap();

        for file in BUNDLE_FILES {
            assert!(dir.path().join(file).is_file(), "{file}");
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dir.path().join(ROOT_CA_KEY)).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let loaded = CertificateBundle::load(dir.path()).unwrap();
        assert_eq!(loaded.root_ca().certificate(), bundle.root_ca().certificate());
        assert_eq!(loaded.controller(), bundle.controller());
        assert_eq!(loaded.bootstrapper_key(), bundle.bootstrapper_key());
        assert_eq!(loaded.admin_operator_pfx(), bundle.admin_operator_pfx());
    }

    #[test]
    fn partial_bundle_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        BUNDLE.save(dir.path()).unwrap();
        fs::remove_file(dir.path().join(FLUENTD_KEY)).unwrap();

        assert!(CertificateBundle::exists(dir.path()));
        let err = CertificateBundle::load(dir.path()).unwrap_err();
        assert!(matches!(err, CertifierError::IncompleteBundle { file: FLUENTD_KEY, .. }));
    }

    #[test]
    fn swapped_key_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        BUNDLE.save(dir.path()).unwrap();
        fs::copy(dir.path().join(FLUENTD_KEY), dir.path().join(CONTROLLER_KEY)).unwrap();

        let err = CertificateBundle::load(dir.path()).unwrap_err();
        assert!(matches!(err, CertifierError::Pki(_)));
    }

    #[test]
    fn renewal_replaces_leaf_and_keeps_chain() {
        let saved = saved_copy();
        let config = config();
        let mut bundle = CertificateBundle::load(saved.path()).unwrap();
        let before = bundle.fluentd().clone();

        bundle.renew(CertificateKind::Fluentd, &config).unwrap();
        assert_ne!(bundle.fluentd().certificate.serial(), before.certificate.serial());
        assert_ne!(bundle.fluentd().key, before.key);
        validate_certificate(&bundle.fluentd().certificate, bundle.certifier_ca().certificate()).unwrap();
    }

    #[test]
    fn root_renewal_keeps_controller_valid() {
        let saved = saved_copy();
        let config = config();
        let mut bundle = CertificateBundle::load(saved.path()).unwrap();
        let old_root = bundle.root_ca().certificate().clone();

        bundle.renew(CertificateKind::RootCa, &config).unwrap();
        assert_ne!(bundle.root_ca().certificate().serial(), old_root.serial());
        assert_eq!(bundle.root_ca().key(), BUNDLE.root_ca().key());
        validate_certificate(&bundle.controller().certificate, bundle.root_ca().certificate()).unwrap();
    }

    #[test]
    fn signed_csr_kind_is_not_renewable() {
        let saved = saved_copy();
        let mut bundle = CertificateBundle::load(saved.path()).unwrap();
        let err = bundle.renew(CertificateKind::SignedCsr, &config()).unwrap_err();
        assert!(matches!(err, CertifierError::NotRenewable(CertificateKind::SignedCsr)));
    }

    #[test]
    fn sign_csr_uses_certifier_ca() {
        let key = BUNDLE.bootstrapper_key();
        let csr = magma_pki::generate_csr(key, None, &CsrRequest::new("gateway.magma.test")).unwrap();

        let signed = BUNDLE.sign_csr(csr.pem(), &config()).unwrap();
        assert_eq!(signed.common_name(), Some("gateway.magma.test"));
        validate_certificate(&signed, BUNDLE.certifier_ca().certificate()).unwrap();

        assert!(matches!(
            BUNDLE.sign_csr("not a csr", &config()),
            Err(CertifierError::Pki(_))
        ));
    }

    fn saved_copy() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        BUNDLE.save(dir.path()).unwrap();
        dir
    }
}
