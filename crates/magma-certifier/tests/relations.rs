//! The certifier serving real certificates to requiring units.

use std::path::Path;

use once_cell::sync::Lazy;

use magma_certifier::sinks::workload_sink;
use magma_certifier::{CertificateBundle, CertifierConfig, CertifierService};
use magma_pki::{
    Certificate, CsrRequest, KeyParams, generate_csr, generate_private_key, open_pfx_package,
    validate_certificate,
};
use magma_relation::{
    CertificateKind, DirWorkload, Field, Material, MemoryWorkload, Notification, Outcome,
    RelationBroker, RelationId, Requirer, Side,
};

const CERTS: &str = "/var/opt/magma/certs";

fn config(certs_dir: &Path) -> CertifierConfig {
    CertifierConfig::new("orc8r.test")
        .with_passphrase("operator-pass")
        .with_certs_dir(certs_dir)
}

static BUNDLE_DIR: Lazy<tempfile::TempDir> = Lazy::new(|| {
    let dir = tempfile::tempdir().unwrap();
    CertificateBundle::generate(&config(dir.path()))
        .unwrap()
        .save(dir.path())
        .unwrap();
    dir
});

/// A service over a private copy of the shared bundle.
fn service() -> (CertifierService, tempfile::TempDir) {
    let certs = tempfile::tempdir().unwrap();
    for entry in std::fs::read_dir(BUNDLE_DIR.path()).unwrap() {
        let entry = entry.unwrap();
        std::fs::copy(entry.path(), certs.path().join(entry.file_name())).unwrap();
    }
    let service = CertifierService::start(config(certs.path())).unwrap();
    (service, certs)
}

#[test]
fn controller_certificate_lands_in_workload() {
    let (mut certifier, _certs) = service();
    let workload_root = tempfile::tempdir().unwrap();
    let mut requirer = Requirer::new(CertificateKind::Controller.protocol());
    let mut sink = workload_sink(
        CertificateKind::Controller,
        DirWorkload::new(workload_root.path()),
        Path::new(CERTS),
    )
    .unwrap();

    let mut broker = RelationBroker::new();
    broker.relate_with_id("cert-controller", RelationId::new(7)).unwrap();
    broker
        .run_until_idle(|broker, delivery| match delivery.side {
            Side::Provider => certifier.handle(broker, delivery),
            Side::Requirer => requirer.serve(delivery, &mut sink),
        })
        .unwrap();

    let written = std::fs::read_to_string(
        workload_root.path().join("var/opt/magma/certs/controller.crt"),
    )
    .unwrap();
    let certificate = Certificate::from_pem(&written).unwrap();
    assert_eq!(certificate.common_name(), Some("*.orc8r.test"));
    validate_certificate(&certificate, certifier.bundle().root_ca().certificate()).unwrap();
    assert!(!workload_root.path().join("var/opt/magma/certs/controller.key").exists());
}

#[test]
fn admin_operator_receives_matching_pair() {
    let (mut certifier, _certs) = service();
    let mut requirer = Requirer::new(CertificateKind::AdminOperator.protocol());
    let mut received = Vec::new();

    let mut broker = RelationBroker::new();
    broker.relate("cert-admin-operator");
    broker
        .run_until_idle(|broker, delivery| match delivery.side {
            Side::Provider => certifier.handle(broker, delivery),
            Side::Requirer => {
                received.extend(requirer.handle(delivery));
                Ok(Outcome::Handled)
            }
        })
        .unwrap();

    assert_eq!(received.len(), 1);
    let Notification::CertificateAvailable { material, .. } = &received[0] else {
        panic!("expected a certificate notification");
    };
    let certificate = Certificate::from_pem(material.certificate().unwrap()).unwrap();
    let key = magma_pki::PrivateKey::from_pem(material.private_key().unwrap()).unwrap();
    magma_pki::verify_key_pair(&certificate, &key, None).unwrap();

    let pfx = open_pfx_package(certifier.bundle().admin_operator_pfx(), "operator-pass").unwrap();
    assert_eq!(pfx.certificate, certificate);
}

#[test]
fn gateway_csr_is_signed_by_certifier_ca() {
    let (mut certifier, _certs) = service();
    let mut requirer = Requirer::new(CertificateKind::SignedCsr.protocol());
    let mut signed = Vec::new();

    let mut broker = RelationBroker::new();
    let id = broker.relate("cert-csr");
    let key = generate_private_key(&KeyParams::new()).unwrap();
    let csr = generate_csr(&key, None, &CsrRequest::new("agw01.orc8r.test")).unwrap();
    requirer
        .request(
            &mut broker,
            id,
            &Material::new().with(Field::CertificateSigningRequest, csr.pem()),
        )
        .unwrap();

    broker
        .run_until_idle(|broker, delivery| match delivery.side {
            Side::Provider => certifier.handle(broker, delivery),
            Side::Requirer => {
                if let Some(notification) = requirer.handle(delivery) {
                    signed.extend(notification.certificate().map(String::from));
                }
                Ok(Outcome::Handled)
            }
        })
        .unwrap();

    assert_eq!(signed.len(), 1);
    let certificate = Certificate::from_pem(&signed[0]).unwrap();
    assert_eq!(certificate.common_name(), Some("agw01.orc8r.test"));
    validate_certificate(&certificate, certifier.bundle().certifier_ca().certificate()).unwrap();
    magma_pki::verify_key_pair(&certificate, &key, None).unwrap();
}

#[test]
fn renewal_overwrites_requirer_files() {
    let (mut certifier, _certs) = service();
    let workload = MemoryWorkload::new();
    let mut requirer = Requirer::new(CertificateKind::Fluentd.protocol());
    let mut sink = workload_sink(CertificateKind::Fluentd, workload.clone(), Path::new(CERTS)).unwrap();
    let cert_path = Path::new(CERTS).join("fluentd.pem");

    let mut broker = RelationBroker::new();
    broker.relate("cert-fluentd");
    broker.relate("cert-fluentd");
    let mut step = |broker: &mut RelationBroker, certifier: &mut CertifierService| {
        broker
            .run_until_idle(|broker, delivery| match delivery.side {
                Side::Provider => certifier.handle(broker, delivery),
                Side::Requirer => requirer.serve(delivery, &mut sink),
            })
            .unwrap();
    };

    step(&mut broker, &mut certifier);
    let first = workload.file(&cert_path).unwrap();
    assert_eq!(workload.writes().len(), 4);

    assert_eq!(certifier.renew(&mut broker, CertificateKind::Fluentd).unwrap(), 2);
    step(&mut broker, &mut certifier);

    let renewed = workload.file(&cert_path).unwrap();
    assert_ne!(first, renewed);
    assert_eq!(renewed, certifier.bundle().fluentd().certificate.pem().as_bytes());
    assert_eq!(workload.writes().len(), 8);
}
