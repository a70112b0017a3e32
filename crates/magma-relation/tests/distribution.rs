//! Protocol-level scenarios across a provider and a requirer sharing a broker.

use magma_relation::{
    CertificateKind, CertificateRequest, DirWorkload, Field, FileSink, Material, MemoryWorkload, Notification,
    Outcome, Provider, RelationBroker, RelationId, RelationState, Requirer, Result, Side,
};
use proptest::prelude::*;
use std::path::PathBuf;

fn drain_requirer(broker: &mut RelationBroker, requirer: &mut Requirer) -> Vec<Notification> {
    let mut seen = Vec::new();
    broker
        .run_until_idle(|_, delivery| {
            seen.extend(requirer.handle(delivery));
            Ok(Outcome::Handled)
        })
        .unwrap();
    seen
}

#[test]
fn admin_operator_needs_both_fields() {
    let mut broker = RelationBroker::new();
    let mut requirer = Requirer::new(CertificateKind::AdminOperator.protocol());
    let id = broker.relate("cert-admin-operator");
    assert!(drain_requirer(&mut broker, &mut requirer).is_empty());

    broker.write(Side::Provider, id, "certificate", "ADMIN-CERT").unwrap();
    assert!(drain_requirer(&mut broker, &mut requirer).is_empty());
    assert_eq!(requirer.state(id), Some(RelationState::Requested));

    broker.write(Side::Provider, id, "private_key", "ADMIN-KEY").unwrap();
    let seen = drain_requirer(&mut broker, &mut requirer);
    assert_eq!(seen.len(), 1);
    assert!(matches!(seen[0], Notification::CertificateAvailable { .. }));
    assert_eq!(seen[0].certificate(), Some("ADMIN-CERT"));
    assert_eq!(seen[0].private_key(), Some("ADMIN-KEY"));
    assert_eq!(requirer.state(id), Some(RelationState::Available));
}

#[test]
fn controller_certificate_reaches_workload_file() {
    let mut broker = RelationBroker::new();
    let mut provider = Provider::new(CertificateKind::Controller.protocol());
    let mut requirer = Requirer::new(CertificateKind::Controller.protocol());
    let workload = MemoryWorkload::new();
    let mut sink =
        FileSink::new(workload.clone()).certificate("/var/opt/magma/certs/controller.crt");

    let mut requests = Vec::new();
    let mut source = |request: &CertificateRequest| -> Result<Material> {
        requests.push(request.relation_id);
        Ok(Material::new().with(Field::Certificate, "CONTROLLER-PEM"))
    };

    broker.relate_with_id("cert-controller", RelationId::new(7)).unwrap();
    broker
        .run_until_idle(|broker, delivery| {
            provider.serve(broker, delivery, &mut source)?;
            requirer.serve(delivery, &mut sink)
        })
        .unwrap();

    assert_eq!(requests, vec![RelationId::new(7)]);
    let published = broker
        .bucket(RelationId::new(7), Side::Provider)
        .unwrap()
        .get("certificate")
        .cloned()
        .unwrap();
    assert_eq!(
        workload.writes(),
        vec![(PathBuf::from("/var/opt/magma/certs/controller.crt"), published.into_bytes())]
    );
}

#[test]
fn csr_round_trip_between_units() {
    let mut broker = RelationBroker::new();
    let mut provider = Provider::new(CertificateKind::SignedCsr.protocol());
    let mut requirer = Requirer::new(CertificateKind::SignedCsr.protocol());
    let id = broker.relate("cert-csr");

    let mut source = |request: &CertificateRequest| -> Result<Material> {
        let csr = request.request.certificate_signing_request().unwrap_or_default();
        Ok(Material::new().with(Field::Certificate, format!("SIGNED({csr})")))
    };
    let mut received = Vec::new();

    let mut step = |broker: &mut RelationBroker, received: &mut Vec<String>| {
        broker
            .run_until_idle(|broker, delivery| {
                provider.serve(broker, delivery, &mut source)?;
                if let Some(notification) = requirer.handle(delivery) {
                    received.extend(notification.certificate().map(String::from));
                }
                Ok(Outcome::Handled)
            })
            .unwrap();
    };

    step(&mut broker, &mut received);
    assert!(received.is_empty());

    let csr = Material::new().with(Field::CertificateSigningRequest, "CSR-A");
    Requirer::new(CertificateKind::SignedCsr.protocol())
        .request(&mut broker, id, &csr)
        .unwrap();
    step(&mut broker, &mut received);
    assert_eq!(received, vec!["SIGNED(CSR-A)".to_string()]);
}

#[test]
fn renewal_propagates_to_every_requirer() {
    let mut broker = RelationBroker::new();
    let mut provider = Provider::new(CertificateKind::Fluentd.protocol());
    let mut requirer = Requirer::new(CertificateKind::Fluentd.protocol());
    let workload = MemoryWorkload::new();
    let mut sink = FileSink::new(workload.clone())
        .certificate("/certs/fluentd.pem")
        .private_key("/certs/fluentd.key");

    let mut generation = 0;
    let mut source = |_: &CertificateRequest| -> Result<Material> {
        generation += 1;
        Ok(Material::new()
            .with(Field::Certificate, format!("CERT-{generation}"))
            .with(Field::PrivateKey, format!("KEY-{generation}")))
    };

    broker.relate("cert-fluentd");
    broker
        .run_until_idle(|broker, delivery| {
            provider.serve(broker, delivery, &mut source)?;
            requirer.serve(delivery, &mut sink)
        })
        .unwrap();
    assert_eq!(workload.file("/certs/fluentd.pem"), Some(b"CERT-1".to_vec()));

    provider.republish(&mut broker, &mut source).unwrap();
    broker
        .run_until_idle(|_, delivery| requirer.serve(delivery, &mut sink))
        .unwrap();
    assert_eq!(workload.file("/certs/fluentd.pem"), Some(b"CERT-2".to_vec()));
    assert_eq!(workload.file("/certs/fluentd.key"), Some(b"KEY-2".to_vec()));
}

#[test]
fn unreachable_workload_defers_until_reachable() {
    let mut broker = RelationBroker::new();
    let mut requirer = Requirer::new(CertificateKind::RootCa.protocol());
    let workload = MemoryWorkload::new();
    workload.set_reachable(false);
    let mut sink = FileSink::new(workload.clone()).certificate("/certs/rootCA.pem");

    let id = broker.relate("cert-root-ca");
    broker.write(Side::Provider, id, "certificate", "ROOT").unwrap();
    broker
        .run_until_idle(|_, delivery| requirer.serve(delivery, &mut sink))
        .unwrap();
    assert_eq!(broker.deferred(), 1);
    assert!(workload.writes().is_empty());

    workload.set_reachable(true);
    broker
        .reemit_deferred(|_, delivery| requirer.serve(delivery, &mut sink))
        .unwrap();
    assert_eq!(workload.file("/certs/rootCA.pem"), Some(b"ROOT".to_vec()));
}

#[test]
fn refused_key_write_is_retried_with_the_whole_material() {
    let root = tempfile::tempdir().unwrap();
    let blocker = root.path().join("certs/keys");
    std::fs::create_dir_all(root.path().join("certs")).unwrap();
    std::fs::write(&blocker, "not a directory").unwrap();

    let mut broker = RelationBroker::new();
    let mut requirer = Requirer::new(CertificateKind::Fluentd.protocol());
    let mut sink = FileSink::new(DirWorkload::new(root.path()))
        .certificate("/certs/fluentd.pem")
        .private_key("/certs/keys/fluentd.key");

    let id = broker.relate("cert-fluentd");
    broker
        .write_all(Side::Provider, id, [("certificate", "CERT"), ("private_key", "KEY")])
        .unwrap();
    broker
        .run_until_idle(|_, delivery| requirer.serve(delivery, &mut sink))
        .unwrap();
    assert_eq!(broker.deferred(), 1);
    assert!(!root.path().join("certs/keys/fluentd.key").exists());

    std::fs::remove_file(&blocker).unwrap();
    assert_eq!(
        broker
            .reemit_deferred(|_, delivery| requirer.serve(delivery, &mut sink))
            .unwrap(),
        1
    );
    assert_eq!(broker.deferred(), 0);
    assert_eq!(std::fs::read(root.path().join("certs/fluentd.pem")).unwrap(), b"CERT");
    assert_eq!(std::fs::read(root.path().join("certs/keys/fluentd.key")).unwrap(), b"KEY");
}

#[test]
fn broken_relation_is_forgotten_by_both_sides() {
    let mut broker = RelationBroker::new();
    let mut provider = Provider::new(CertificateKind::Bootstrapper.protocol());
    let mut requirer = Requirer::new(CertificateKind::Bootstrapper.protocol());
    let mut source =
        |_: &CertificateRequest| -> Result<Material> { Ok(Material::new().with(Field::PrivateKey, "KEY")) };
    let mut keys = Vec::new();

    let id = broker.relate("cert-bootstrapper");
    broker
        .run_until_idle(|broker, delivery| {
            provider.serve(broker, delivery, &mut source)?;
            keys.extend(requirer.handle(delivery).and_then(|n| n.private_key().map(String::from)));
            Ok(Outcome::Handled)
        })
        .unwrap();
    assert_eq!(keys, vec!["KEY".to_string()]);

    broker.break_relation(id).unwrap();
    broker
        .run_until_idle(|broker, delivery| {
            provider.serve(broker, delivery, &mut source)?;
            requirer.handle(delivery);
            Ok(Outcome::Handled)
        })
        .unwrap();
    assert!(provider.state(id).is_none());
    assert!(requirer.state(id).is_none());
}

#[derive(Debug, Clone)]
enum Write {
    Certificate(String),
    PrivateKey(String),
    Noise(String),
}

fn write_strategy() -> impl Strategy<Value = Write> {
    prop_oneof![
        "[A-Z]{0,3}".prop_map(Write::Certificate),
        "[A-Z]{0,3}".prop_map(Write::PrivateKey),
        "[a-z]{1,3}".prop_map(Write::Noise),
    ]
}

proptest! {
    #[test]
    fn partial_writes_never_notify(writes in prop::collection::vec(write_strategy(), 1..24)) {
        let mut broker = RelationBroker::new();
        let mut requirer = Requirer::new(CertificateKind::AdminOperator.protocol());
        let id = broker.relate("cert-admin-operator");
        drain_requirer(&mut broker, &mut requirer);

        for write in writes {
            let changed = match &write {
                Write::Certificate(value) => broker.write(Side::Provider, id, "certificate", value),
                Write::PrivateKey(value) => broker.write(Side::Provider, id, "private_key", value),
                Write::Noise(value) => broker.write(Side::Provider, id, "noise", value),
            }
            .unwrap();

            let bucket = broker.bucket(id, Side::Provider).unwrap().clone();
            let certificate = bucket.get("certificate").filter(|v| !v.is_empty()).cloned();
            let private_key = bucket.get("private_key").filter(|v| !v.is_empty()).cloned();
            let complete = certificate.is_some() && private_key.is_some();

            let seen = drain_requirer(&mut broker, &mut requirer);
            prop_assert_eq!(seen.len(), usize::from(changed && complete));
            for notification in &seen {
                prop_assert_eq!(notification.certificate().map(String::from), certificate.clone());
                prop_assert_eq!(notification.private_key().map(String::from), private_key.clone());
            }
            let expected = if complete && changed {
                Some(RelationState::Available)
            } else if changed {
                Some(RelationState::Requested)
            } else {
                requirer.state(id)
            };
            prop_assert_eq!(requirer.state(id), expected);
        }
    }
}
