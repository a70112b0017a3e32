//! Where requiring units store the material they receive.

use std::path::Path;

use magma_relation::{CertificateKind, FileSink, WorkloadFs};

use crate::bundle::{
    ADMIN_OPERATOR_CERT, ADMIN_OPERATOR_KEY, BOOTSTRAPPER_KEY, CONTROLLER_CERT, FLUENTD_CERT,
    FLUENTD_KEY, ROOT_CA_CERT,
};

/// Builds the file sink a requirer of `kind` uses, writing under `certs_dir`
/// inside `workload`.
///
/// File names match the certifier's own bundle layout. `cert-csr` has no
/// fixed location, so it yields `None`.
pub fn workload_sink<W: WorkloadFs>(
    kind: CertificateKind,
    workload: W,
    certs_dir: &Path,
) -> Option<FileSink<W>> {
    let sink = FileSink::new(workload);
    let sink = match kind {
        CertificateKind::RootCa => sink.certificate(certs_dir.join(ROOT_CA_CERT)),
        CertificateKind::Controller => sink.certificate(certs_dir.join(CONTROLLER_CERT)),
        CertificateKind::AdminOperator => sink
            .certificate(certs_dir.join(ADMIN_OPERATOR_CERT))
            .private_key(certs_dir.join(ADMIN_OPERATOR_KEY)),
        CertificateKind::Fluentd => sink
            .certificate(certs_dir.join(FLUENTD_CERT))
            .private_key(certs_dir.join(FLUENTD_KEY)),
        CertificateKind::Bootstrapper => sink.private_key(certs_dir.join(BOOTSTRAPPER_KEY)),
        CertificateKind::SignedCsr => return None,
    };
    Some(sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use magma_relation::{Field, Material, MaterialConsumer, MemoryWorkload, RelationId};
    use test_case::test_case;

    #[test_case(CertificateKind::RootCa, &["/certs/rootCA.pem"])]
    #[test_case(CertificateKind::Controller, &["/certs/controller.crt"])]
    #[test_case(CertificateKind::AdminOperator, &["/certs/admin_operator.pem", "/certs/admin_operator.key.pem"])]
    #[test_case(CertificateKind::Fluentd, &["/certs/fluentd.pem", "/certs/fluentd.key"])]
    #[test_case(CertificateKind::Bootstrapper, &["/certs/bootstrapper.key"])]
    fn sink_writes_bundle_file_names(kind: CertificateKind, expected: &[&str]) {
        let workload = MemoryWorkload::new();
        let mut sink = workload_sink(kind, workload.clone(), Path::new("/certs")).unwrap();
        let material = Material::new()
            .with(Field::Certificate, "CERT")
            .with(Field::PrivateKey, "KEY");

        sink.consume(&kind.protocol().notification(RelationId::new(1), material))
            .unwrap();

        let written: Vec<_> = workload.writes().into_iter().map(|(path, _)| path).collect();
        let expected: Vec<_> = expected.iter().map(std::path::PathBuf::from).collect();
        assert_eq!(written, expected);
    }

    #[test]
    fn csr_kind_has_no_fixed_sink() {
        assert!(workload_sink(CertificateKind::SignedCsr, MemoryWorkload::new(), Path::new("/certs")).is_none());
    }
}
