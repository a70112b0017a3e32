//! Certificate distribution over relations.
//!
//! Two cooperating units exchange certificate material through a relation:
//! each side owns a string-keyed data bucket that only it writes and that the
//! other side reads. The provider answers requests by publishing fixed fields
//! (`certificate`, `private_key`); the requirer acts only once every field its
//! protocol expects is present.
//!
//! All certificate kinds share one generic state machine, parameterised by a
//! [`Protocol`] (relation name plus field sets):
//!
//! - [`Provider`] turns relation events into [`CertificateRequest`]s and
//!   publishes material from a [`MaterialSource`].
//! - [`Requirer`] turns relation events into [`Notification`]s for a
//!   [`MaterialConsumer`] such as [`FileSink`].
//! - [`RelationBroker`] models the platform: it owns the buckets and delivers
//!   events one at a time, with deferral and redelivery.
//!
//! # Example
//!
//! ```
//! use magma_relation::{
//!     CertificateKind, Field, FileSink, Material, MemoryWorkload, Provider, RelationBroker,
//!     Requirer,
//! };
//!
//! let mut broker = RelationBroker::new();
//! let mut provider = Provider::new(CertificateKind::Controller.protocol());
//! let mut requirer = Requirer::new(CertificateKind::Controller.protocol());
//! let workload = MemoryWorkload::new();
//! let mut sink = FileSink::new(workload.clone()).certificate("/var/opt/magma/certs/controller.crt");
//! let mut source = |_: &magma_relation::CertificateRequest| -> magma_relation::Result<Material> {
//!     Ok(Material::new().with(Field::Certificate, "-----BEGIN CERTIFICATE-----\n..."))
//! };
//!
//! broker.relate("cert-controller");
//! broker
//!     .run_until_idle(|broker, delivery| {
//!         provider.serve(broker, delivery, &mut source)?;
//!         requirer.serve(delivery, &mut sink)
//!     })
//!     .unwrap();
//!
//! assert!(workload.file("/var/opt/magma/certs/controller.crt").is_some());
//! ```

#![forbid(unsafe_code)]

pub mod broker;
pub mod error;
pub mod protocol;
pub mod provider;
pub mod requirer;
pub mod state;
pub mod types;
pub mod workload;

pub use broker::{Delivery, Outcome, RelationBroker};
pub use error::{Error, Result};
pub use protocol::{CertificateKind, CertificateRequest, Material, Notification, Protocol};
pub use provider::{MaterialSource, Provider, RelationState};
pub use requirer::{MaterialConsumer, Requirer};
pub use state::JsonStore;
pub use types::{Bucket, EventKind, Field, RelationId, Side};
pub use workload::{DirWorkload, FileSink, MemoryWorkload, WorkloadFs};
