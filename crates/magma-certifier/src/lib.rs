//! # magma-certifier
//!
//! The certifier unit of a Magma orchestrator deployment.
//!
//! It owns a [`CertificateBundle`] (root CA, certifier CA, controller,
//! admin-operator, fluentd and bootstrapper material) and serves it over the
//! certificate relations through [`CertifierService`]. Requiring units store
//! what they receive with the sinks from [`sinks::workload_sink`].
//!
//! ```text
//! ┌──────────────────┐   cert-* relations   ┌──────────────────┐
//! │ CertifierService │─────────────────────►│ Requirer + sink  │
//! │  (providers)     │◄─────────────────────│ (workload files) │
//! └──────────────────┘   CSR requests       └──────────────────┘
//! ```

#![forbid(unsafe_code)]

pub mod bundle;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod output;
pub mod service;
pub mod sinks;
pub mod source;

pub use bundle::{CertificateBundle, IssuedCertificate};
pub use cli::{Cli, Commands, Format};
pub use config::{CertifierConfig, ConfigOverrides};
pub use error::{CertifierError, Result};
pub use output::OutputFormat;
pub use service::CertifierService;
pub use source::BundleSource;
