//! Provider side of the distribution protocol.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::broker::{Delivery, Outcome, RelationBroker};
use crate::error::{Error, Result};
use crate::protocol::{CertificateRequest, Material, Protocol};
use crate::state::JsonStore;
use crate::types::{EventKind, RelationId, Side};

/// Per-relation protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationState {
    /// The requirer joined; material has not been published yet.
    Requested,
    /// Material has been published to the relation.
    Available,
}

/// Produces the material a provider publishes in answer to a request.
pub trait MaterialSource {
    /// Returns material containing every field the protocol provides.
    fn material(&mut self, request: &CertificateRequest) -> Result<Material>;
}

impl<F> MaterialSource for F
where
    F: FnMut(&CertificateRequest) -> Result<Material>,
{
    fn material(&mut self, request: &CertificateRequest) -> Result<Material> {
        self(request)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProviderRecord {
    relation_id: RelationId,
    state: RelationState,
    #[serde(default)]
    last_request: Option<Material>,
    updated_at: DateTime<Utc>,
}

/// Tracks every relation of one protocol on the providing unit.
pub struct Provider {
    protocol: Protocol,
    records: BTreeMap<RelationId, ProviderRecord>,
    store: Option<JsonStore>,
}

impl Provider {
    /// Creates a provider that keeps its state in memory only.
    #[must_use]
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            records: BTreeMap::new(),
            store: None,
        }
    }

    /// Creates a provider whose state is snapshotted under `state_dir`,
    /// restoring any earlier snapshot.
    pub fn with_state_dir(protocol: Protocol, state_dir: &Path) -> Self {
        let store = JsonStore::new(state_dir, &format!("{}-provider", protocol.relation_name()));
        let saved: Vec<ProviderRecord> = store.load();
        debug!(relation = protocol.relation_name(), count = saved.len(), "Restored provider state");
        Self {
            protocol,
            records: saved.into_iter().map(|r| (r.relation_id, r)).collect(),
            store: Some(store),
        }
    }

    /// The protocol this provider serves.
    #[must_use]
    pub const fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// State of a relation, if it is tracked.
    #[must_use]
    pub fn state(&self, relation_id: RelationId) -> Option<RelationState> {
        self.records.get(&relation_id).map(|r| r.state)
    }

    /// Tracked relation ids.
    #[must_use]
    pub fn relation_ids(&self) -> Vec<RelationId> {
        self.records.keys().copied().collect()
    }

    /// Applies a delivery and returns a request when the requirer needs
    /// material.
    ///
    /// Protocols without request fields raise a request on `Joined`. Protocols
    /// with request fields raise one once every request field is present, and
    /// again whenever their values change. Deliveries for other relations or
    /// for the requirer side are ignored.
    pub fn handle(&mut self, delivery: &Delivery) -> Option<CertificateRequest> {
        if delivery.side != Side::Provider || delivery.relation_name != self.protocol.relation_name() {
            return None;
        }
        let relation_id = delivery.relation_id;

        match delivery.kind {
            EventKind::Broken => {
                if self.records.remove(&relation_id).is_some() {
                    info!(relation = %delivery.relation_name, relation_id = %relation_id, "Discarded provider state");
                    self.snapshot();
                }
                None
            }
            EventKind::Joined | EventKind::Changed => {
                let joined = delivery.kind == EventKind::Joined;
                let record = self.records.entry(relation_id).or_insert_with(|| ProviderRecord {
                    relation_id,
                    state: RelationState::Requested,
                    last_request: None,
                    updated_at: Utc::now(),
                });

                let request = if self.protocol.requests().is_empty() {
                    joined.then(Material::new)
                } else {
                    match self.protocol.request_material(&delivery.peer_data) {
                        Some(request) if record.last_request.as_ref() != Some(&request) => {
                            record.last_request = Some(request.clone());
                            record.state = RelationState::Requested;
                            record.updated_at = Utc::now();
                            Some(request)
                        }
                        Some(_) => None,
                        None => {
                            debug!(relation_id = %relation_id, "Waiting for request fields");
                            None
                        }
                    }
                };
                self.snapshot();

                request.map(|request| {
                    info!(relation = %delivery.relation_name, relation_id = %relation_id, "Certificate requested");
                    CertificateRequest {
                        relation_id,
                        relation_name: delivery.relation_name.clone(),
                        request,
                    }
                })
            }
        }
    }

    /// Writes `material` into the provider bucket of `relation_id`.
    ///
    /// Only the protocol's provided fields are written, all in one change.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IncompleteMaterial`] if a provided field is missing,
    /// and [`Error::UnknownRelation`] if the relation is not open.
    pub fn publish(
        &mut self,
        broker: &mut RelationBroker,
        relation_id: RelationId,
        material: &Material,
    ) -> Result<()> {
        let missing = self.protocol.missing_provided(material);
        if !missing.is_empty() {
            return Err(Error::IncompleteMaterial {
                relation_id,
                missing,
            });
        }

        let entries: Vec<(&str, &str)> = self
            .protocol
            .provides()
            .iter()
            .filter_map(|field| material.get(*field).map(|value| (field.key(), value)))
            .collect();
        let changed = broker.write_all(Side::Provider, relation_id, entries)?;

        let record = self.records.entry(relation_id).or_insert_with(|| ProviderRecord {
            relation_id,
            state: RelationState::Requested,
            last_request: None,
            updated_at: Utc::now(),
        });
        record.state = RelationState::Available;
        record.updated_at = Utc::now();
        self.snapshot();

        info!(
            relation = self.protocol.relation_name(),
            relation_id = %relation_id,
            changed,
            "Published certificate material"
        );
        Ok(())
    }

    /// Handles a delivery end to end: on a request, asks `source` for
    /// material and publishes it.
    ///
    /// # Errors
    ///
    /// Propagates source and publish errors.
    pub fn serve<S>(
        &mut self,
        broker: &mut RelationBroker,
        delivery: &Delivery,
        source: &mut S,
    ) -> Result<Outcome>
    where
        S: MaterialSource + ?Sized,
    {
        if let Some(request) = self.handle(delivery) {
            let material = source.material(&request)?;
            self.publish(broker, request.relation_id, &material)?;
        }
        Ok(Outcome::Handled)
    }

    /// Re-publishes fresh material to every open relation, e.g. after the
    /// underlying certificates were renewed. Returns how many relations were
    /// updated.
    ///
    /// Relations whose protocol needs request fields are only refreshed once
    /// a request has been seen.
    ///
    /// # Errors
    ///
    /// Stops at the first source or publish error.
    pub fn republish<S>(&mut self, broker: &mut RelationBroker, source: &mut S) -> Result<usize>
    where
        S: MaterialSource + ?Sized,
    {
        let open = broker.relation_ids(self.protocol.relation_name());
        let mut updated = 0;
        for relation_id in open {
            let request = match self.records.get(&relation_id) {
                None => continue,
                Some(_) if self.protocol.requests().is_empty() => Material::new(),
                Some(record) => match &record.last_request {
                    Some(request) => request.clone(),
                    None => continue,
                },
            };
            let request = CertificateRequest {
                relation_id,
                relation_name: self.protocol.relation_name().to_string(),
                request,
            };
            let material = source.material(&request)?;
            self.publish(broker, relation_id, &material)?;
            updated += 1;
        }
        info!(relation = self.protocol.relation_name(), updated, "Republished certificate material");
        Ok(updated)
    }

    fn snapshot(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let records: Vec<&ProviderRecord> = self.records.values().collect();
        if let Err(e) = store.save(&records) {
            warn!(error = %e, "failed to snapshot provider state");
        }
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("relation", &self.protocol.relation_name())
            .field("relations", &self.records.len())
            .finish_non_exhaustive()
    }
}
