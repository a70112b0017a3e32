//! Requirer side of the distribution protocol.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::broker::{Delivery, Outcome, RelationBroker};
use crate::error::{Error, Result};
use crate::protocol::{Material, Notification, Protocol};
use crate::provider::RelationState;
use crate::state::JsonStore;
use crate::types::{EventKind, RelationId, Side};

/// Acts on material once it is available, e.g. by writing it into a workload.
pub trait MaterialConsumer {
    /// Consumes a notification. Returning [`Outcome::Deferred`] asks for the
    /// event to be delivered again later. Consuming identical material twice
    /// must be harmless.
    fn consume(&mut self, notification: &Notification) -> Result<Outcome>;
}

impl<F> MaterialConsumer for F
where
    F: FnMut(&Notification) -> Result<Outcome>,
{
    fn consume(&mut self, notification: &Notification) -> Result<Outcome> {
        self(notification)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RequirerRecord {
    relation_id: RelationId,
    state: RelationState,
    updated_at: DateTime<Utc>,
}

/// Tracks every relation of one protocol on the requiring unit.
pub struct Requirer {
    protocol: Protocol,
    records: BTreeMap<RelationId, RequirerRecord>,
    store: Option<JsonStore>,
}

impl Requirer {
    /// Creates a requirer that keeps its state in memory only.
    #[must_use]
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            records: BTreeMap::new(),
            store: None,
        }
    }

    /// Creates a requirer whose state is snapshotted under `state_dir`.
    pub fn with_state_dir(protocol: Protocol, state_dir: &Path) -> Self {
        let store = JsonStore::new(state_dir, &format!("{}-requirer", protocol.relation_name()));
        let saved: Vec<RequirerRecord> = store.load();
        debug!(relation = protocol.relation_name(), count = saved.len(), "Restored requirer state");
        Self {
            protocol,
            records: saved.into_iter().map(|r| (r.relation_id, r)).collect(),
            store: Some(store),
        }
    }

    /// The protocol this requirer consumes.
    #[must_use]
    pub const fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// State of a relation, if it is tracked.
    #[must_use]
    pub fn state(&self, relation_id: RelationId) -> Option<RelationState> {
        self.records.get(&relation_id).map(|r| r.state)
    }

    /// Applies a delivery and returns a notification when the provider's
    /// data holds every provided field.
    ///
    /// Partially populated data yields nothing; the requirer simply waits for
    /// the next change. Every complete change notifies again, so renewed
    /// material propagates.
    pub fn handle(&mut self, delivery: &Delivery) -> Option<Notification> {
        if delivery.side != Side::Requirer || delivery.relation_name != self.protocol.relation_name() {
            return None;
        }
        let relation_id = delivery.relation_id;

        match delivery.kind {
            EventKind::Broken => {
                if self.records.remove(&relation_id).is_some() {
                    info!(relation = %delivery.relation_name, relation_id = %relation_id, "Discarded requirer state");
                    self.snapshot();
                }
                None
            }
            EventKind::Joined => {
                self.set_state(relation_id, RelationState::Requested);
                None
            }
            EventKind::Changed => match self.protocol.provided_material(&delivery.peer_data) {
                Some(material) => {
                    self.set_state(relation_id, RelationState::Available);
                    info!(relation = %delivery.relation_name, relation_id = %relation_id, "Certificate material available");
                    Some(self.protocol.notification(relation_id, material))
                }
                None => {
                    debug!(relation = %delivery.relation_name, relation_id = %relation_id, "Provider data incomplete");
                    self.set_state(relation_id, RelationState::Requested);
                    None
                }
            },
        }
    }

    /// Publishes request fields (e.g. a CSR) to the provider.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IncompleteMaterial`] if a request field is missing and
    /// [`Error::UnknownRelation`] if the relation is not open.
    pub fn request(
        &mut self,
        broker: &mut RelationBroker,
        relation_id: RelationId,
        request: &Material,
    ) -> Result<()> {
        let missing: Vec<_> = self
            .protocol
            .requests()
            .iter()
            .copied()
            .filter(|field| request.get(*field).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(Error::IncompleteMaterial {
                relation_id,
                missing,
            });
        }

        let entries: Vec<(&str, &str)> = self
            .protocol
            .requests()
            .iter()
            .filter_map(|field| request.get(*field).map(|value| (field.key(), value)))
            .collect();
        broker.write_all(Side::Requirer, relation_id, entries)?;
        info!(relation = self.protocol.relation_name(), relation_id = %relation_id, "Published certificate request");
        Ok(())
    }

    /// Handles a delivery end to end, passing notifications to `consumer`.
    ///
    /// # Errors
    ///
    /// Propagates consumer errors.
    pub fn serve<C>(&mut self, delivery: &Delivery, consumer: &mut C) -> Result<Outcome>
    where
        C: MaterialConsumer + ?Sized,
    {
        match self.handle(delivery) {
            Some(notification) => consumer.consume(&notification),
            None => Ok(Outcome::Handled),
        }
    }

    fn set_state(&mut self, relation_id: RelationId, state: RelationState) {
        let record = self.records.entry(relation_id).or_insert_with(|| RequirerRecord {
            relation_id,
            state,
            updated_at: Utc::now(),
        });
        record.state = state;
        record.updated_at = Utc::now();
        self.snapshot();
    }

    fn snapshot(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let records: Vec<&RequirerRecord> = self.records.values().collect();
        if let Err(e) = store.save(&records) {
            warn!(error = %e, "failed to snapshot requirer state");
        }
    }
}

impl std::fmt::Debug for Requirer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Requirer")
            .field("relation", &self.protocol.relation_name())
            .field("relations", &self.records.len())
            .finish_non_exhaustive()
    }
}
