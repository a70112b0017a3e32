//! The platform side of relations: data buckets and event delivery.
//!
//! A [`RelationBroker`] owns both buckets of every relation and queues the
//! lifecycle events the platform would deliver. Events are dispatched one at
//! a time, each run to completion before the next, and every delivery carries
//! a snapshot of the peer's bucket taken at dispatch.
//!
//! Units only ever write the bucket of the side they write as; the peer's
//! bucket is visible to them solely through [`Delivery::peer_data`].

use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::types::{Bucket, EventKind, RelationId, Side};

/// What a handler did with a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The event was processed.
    Handled,
    /// The event could not be processed yet; deliver it again later.
    Deferred,
}

/// One event as seen by the receiving unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Relation the event belongs to.
    pub relation_id: RelationId,
    /// Relation name.
    pub relation_name: String,
    /// Side of the unit receiving the event.
    pub side: Side,
    /// Event kind.
    pub kind: EventKind,
    /// The peer's bucket at dispatch time. Empty for `Broken`.
    pub peer_data: Bucket,
    /// 1 on first delivery, incremented on each redelivery.
    pub attempt: u32,
}

impl Delivery {
    /// Whether this is a redelivery of a deferred event.
    #[must_use]
    pub const fn is_redelivery(&self) -> bool {
        self.attempt > 1
    }
}

#[derive(Debug, Clone)]
struct PendingEvent {
    relation_id: RelationId,
    relation_name: String,
    side: Side,
    kind: EventKind,
    attempt: u32,
}

#[derive(Debug, Default)]
struct Relation {
    name: String,
    provider: Bucket,
    requirer: Bucket,
}

impl Relation {
    const fn bucket(&self, side: Side) -> &Bucket {
        match side {
            Side::Provider => &self.provider,
            Side::Requirer => &self.requirer,
        }
    }

    fn bucket_mut(&mut self, side: Side) -> &mut Bucket {
        match side {
            Side::Provider => &mut self.provider,
            Side::Requirer => &mut self.requirer,
        }
    }
}

/// In-process model of the relation platform.
#[derive(Debug, Default)]
pub struct RelationBroker {
    relations: BTreeMap<RelationId, Relation>,
    queue: VecDeque<PendingEvent>,
    deferred: VecDeque<PendingEvent>,
    next_id: u32,
}

impl RelationBroker {
    /// Creates a broker with no relations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Establishes a relation under the next free id and queues `Joined`
    /// for both sides (provider first).
    pub fn relate(&mut self, relation_name: &str) -> RelationId {
        while self.relations.contains_key(&RelationId::new(self.next_id)) {
            self.next_id += 1;
        }
        let id = RelationId::new(self.next_id);
        self.next_id += 1;
        self.insert(id, relation_name);
        id
    }

    /// Establishes a relation with a specific id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateRelation`] if the id is taken.
    pub fn relate_with_id(&mut self, relation_name: &str, id: RelationId) -> Result<RelationId> {
        if self.relations.contains_key(&id) {
            return Err(Error::DuplicateRelation(id));
        }
        self.insert(id, relation_name);
        Ok(id)
    }

    fn insert(&mut self, id: RelationId, relation_name: &str) {
        self.relations.insert(
            id,
            Relation {
                name: relation_name.to_string(),
                ..Relation::default()
            },
        );
        info!(relation = relation_name, relation_id = %id, "Relation joined");
        for side in [Side::Provider, Side::Requirer] {
            self.enqueue(id, relation_name, side, EventKind::Joined);
        }
    }

    /// Removes a relation, dropping its buckets and any undelivered events,
    /// and queues `Broken` for both sides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownRelation`] if the relation does not exist.
    pub fn break_relation(&mut self, id: RelationId) -> Result<()> {
        let relation = self.relations.remove(&id).ok_or(Error::UnknownRelation(id))?;
        self.queue.retain(|event| event.relation_id != id);
        self.deferred.retain(|event| event.relation_id != id);
        info!(relation = %relation.name, relation_id = %id, "Relation broken");
        for side in [Side::Provider, Side::Requirer] {
            self.enqueue(id, &relation.name, side, EventKind::Broken);
        }
        Ok(())
    }

    /// Ids of the open relations named `relation_name`.
    #[must_use]
    pub fn relation_ids(&self, relation_name: &str) -> Vec<RelationId> {
        self.relations
            .iter()
            .filter(|(_, relation)| relation.name == relation_name)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Name of an open relation.
    #[must_use]
    pub fn relation_name(&self, id: RelationId) -> Option<&str> {
        self.relations.get(&id).map(|relation| relation.name.as_str())
    }

    /// Current contents of one side's bucket.
    #[must_use]
    pub fn bucket(&self, id: RelationId, side: Side) -> Option<&Bucket> {
        self.relations.get(&id).map(|relation| relation.bucket(side))
    }

    /// Writes one key into the writer's own bucket. An empty value removes
    /// the key. Returns whether the bucket changed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownRelation`] if the relation does not exist.
    pub fn write(&mut self, writer: Side, id: RelationId, key: &str, value: &str) -> Result<bool> {
        self.write_all(writer, id, [(key, value)])
    }

    /// Writes several keys into the writer's own bucket as one change, so the
    /// peer sees them in a single `Changed` event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownRelation`] if the relation does not exist.
    pub fn write_all<'a, I>(&mut self, writer: Side, id: RelationId, entries: I) -> Result<bool>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let relation = self.relations.get_mut(&id).ok_or(Error::UnknownRelation(id))?;
        let bucket = relation.bucket_mut(writer);

        let mut changed = false;
        for (key, value) in entries {
            let previous = if value.is_empty() {
                bucket.remove(key)
            } else {
                bucket.insert(key.to_string(), value.to_string())
            };
            changed |= match previous {
                Some(previous) => previous != value,
                None => !value.is_empty(),
            };
        }

        if changed {
            let name = relation.name.clone();
            debug!(relation = %name, relation_id = %id, side = %writer, "Relation data changed");
            self.enqueue(id, &name, writer.peer(), EventKind::Changed);
        }
        Ok(changed)
    }

    fn enqueue(&mut self, id: RelationId, relation_name: &str, side: Side, kind: EventKind) {
        // A pending Changed already reads the latest data at dispatch.
        let coalesced = kind == EventKind::Changed
            && self.queue.iter().any(|event| {
                event.relation_id == id && event.side == side && event.kind == EventKind::Changed
            });
        if coalesced {
            return;
        }
        self.queue.push_back(PendingEvent {
            relation_id: id,
            relation_name: relation_name.to_string(),
            side,
            kind,
            attempt: 1,
        });
    }

    /// Number of fresh events waiting for dispatch.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Number of deferred events waiting for redelivery.
    #[must_use]
    pub fn deferred(&self) -> usize {
        self.deferred.len()
    }

    /// Dispatches queued events until none remain, returning how many
    /// deliveries were made. Deferred events are redelivered ahead of every
    /// fresh event.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first handler error; the failed event is
    /// dropped.
    pub fn run_until_idle<F>(&mut self, mut handler: F) -> Result<usize>
    where
        F: FnMut(&mut Self, &Delivery) -> Result<Outcome>,
    {
        let mut delivered = 0;
        while let Some(event) = self.queue.pop_front() {
            delivered += self.redeliver_deferred(&mut handler)?;
            delivered += self.dispatch(event, &mut handler)?;
        }
        Ok(delivered)
    }

    /// Redelivers every deferred event once, then drains the queue.
    ///
    /// # Errors
    ///
    /// See [`Self::run_until_idle`].
    pub fn reemit_deferred<F>(&mut self, mut handler: F) -> Result<usize>
    where
        F: FnMut(&mut Self, &Delivery) -> Result<Outcome>,
    {
        let redelivered = self.redeliver_deferred(&mut handler)?;
        Ok(redelivered + self.run_until_idle(handler)?)
    }

    fn redeliver_deferred<F>(&mut self, handler: &mut F) -> Result<usize>
    where
        F: FnMut(&mut Self, &Delivery) -> Result<Outcome>,
    {
        // Events deferred again land behind this round; a failing event
        // leaves the rest of the round queued.
        let round = self.deferred.len();
        let mut delivered = 0;
        for _ in 0..round {
            let Some(event) = self.deferred.pop_front() else {
                break;
            };
            delivered += self.dispatch(event, handler)?;
        }
        Ok(delivered)
    }

    fn dispatch<F>(&mut self, mut event: PendingEvent, handler: &mut F) -> Result<usize>
    where
        F: FnMut(&mut Self, &Delivery) -> Result<Outcome>,
    {
        let peer_data = match event.kind {
            EventKind::Broken => Bucket::new(),
            EventKind::Joined | EventKind::Changed => {
                let Some(relation) = self.relations.get(&event.relation_id) else {
                    return Ok(0);
                };
                relation.bucket(event.side.peer()).clone()
            }
        };

        let delivery = Delivery {
            relation_id: event.relation_id,
            relation_name: event.relation_name.clone(),
            side: event.side,
            kind: event.kind,
            peer_data,
            attempt: event.attempt,
        };
        debug!(
            relation = %delivery.relation_name,
            relation_id = %delivery.relation_id,
            side = %delivery.side,
            event = %delivery.kind,
            attempt = delivery.attempt,
            "Delivering event"
        );

        match handler(self, &delivery) {
            Ok(Outcome::Handled) => Ok(1),
            Ok(Outcome::Deferred) => {
                warn!(
                    relation = %delivery.relation_name,
                    relation_id = %delivery.relation_id,
                    event = %delivery.kind,
                    "Deferring event"
                );
                event.attempt += 1;
                self.deferred.push_back(event);
                Ok(1)
            }
            Err(e) => {
                warn!(
                    relation = %delivery.relation_name,
                    relation_id = %delivery.relation_id,
                    event = %delivery.kind,
                    error = %e,
                    "Event handler failed"
                );
                Err(e)
            }
        }
    }
}
