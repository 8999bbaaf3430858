//! Correlates outgoing requests with broker acknowledgements
//!
//! `rumqttc` hands out packet ids only once a request leaves the event loop,
//! reported as `Outgoing::Subscribe(pkid)` and friends in the order the
//! requests were queued. The tracker keeps a FIFO of unbound requests per
//! kind, binds each outgoing packet id to the oldest one, and resolves the
//! request's [`Completion`] when the matching ack arrives.
//!
//! A publish whose packet id is still awaiting its ack is held back by
//! `rumqttc` (`Outgoing::AwaitAck`) and sent once that ack arrives. Such a
//! publish is bound at the collision and only takes over the packet id when
//! the earlier holder is acknowledged.

use std::collections::{HashMap, VecDeque};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::error::MqttError;
use super::transport::{Ack, Completer, Completion};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Subscribe,
    Unsubscribe,
    Publish,
}

pub type TicketId = u64;

struct Ticket {
    completer: Completer,
    /// Packets still waiting for their ack
    outstanding: usize,
}

#[derive(Clone, Copy)]
struct Queued {
    ticket: TicketId,
    /// QoS 0 publishes have no ack, sending them completes the request
    complete_on_send: bool,
}

#[derive(Default)]
pub struct RequestTracker {
    next_id: TicketId,
    tickets: HashMap<TicketId, Ticket>,
    queued: HashMap<RequestKind, VecDeque<Queued>>,
    in_flight: HashMap<(RequestKind, u16), TicketId>,
    /// Publishes held back until the current holder of their packet id is acked
    collided: HashMap<u16, TicketId>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request that will put `packets` packets on the wire
    pub fn register(
        &mut self,
        kind: RequestKind,
        packets: usize,
        complete_on_send: bool,
    ) -> (TicketId, Completion) {
        let (completer, completion) = oneshot::channel();
        let id = self.next_id;
        self.next_id += 1;

        self.tickets.insert(
            id,
            Ticket {
                completer,
                outstanding: packets,
            },
        );
        let queue = self.queued.entry(kind).or_default();
        for _ in 0..packets {
            queue.push_back(Queued {
                ticket: id,
                complete_on_send,
            });
        }
        (id, completion)
    }

    /// Fails a ticket whose last `unsent` packets never reached the client
    ///
    /// Packets the client already accepted stay queued so later packet ids
    /// still line up; their acks are dropped once they arrive.
    pub fn abandon(&mut self, kind: RequestKind, ticket: TicketId, unsent: usize, error: MqttError) {
        if let Some(queue) = self.queued.get_mut(&kind) {
            for _ in 0..unsent {
                match queue.back() {
                    Some(q) if q.ticket == ticket => {
                        queue.pop_back();
                    }
                    _ => break,
                }
            }
        }
        self.fail(ticket, error);
    }

    /// A packet of `kind` left the client with `pkid`
    pub fn on_outgoing(&mut self, kind: RequestKind, pkid: u16) {
        if kind == RequestKind::Publish && pkid != 0 && self.in_flight.contains_key(&(kind, pkid))
        {
            // either a retransmit after reconnect or the release of a collided
            // publish; both are already bound
            debug!("Publish {} already bound", pkid);
            return;
        }

        let Some(queued) = self.queued.get_mut(&kind).and_then(VecDeque::pop_front) else {
            debug!("Untracked outgoing {:?} packet {}", kind, pkid);
            return;
        };

        if queued.complete_on_send {
            self.settle(queued.ticket, pkid);
        } else {
            self.in_flight.insert((kind, pkid), queued.ticket);
        }
    }

    /// The next publish was held back because `pkid` is still unacknowledged
    pub fn on_collision(&mut self, pkid: u16) {
        if self.collided.contains_key(&pkid) {
            debug!("Collided publish {} held back again", pkid);
            return;
        }
        let Some(queued) = self
            .queued
            .get_mut(&RequestKind::Publish)
            .and_then(VecDeque::pop_front)
        else {
            debug!("Untracked publish collision on packet {}", pkid);
            return;
        };
        debug!("Publish collided on packet {}", pkid);
        self.collided.insert(pkid, queued.ticket);
    }

    /// The broker acknowledged packet `pkid` of `kind`
    pub fn on_ack(&mut self, kind: RequestKind, pkid: u16, result: Result<(), MqttError>) {
        let Some(ticket) = self.in_flight.remove(&(kind, pkid)) else {
            debug!("Ack for unknown {:?} packet {}", kind, pkid);
            return;
        };
        if kind == RequestKind::Publish {
            if let Some(next) = self.collided.remove(&pkid) {
                self.in_flight.insert((kind, pkid), next);
            }
        }
        match result {
            Ok(()) => self.settle(ticket, pkid),
            Err(e) => self.fail(ticket, e),
        }
    }

    /// Fails every bound request of `kind`
    pub fn fail_in_flight<F>(&mut self, kind: RequestKind, error: F)
    where
        F: Fn() -> MqttError,
    {
        let lost: Vec<(RequestKind, u16)> = self
            .in_flight
            .keys()
            .filter(|(k, _)| *k == kind)
            .copied()
            .collect();
        for key in lost {
            if let Some(ticket) = self.in_flight.remove(&key) {
                self.fail(ticket, error());
            }
        }
    }

    /// Fails everything, bound or not
    pub fn fail_all<F>(&mut self, error: F)
    where
        F: Fn() -> MqttError,
    {
        self.queued.clear();
        self.in_flight.clear();
        self.collided.clear();
        for (_, ticket) in self.tickets.drain() {
            let _ = ticket.completer.send(Err(error()));
        }
    }

    /// Requests still waiting for completion
    pub fn pending(&self) -> usize {
        self.tickets.len()
    }

    fn settle(&mut self, id: TicketId, pkid: u16) {
        let Some(ticket) = self.tickets.get_mut(&id) else {
            return;
        };
        ticket.outstanding = ticket.outstanding.saturating_sub(1);
        if ticket.outstanding > 0 {
            return;
        }
        if let Some(ticket) = self.tickets.remove(&id) {
            if ticket.completer.send(Ok(Ack { pkid })).is_err() {
                debug!("Completion for packet {} has no receiver", pkid);
            }
        }
    }

    fn fail(&mut self, id: TicketId, error: MqttError) {
        if let Some(ticket) = self.tickets.remove(&id) {
            if let Err(Err(e)) = ticket.completer.send(Err(error)) {
                warn!("Dropped failure without receiver: {}", e);
            }
        }
    }
}
