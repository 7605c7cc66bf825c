//! Propagation - envelopes, mailboxes and in-flight accounting
//!
//! Every delivery between agents goes through a bounded mailbox. A sender
//! reserves a slot, hands the envelope over (optionally after a simulated
//! network delay) and returns; it never holds another agent's lock. When
//! every slot is taken the envelope is dropped and counted. Merge is
//! idempotent and gossip repairs whatever a drop loses.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};

use peersync_core::{AgentId, PartyId};
use peersync_state::{Entry, PeerStore};

/// How an entry reached the receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryKind {
    Broadcast,
    Gossip,
}

/// One entry in transit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub from: AgentId,
    pub party: PartyId,
    pub entry: Entry,
    pub kind: DeliveryKind,
}

impl Envelope {
    pub fn broadcast(from: AgentId, party: PartyId, entry: Entry) -> Self {
        Envelope {
            from,
            party,
            entry,
            kind: DeliveryKind::Broadcast,
        }
    }

    pub fn gossip(from: AgentId, party: PartyId, entry: Entry) -> Self {
        Envelope {
            from,
            party,
            entry,
            kind: DeliveryKind::Gossip,
        }
    }
}

/// Receiving half of a mailbox
pub type Inbox = mpsc::Receiver<Envelope>;

/// Count of accepted-but-unprocessed deliveries, shared by all mailboxes
/// of one registry
#[derive(Debug, Default)]
pub struct InFlight {
    pending: AtomicUsize,
    dropped: AtomicUsize,
    activity: Notify,
}

impl InFlight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A delivery has been scheduled
    pub fn begin(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    /// A delivery has been processed or dropped
    pub fn finish(&self) {
        let prev = self.pending.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "in-flight counter underflow");
        self.activity.notify_waiters();
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Deliveries refused because the target mailbox was full or closed
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }

    fn drop_one(&self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }

    /// Wake anyone waiting on [`InFlight::activity`] without changing the count
    pub fn poke(&self) {
        self.activity.notify_waiters();
    }

    /// Notification fired on every finish or poke
    pub fn activity(&self) -> &Notify {
        &self.activity
    }
}

/// Sending half of an agent's mailbox
#[derive(Debug, Clone)]
pub struct Mailbox {
    owner: AgentId,
    tx: mpsc::Sender<Envelope>,
    in_flight: Arc<InFlight>,
}

impl Mailbox {
    /// Bounded mailbox for `owner`
    pub fn channel(owner: AgentId, capacity: usize, in_flight: Arc<InFlight>) -> (Mailbox, Inbox) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Mailbox {
                owner,
                tx,
                in_flight,
            },
            rx,
        )
    }

    pub fn owner(&self) -> AgentId {
        self.owner
    }

    /// Schedule delivery after `delay`. Returns immediately with whether a
    /// mailbox slot was reserved; a reserved envelope counts as in flight
    /// until the receiver calls [`InFlight::finish`]. Delayed envelopes
    /// hold their slot while they wait, so at most `capacity` deliveries
    /// per mailbox are ever outstanding.
    pub fn post(&self, envelope: Envelope, delay: Duration) -> bool {
        let permit = match self.tx.clone().try_reserve_owned() {
            Ok(permit) => permit,
            Err(TrySendError::Full(_)) => {
                self.in_flight.drop_one();
                tracing::debug!(agent = %self.owner, from = %envelope.from, "mailbox full; delivery dropped");
                return false;
            }
            Err(TrySendError::Closed(_)) => {
                self.in_flight.drop_one();
                tracing::warn!(agent = %self.owner, "mailbox closed; delivery dropped");
                return false;
            }
        };

        self.in_flight.begin();
        if delay.is_zero() {
            permit.send(envelope);
        } else {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                permit.send(envelope);
            });
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Entries `source` holds that `target` does not, by canonical value
pub fn missing_entries(source: &PeerStore, target: &PeerStore) -> Vec<(PartyId, Entry)> {
    source
        .iter()
        .filter(|(party, entry)| !target.contains(*party, entry))
        .map(|(party, entry)| (party, entry.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> AgentId {
        s.parse().unwrap()
    }

    fn party(c: char) -> PartyId {
        PartyId::new(c).unwrap()
    }

    #[test]
    fn test_missing_entries_by_value() {
        let mut a = PeerStore::new();
        let mut b = PeerStore::new();
        a.init_parties([party('A'), party('B')]);
        b.init_parties([party('A'), party('B')]);
        let merge = peersync_state::QuorumMerge::passive();
        merge.merge_text(&mut a, party('A'), "#1000");
        merge.merge_text(&mut a, party('A'), "#x by {A.1}/2@a");
        merge.merge_text(&mut b, party('A'), "#x by 2@a");

        let missing = missing_entries(&a, &b);
        let text: Vec<String> = missing.iter().map(|(_, e)| e.canonical()).collect();
        assert_eq!(text, vec!["#1000", "#x by {A.1}/2@a"]);
        assert!(missing_entries(&a, &a).is_empty());
    }

    #[tokio::test]
    async fn test_post_and_finish() {
        let in_flight = InFlight::new();
        let (mailbox, mut inbox) = Mailbox::channel(id("A.1"), 4, in_flight.clone());
        mailbox.post(
            Envelope::broadcast(id("B.1"), party('B'), Entry::parse("#beef")),
            Duration::ZERO,
        );
        assert_eq!(in_flight.pending(), 1);

        let env = inbox.recv().await.unwrap();
        assert_eq!(env.from, id("B.1"));
        assert_eq!(env.kind, DeliveryKind::Broadcast);
        in_flight.finish();
        assert_eq!(in_flight.pending(), 0);
    }

    #[tokio::test]
    async fn test_closed_mailbox_counts_drop() {
        let in_flight = InFlight::new();
        let (mailbox, inbox) = Mailbox::channel(id("A.1"), 1, in_flight.clone());
        drop(inbox);
        let accepted = mailbox.post(
            Envelope::gossip(id("B.1"), party('A'), Entry::genesis()),
            Duration::ZERO,
        );
        assert!(!accepted);
        assert_eq!(in_flight.pending(), 0);
        assert_eq!(in_flight.dropped(), 1);
        assert!(mailbox.is_closed());
    }

    #[tokio::test]
    async fn test_full_mailbox_bounds_outstanding_deliveries() {
        let in_flight = InFlight::new();
        let (mailbox, mut inbox) = Mailbox::channel(id("A.1"), 1, in_flight.clone());
        let accepted = (0..10_000)
            .filter(|i| {
                mailbox.post(
                    Envelope::broadcast(id("B.1"), party('B'), Entry::parse(&format!("#{i}"))),
                    Duration::ZERO,
                )
            })
            .count();
        tokio::task::yield_now().await;

        assert_eq!(accepted, 1);
        assert!(in_flight.pending() <= 1);
        assert_eq!(in_flight.dropped(), 9_999);

        let env = inbox.recv().await.unwrap();
        assert_eq!(env.entry, Entry::parse("#0"));
        in_flight.finish();
        assert!(inbox.try_recv().is_err());

        // the freed slot takes the next delivery
        assert!(mailbox.post(
            Envelope::broadcast(id("B.1"), party('B'), Entry::parse("#late")),
            Duration::ZERO,
        ));
        assert_eq!(in_flight.pending(), 1);
    }

    #[tokio::test]
    async fn test_delayed_delivery_holds_its_slot() {
        let in_flight = InFlight::new();
        let (mailbox, mut inbox) = Mailbox::channel(id("A.1"), 2, in_flight.clone());
        for i in 0..5 {
            mailbox.post(
                Envelope::gossip(id("B.1"), party('A'), Entry::parse(&format!("#{i}"))),
                Duration::from_millis(50),
            );
        }
        assert_eq!(in_flight.pending(), 2);
        assert_eq!(in_flight.dropped(), 3);
        assert!(inbox.try_recv().is_err());

        let mut got = vec![inbox.recv().await.unwrap(), inbox.recv().await.unwrap()];
        got.sort_by(|a, b| a.entry.cmp(&b.entry));
        assert_eq!(got[0].entry, Entry::parse("#0"));
        assert_eq!(got[1].entry, Entry::parse("#1"));
    }
}
