//! Parked-request / parked-waiter pairing for the four message classes.
//!
//! Each class lives in its own typed family behind its own mutex. An
//! arriving RPC either completes a parked waiter or parks itself; a local
//! operation either consumes a parked request or parks a waiter. For every
//! rendezvous key at most one parked request and at most one waiter exist
//! at a time; a tensor step mismatch between the two sides is a hard
//! `DataLoss` error surfaced to both.

use std::collections::HashMap;
use std::sync::Mutex;

use efl_proto::channel as pb;
use efl_types::{CoordError, CoordResult};
use tokio::sync::oneshot;

/// Reader cursor shipped through the reader-state rendezvous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderState {
    /// Shard identifier of the current block.
    pub block_id: String,

    /// Records already consumed within the block.
    pub offset: i64,
}

/// An in-flight `SendMessage` RPC waiting for the local receiver.
pub struct ParkedSend {
    request: pb::MessageRequest,
    reply: oneshot::Sender<CoordResult<()>>,
}

impl ParkedSend {
    /// The step the sender attached to this tensor.
    pub fn step(&self) -> u64 {
        self.request.step
    }

    /// Consumes the parked call, answering the sender and yielding the
    /// payload.
    pub fn finish(self, result: CoordResult<()>) -> Vec<u8> {
        let _ = self.reply.send(result);
        self.request.payload
    }
}

/// An in-flight `GetReaderState` RPC waiting for the local responder.
pub struct ParkedReader {
    reply: oneshot::Sender<CoordResult<ReaderState>>,
}

impl ParkedReader {
    /// Answers the requesting peer.
    pub fn finish(self, result: CoordResult<ReaderState>) {
        let _ = self.reply.send(result);
    }
}

/// An in-flight `GetCheckpointVersion` RPC.
pub struct ParkedCkpt {
    reply: oneshot::Sender<CoordResult<String>>,
}

impl ParkedCkpt {
    /// Answers the requesting peer with the local checkpoint version.
    pub fn finish(self, result: CoordResult<String>) {
        let _ = self.reply.send(result);
    }
}

/// An in-flight `Connect` RPC.
pub struct ParkedConnect {
    reply: oneshot::Sender<CoordResult<()>>,
}

impl ParkedConnect {
    /// Answers the connecting peer.
    pub fn finish(self, result: CoordResult<()>) {
        let _ = self.reply.send(result);
    }
}

/// Outcome of claiming a rendezvous from the local side: either a request
/// is already parked, or the caller must wait for the next arrival.
pub enum Claim<T> {
    /// A parked request was consumed.
    Ready(T),

    /// No request parked; resolves on the next arrival.
    Wait(oneshot::Receiver<T>),
}

impl<T> std::fmt::Debug for Claim<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Claim::Ready(_) => f.write_str("Claim::Ready(..)"),
            Claim::Wait(_) => f.write_str("Claim::Wait(..)"),
        }
    }
}

struct SendFamily {
    // One slot per registered tensor name; unknown names are rejected.
    slots: HashMap<String, Option<ParkedSend>>,
    // At most one waiting receiver per name, with its expected step.
    waiters: HashMap<String, (u64, oneshot::Sender<ParkedSend>)>,
}

struct ReaderFamily {
    slots: HashMap<String, Option<ParkedReader>>,
    waiters: HashMap<String, oneshot::Sender<ParkedReader>>,
}

struct Singleton<T> {
    slot: Option<T>,
    waiter: Option<oneshot::Sender<T>>,
}

impl<T> Singleton<T> {
    fn new() -> Self {
        Self {
            slot: None,
            waiter: None,
        }
    }

    fn offer(&mut self, parked: T) {
        match self.waiter.take() {
            Some(waiter) => {
                if let Err(parked) = waiter.send(parked) {
                    // Waiter gave up (deadline); park for the next one.
                    self.slot = Some(parked);
                }
            }
            None => self.slot = Some(parked),
        }
    }

    fn claim(&mut self) -> Claim<T> {
        match self.slot.take() {
            Some(parked) => Claim::Ready(parked),
            None => {
                let (tx, rx) = oneshot::channel();
                self.waiter = Some(tx);
                Claim::Wait(rx)
            }
        }
    }
}

/// The four typed rendezvous families of one communicator.
pub struct Rendezvous {
    send: Mutex<SendFamily>,
    reader: Mutex<ReaderFamily>,
    ckpt: Mutex<Singleton<ParkedCkpt>>,
    connect: Mutex<Singleton<ParkedConnect>>,
}

impl Rendezvous {
    /// Creates the families, seeding one empty slot per tensor name and
    /// per dataset name.
    pub fn new(tensor_names: &[String], dataset_names: &[String]) -> Self {
        Self {
            send: Mutex::new(SendFamily {
                slots: tensor_names
                    .iter()
                    .map(|n| (n.clone(), None))
                    .collect(),
                waiters: HashMap::new(),
            }),
            reader: Mutex::new(ReaderFamily {
                slots: dataset_names
                    .iter()
                    .map(|n| (n.clone(), None))
                    .collect(),
                waiters: HashMap::new(),
            }),
            ckpt: Mutex::new(Singleton::new()),
            connect: Mutex::new(Singleton::new()),
        }
    }

    /// Routes an arriving `SendMessage` request. Resolves once the local
    /// receiver consumes the tensor (or immediately on a routing error).
    pub async fn offer_send(&self, request: pb::MessageRequest) -> CoordResult<()> {
        let (tx, rx) = oneshot::channel();
        let name = request.name.clone();
        let step = request.step;
        let parked = ParkedSend { request, reply: tx };
        {
            let mut family = self.send.lock().expect("send family poisoned");
            let family = &mut *family;
            let parked = match family.waiters.get(&name) {
                Some(&(expected, _)) if expected != step => {
                    // A receiver is already waiting for a different step on
                    // this rendezvous key: the peers are out of sync.
                    let err = CoordError::data_loss(format!(
                        "tensor named {name} expects step {expected}, but given step {step}"
                    ));
                    if let Some((_, waiter)) = family.waiters.remove(&name) {
                        drop(waiter);
                    }
                    parked.finish(Err(err.clone()));
                    return Err(err);
                }
                Some(_) => {
                    let (_, waiter) = family
                        .waiters
                        .remove(&name)
                        .expect("send waiter vanished under lock");
                    match waiter.send(parked) {
                        Ok(()) => None,
                        // Receiver timed out between parking and now.
                        Err(parked) => Some(parked),
                    }
                }
                None => Some(parked),
            };
            if let Some(parked) = parked {
                match family.slots.get_mut(&name) {
                    Some(slot) => {
                        if let Some(displaced) = slot.replace(parked) {
                            displaced.finish(Err(CoordError::internal(format!(
                                "tensor named {name} replaced by a newer request"
                            ))));
                        }
                    }
                    None => {
                        return Err(CoordError::not_found(format!(
                            "tensor named {name} not registered"
                        )));
                    }
                }
            }
        }
        rx.await
            .unwrap_or_else(|_| Err(CoordError::internal("send rendezvous dropped")))
    }

    /// Claims the tensor parked under `name` for the receiver expecting
    /// `step`. A parked request with a different step is answered
    /// `DataLoss` and the same error is returned locally.
    pub fn claim_send(&self, name: &str, step: u64) -> CoordResult<Claim<ParkedSend>> {
        let mut family = self.send.lock().expect("send family poisoned");
        let family = &mut *family;
        match family.slots.get_mut(name) {
            None => Err(CoordError::invalid_argument(format!(
                "tensor named {name} not registered"
            ))),
            Some(slot) => match slot.take() {
                Some(parked) if parked.step() == step => Ok(Claim::Ready(parked)),
                Some(parked) => {
                    let err = CoordError::data_loss(format!(
                        "tensor named {name} expects step {step}, but given step {}",
                        parked.step()
                    ));
                    parked.finish(Err(err.clone()));
                    Err(err)
                }
                None => {
                    let (tx, rx) = oneshot::channel();
                    // A stale waiter (deadline already surfaced) is simply
                    // replaced; its receiver is gone.
                    family.waiters.insert(name.to_string(), (step, tx));
                    Ok(Claim::Wait(rx))
                }
            },
        }
    }

    /// Routes an arriving `GetReaderState` request.
    pub async fn offer_reader(&self, name: &str) -> CoordResult<ReaderState> {
        let (tx, rx) = oneshot::channel();
        let parked = ParkedReader { reply: tx };
        {
            let mut family = self.reader.lock().expect("reader family poisoned");
            let family = &mut *family;
            let parked = match family.waiters.remove(name) {
                Some(waiter) => match waiter.send(parked) {
                    Ok(()) => None,
                    Err(parked) => Some(parked),
                },
                None => Some(parked),
            };
            if let Some(parked) = parked {
                match family.slots.get_mut(name) {
                    Some(slot) => {
                        if let Some(displaced) = slot.replace(parked) {
                            displaced.finish(Err(CoordError::internal(format!(
                                "dataset named {name} replaced by a newer request"
                            ))));
                        }
                    }
                    None => {
                        return Err(CoordError::not_found(format!(
                            "dataset named {name} not registered"
                        )));
                    }
                }
            }
        }
        rx.await
            .unwrap_or_else(|_| Err(CoordError::internal("reader rendezvous dropped")))
    }

    /// Claims the parked reader-state request for `name`, or waits for the
    /// next one. Used by both the responder and the terminator.
    pub fn claim_reader(&self, name: &str) -> CoordResult<Claim<ParkedReader>> {
        let mut family = self.reader.lock().expect("reader family poisoned");
        let family = &mut *family;
        match family.slots.get_mut(name) {
            None => Err(CoordError::invalid_argument(format!(
                "dataset named {name} not registered"
            ))),
            Some(slot) => match slot.take() {
                Some(parked) => Ok(Claim::Ready(parked)),
                None => {
                    let (tx, rx) = oneshot::channel();
                    family.waiters.insert(name.to_string(), tx);
                    Ok(Claim::Wait(rx))
                }
            },
        }
    }

    /// Routes an arriving `GetCheckpointVersion` request.
    pub async fn offer_ckpt(&self) -> CoordResult<String> {
        let (tx, rx) = oneshot::channel();
        {
            let mut family = self.ckpt.lock().expect("ckpt family poisoned");
            family.offer(ParkedCkpt { reply: tx });
        }
        rx.await
            .unwrap_or_else(|_| Err(CoordError::internal("ckpt rendezvous dropped")))
    }

    /// Claims the parked checkpoint-version request, or waits.
    pub fn claim_ckpt(&self) -> Claim<ParkedCkpt> {
        self.ckpt.lock().expect("ckpt family poisoned").claim()
    }

    /// Routes an arriving `Connect` request.
    pub async fn offer_connect(&self) -> CoordResult<()> {
        let (tx, rx) = oneshot::channel();
        {
            let mut family = self.connect.lock().expect("connect family poisoned");
            family.offer(ParkedConnect { reply: tx });
        }
        rx.await
            .unwrap_or_else(|_| Err(CoordError::internal("connect rendezvous dropped")))
    }

    /// Claims the parked connect request, or waits for it.
    pub fn claim_connect(&self) -> Claim<ParkedConnect> {
        self.connect.lock().expect("connect family poisoned").claim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use efl_types::ErrorKind;
    use std::time::Duration;

    fn rendezvous() -> Rendezvous {
        Rendezvous::new(&["x".to_string()], &["train".to_string()])
    }

    fn request(name: &str, step: u64, payload: &[u8]) -> pb::MessageRequest {
        pb::MessageRequest {
            payload: payload.to_vec(),
            name: name.to_string(),
            step,
        }
    }

    #[tokio::test]
    async fn send_parks_until_receiver_claims() {
        let r = std::sync::Arc::new(rendezvous());
        let sender = {
            let r = std::sync::Arc::clone(&r);
            tokio::spawn(async move { r.offer_send(request("x", 3, b"aaa")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        match r.claim_send("x", 3).unwrap() {
            Claim::Ready(parked) => {
                assert_eq!(parked.step(), 3);
                let payload = parked.finish(Ok(()));
                assert_eq!(&payload[..], b"aaa");
            }
            Claim::Wait(_) => panic!("expected a parked request"),
        }
        sender.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn receiver_waits_until_send_arrives() {
        let r = std::sync::Arc::new(rendezvous());
        let rx = match r.claim_send("x", 3).unwrap() {
            Claim::Wait(rx) => rx,
            Claim::Ready(_) => panic!("nothing should be parked"),
        };
        let sender = {
            let r = std::sync::Arc::clone(&r);
            tokio::spawn(async move { r.offer_send(request("x", 3, b"bbb")).await })
        };
        let parked = rx.await.unwrap();
        assert_eq!(&parked.finish(Ok(()))[..], b"bbb");
        sender.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn step_mismatch_on_claim_is_data_loss() {
        let r = std::sync::Arc::new(rendezvous());
        let sender = {
            let r = std::sync::Arc::clone(&r);
            tokio::spawn(async move { r.offer_send(request("x", 5, b"ccc")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = r.claim_send("x", 4).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DataLoss);
        // The parked sender is answered with the same error.
        let send_err = sender.await.unwrap().unwrap_err();
        assert_eq!(send_err.kind, ErrorKind::DataLoss);
    }

    #[tokio::test]
    async fn step_mismatch_against_pending_waiter_is_data_loss() {
        let r = rendezvous();
        let _rx = match r.claim_send("x", 4).unwrap() {
            Claim::Wait(rx) => rx,
            Claim::Ready(_) => panic!("nothing should be parked"),
        };
        let err = r.offer_send(request("x", 5, b"ddd")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::DataLoss);
    }

    #[tokio::test]
    async fn unregistered_name_is_not_found_for_sender() {
        let r = rendezvous();
        let err = r.offer_send(request("y", 1, b"eee")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn unregistered_name_is_invalid_argument_for_receiver() {
        let r = rendezvous();
        let err = r.claim_send("y", 1).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn reader_state_round_trip() {
        let r = std::sync::Arc::new(rendezvous());
        let asker = {
            let r = std::sync::Arc::clone(&r);
            tokio::spawn(async move { r.offer_reader("train").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        match r.claim_reader("train").unwrap() {
            Claim::Ready(parked) => parked.finish(Ok(ReaderState {
                block_id: "b1".into(),
                offset: 7,
            })),
            Claim::Wait(_) => panic!("expected a parked request"),
        }
        let state = asker.await.unwrap().unwrap();
        assert_eq!(state.block_id, "b1");
        assert_eq!(state.offset, 7);
    }

    #[tokio::test]
    async fn terminated_reader_observes_out_of_range() {
        let r = std::sync::Arc::new(rendezvous());
        let asker = {
            let r = std::sync::Arc::clone(&r);
            tokio::spawn(async move { r.offer_reader("train").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        match r.claim_reader("train").unwrap() {
            Claim::Ready(parked) => {
                parked.finish(Err(CoordError::out_of_range("reader state out of range")));
            }
            Claim::Wait(_) => panic!("expected a parked request"),
        }
        let err = asker.await.unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::OutOfRange);
    }

    #[tokio::test]
    async fn connect_first_arrival_parks() {
        let r = std::sync::Arc::new(rendezvous());
        let peer = {
            let r = std::sync::Arc::clone(&r);
            tokio::spawn(async move { r.offer_connect().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        match r.claim_connect() {
            Claim::Ready(parked) => parked.finish(Ok(())),
            Claim::Wait(_) => panic!("expected a parked connect"),
        }
        peer.await.unwrap().unwrap();
    }
}
