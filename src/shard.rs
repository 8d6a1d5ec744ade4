//! Shard workers and the router that dispatches to them.
//!
//! Every shard is constructed on and exclusively owned by one OS thread.
//! The router hashes each key to its owning shard and sends a typed request
//! message over that shard's queue; the worker processes requests strictly
//! in arrival order and answers over a oneshot channel. No shard state ever
//! crosses a thread boundary, so shards need no locking of their own.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};
use std::thread;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::errinput;
use crate::error::{Error, Result};
use crate::hash;
use crate::storage::Storage;

/// A single partition of the key space. Methods take `&mut self`: the
/// owning worker is the only caller.
pub trait Shard: Send + 'static {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<()>;
    fn del(&mut self, key: &[u8]) -> Result<()>;
    fn query(&mut self, prefix: &[u8]) -> Result<BTreeSet<Vec<u8>>>;

    /// Flushes and releases shard resources. Called once, as the final
    /// operation the worker runs.
    fn close(&mut self) -> Result<()>;
}

/// A request to a shard worker, answered over the embedded oneshot.
enum Request {
    Get {
        key: Vec<u8>,
        reply: oneshot::Sender<Result<Option<Vec<u8>>>>,
    },
    Set {
        key: Vec<u8>,
        value: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    Del {
        key: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    Query {
        prefix: Vec<u8>,
        reply: oneshot::Sender<Result<BTreeSet<Vec<u8>>>>,
    },
    Close {
        reply: oneshot::Sender<Result<()>>,
    },
}

struct Worker {
    sender: mpsc::UnboundedSender<Request>,
    handle: thread::JoinHandle<()>,
}

/// Routes storage operations across N shard workers of one tier.
///
/// Per-key operations go to the single owning shard
/// (`stable_hash(key) % N`); `query` fans out to every shard and unions the
/// results; `start` and `stop` fan out to every shard. The router itself
/// implements [`Storage`], so a sharded tier plugs into the tiered database
/// like any other.
pub struct Router<S: Shard> {
    name: &'static str,
    shards: usize,
    factory: Arc<dyn Fn(usize) -> Result<S> + Send + Sync>,
    workers: RwLock<Vec<Worker>>,
}

impl<S: Shard> Router<S> {
    /// Creates a router over `shards` workers. The factory runs on each
    /// worker thread at `start`, so shard construction (e.g. opening and
    /// recovering a disk file) happens on the thread that will own it.
    pub fn new<F>(name: &'static str, shards: usize, factory: F) -> Self
    where
        F: Fn(usize) -> Result<S> + Send + Sync + 'static,
    {
        assert!(shards > 0, "shard count must be at least 1");
        Self {
            name,
            shards,
            factory: Arc::new(factory),
            workers: RwLock::new(Vec::new()),
        }
    }

    fn sender_for(&self, key: &[u8]) -> Result<mpsc::UnboundedSender<Request>> {
        let workers = self.workers.read()?;
        if workers.is_empty() {
            return Err(Error::Stopped);
        }
        let id = hash::shard_id(key, workers.len());
        Ok(workers[id].sender.clone())
    }

    fn all_senders(&self) -> Result<Vec<mpsc::UnboundedSender<Request>>> {
        let workers = self.workers.read()?;
        if workers.is_empty() {
            return Err(Error::Stopped);
        }
        Ok(workers.iter().map(|w| w.sender.clone()).collect())
    }
}

fn run_worker<S: Shard>(
    name: &'static str,
    id: usize,
    mut shard: S,
    mut requests: mpsc::UnboundedReceiver<Request>,
) {
    while let Some(request) = requests.blocking_recv() {
        match request {
            Request::Get { key, reply } => {
                let _ = reply.send(shard.get(&key));
            }
            Request::Set { key, value, reply } => {
                let _ = reply.send(shard.set(&key, value));
            }
            Request::Del { key, reply } => {
                let _ = reply.send(shard.del(&key));
            }
            Request::Query { prefix, reply } => {
                let _ = reply.send(shard.query(&prefix));
            }
            Request::Close { reply } => {
                let _ = reply.send(shard.close());
                break;
            }
        }
    }
    tracing::debug!(tier = name, shard = id, "shard worker exited");
}

#[async_trait]
impl<S: Shard> Storage for Router<S> {
    async fn start(&self) -> Result<()> {
        if !self.workers.read()?.is_empty() {
            return errinput!("{} router already started", self.name);
        }

        let mut spawned = Vec::with_capacity(self.shards);
        let mut ready = Vec::with_capacity(self.shards);
        for id in 0..self.shards {
            let (sender, receiver) = mpsc::unbounded_channel();
            let (ready_tx, ready_rx) = oneshot::channel();
            let factory = Arc::clone(&self.factory);
            let name = self.name;
            let handle = thread::Builder::new()
                .name(format!("{name}-shard-{id:03}"))
                .spawn(move || match factory(id) {
                    Ok(shard) => {
                        let _ = ready_tx.send(Ok(()));
                        run_worker(name, id, shard, receiver);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                })?;
            spawned.push(Worker { sender, handle });
            ready.push(ready_rx);
        }

        for rx in ready {
            rx.await.map_err(|_| Error::Stopped)??;
        }
        *self.workers.write()? = spawned;
        tracing::debug!(tier = self.name, shards = self.shards, "router started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let workers = std::mem::take(&mut *self.workers.write()?);
        if workers.is_empty() {
            return errinput!("{} router is not running", self.name);
        }

        let mut replies = Vec::with_capacity(workers.len());
        for worker in &workers {
            let (tx, rx) = oneshot::channel();
            worker
                .sender
                .send(Request::Close { reply: tx })
                .map_err(|_| Error::Stopped)?;
            replies.push(rx);
        }

        let mut result = Ok(());
        for rx in replies {
            if let Err(e) = rx.await.map_err(|_| Error::Stopped)? {
                result = Err(e);
            }
        }
        // Workers exit right after answering the close request, so the
        // joins are bounded.
        for worker in workers {
            if worker.handle.join().is_err() {
                result = Err(Error::Stopped);
            }
        }
        result
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let (tx, rx) = oneshot::channel();
        self.sender_for(key)?
            .send(Request::Get {
                key: key.to_vec(),
                reply: tx,
            })
            .map_err(|_| Error::Stopped)?;
        rx.await.map_err(|_| Error::Stopped)?
    }

    async fn set(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender_for(key)?
            .send(Request::Set {
                key: key.to_vec(),
                value,
                reply: tx,
            })
            .map_err(|_| Error::Stopped)?;
        rx.await.map_err(|_| Error::Stopped)?
    }

    async fn del(&self, key: &[u8]) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender_for(key)?
            .send(Request::Del {
                key: key.to_vec(),
                reply: tx,
            })
            .map_err(|_| Error::Stopped)?;
        rx.await.map_err(|_| Error::Stopped)?
    }

    async fn query(&self, prefix: &[u8]) -> Result<BTreeSet<Vec<u8>>> {
        // Fan out to every shard first, then reduce with set-union as the
        // replies come back.
        let mut replies = Vec::with_capacity(self.shards);
        for sender in self.all_senders()? {
            let (tx, rx) = oneshot::channel();
            sender
                .send(Request::Query {
                    prefix: prefix.to_vec(),
                    reply: tx,
                })
                .map_err(|_| Error::Stopped)?;
            replies.push(rx);
        }

        let mut matches = BTreeSet::new();
        for rx in replies {
            matches.extend(rx.await.map_err(|_| Error::Stopped)??);
        }
        Ok(matches)
    }
}
