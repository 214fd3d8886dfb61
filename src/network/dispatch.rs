//! Command handlers and the worker pool that runs them.
//!
//! The receive loop hands each datagram to a bounded queue; a fixed set of
//! worker threads decodes the command byte and runs the registered handler.
//! Handlers run concurrently with each other and never on the receive loop.

use crate::error::Result;
use crate::network::protocol::{decode_frame, Command};
use log::{debug, error, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

pub type Handler = Arc<dyn Fn(&[u8]) -> Result<()> + Send + Sync>;

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<Command, Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> HandlerRegistry {
        HandlerRegistry::default()
    }

    /// Install `handler`, returning whatever was registered before
    pub fn register(&self, command: Command, handler: Handler) -> Option<Handler> {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(command, handler)
    }

    pub fn get(&self, command: Command) -> Option<Handler> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&command)
            .cloned()
    }

    /// Decode and run one datagram. Nothing here propagates: bad frames,
    /// missing handlers and handler errors are logged and dropped.
    pub fn dispatch(&self, frame: &[u8], from: SocketAddr) {
        let (command, body) = match decode_frame(frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Dropping datagram from {from}: {e}");
                return;
            }
        };
        let Some(handler) = self.get(command) else {
            debug!("No handler for {command} from {from}");
            return;
        };
        debug!("Do action {command} from {from} ({} bytes)", body.len());
        if let Err(e) = handler(body) {
            error!("{command} from {from} failed: {e}");
        }
    }
}

pub struct Datagram {
    pub from: SocketAddr,
    pub frame: Vec<u8>,
}

pub struct WorkerPool {
    sender: Option<SyncSender<Datagram>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize, capacity: usize, registry: Arc<HandlerRegistry>) -> WorkerPool {
        let (sender, receiver) = mpsc::sync_channel::<Datagram>(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..size.max(1))
            .map(|id| {
                let receiver = Arc::clone(&receiver);
                let registry = Arc::clone(&registry);
                thread::spawn(move || Self::work(id, receiver, registry))
            })
            .collect();

        WorkerPool {
            sender: Some(sender),
            workers,
        }
    }

    fn work(id: usize, receiver: Arc<Mutex<Receiver<Datagram>>>, registry: Arc<HandlerRegistry>) {
        loop {
            let next = receiver
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .recv();
            match next {
                Ok(datagram) => registry.dispatch(&datagram.frame, datagram.from),
                Err(_) => break,
            }
        }
        debug!("Worker {id} stopped");
    }

    /// Queue a datagram without blocking; returns false if it was dropped
    pub fn submit(&self, datagram: Datagram) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        match sender.try_send(datagram) {
            Ok(()) => true,
            Err(TrySendError::Full(datagram)) => {
                warn!("Handler queue full, dropping datagram from {}", datagram.from);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // closing the channel lets every worker drain and exit
        self.sender.take();
        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                error!("Handler worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BlockchainError;
    use crate::network::protocol::encode_frame;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn from() -> SocketAddr {
        "127.0.0.1:9".parse().unwrap()
    }

    #[test]
    fn test_register_returns_previous() {
        let registry = HandlerRegistry::new();
        let first: Handler = Arc::new(|_| Ok(()));
        assert!(registry.register(Command::NewBlock, first).is_none());

        let second: Handler = Arc::new(|_| Err(BlockchainError::MiningBusy));
        let previous = registry.register(Command::NewBlock, second).unwrap();
        assert!(previous(b"").is_ok());
        assert!(registry.get(Command::NewBlock).unwrap()(b"").is_err());
    }

    #[test]
    fn test_dispatch_routes_body() {
        let registry = HandlerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry.register(
            Command::MiningRequest,
            Arc::new(move |body| {
                sink.lock().unwrap().push(body.to_vec());
                Ok(())
            }),
        );

        registry.dispatch(&encode_frame(Command::MiningRequest, b"data"), from());
        // unset slot, unknown code and empty frame are all ignored
        registry.dispatch(&encode_frame(Command::DelPeer, b"x"), from());
        registry.dispatch(&[99, 1], from());
        registry.dispatch(&[], from());

        assert_eq!(*seen.lock().unwrap(), vec![b"data".to_vec()]);
    }

    #[test]
    fn test_handler_error_is_contained() {
        let registry = HandlerRegistry::new();
        registry.register(
            Command::NewBlock,
            Arc::new(|_| Err(BlockchainError::Decode("bad".to_string()))),
        );
        registry.dispatch(&encode_frame(Command::NewBlock, b"{"), from());
    }

    #[test]
    fn test_pool_runs_every_job_before_shutdown() {
        let registry = Arc::new(HandlerRegistry::new());
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        registry.register(
            Command::AddPeer,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        let pool = WorkerPool::new(3, 64, Arc::clone(&registry));
        for _ in 0..20 {
            assert!(pool.submit(Datagram {
                from: from(),
                frame: encode_frame(Command::AddPeer, b"{}"),
            }));
        }
        drop(pool);
        assert_eq!(count.load(Ordering::SeqCst), 20);
    }
}
