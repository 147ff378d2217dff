//! TLS-ALPN protocol middleware.
//!
//! After the handshake the negotiated protocol decides the rest of the
//! connection: `h2` transports go to a per-destination [`MuxManager`] that
//! later connects to the same `host:port` reuse, anything else serves a
//! single request/response directly.
//!
//! The manager table is keyed by `host:port` and mutated only from
//! context-scheduled code. A key holds either a live manager or a pending
//! marker while a handshake is in flight; connects that find the marker
//! suspend until it resolves, then either reuse the installed manager or
//! dial for themselves.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::client::{Connection, Connector, Destination};
use crate::error::HttpError;
use crate::metrics;
use crate::mux::MuxManager;
use crate::tls::{NegotiatedProtocol, TlsEngine, alpn_preferences, handshake};

/// Factory producing one TLS engine per dialed destination.
pub type EngineFactory = Box<dyn Fn(&str, u16) -> Result<Box<dyn TlsEngine>, HttpError>>;

enum Slot {
    /// A manager whose transport is (or was) alive.
    Live(MuxManager),
    /// A handshake is in flight; wakers to fire when it resolves.
    Pending(Vec<Waker>),
}

type ManagerTable = Rc<RefCell<HashMap<String, Slot>>>;

enum Claim {
    Reuse(MuxManager),
    Wait,
    Dial,
}

/// Handshake-then-branch connect stage.
pub struct AlpnMiddleware {
    engines: EngineFactory,
    managers: ManagerTable,
}

impl AlpnMiddleware {
    /// Create the middleware around an engine factory.
    pub fn new(engines: EngineFactory) -> Self {
        AlpnMiddleware {
            engines,
            managers: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    /// Establish a connection to `dest`, reusing a live manager when one
    /// exists for the destination key.
    pub async fn connect(
        &self,
        connector: &Connector,
        dest: &Destination,
    ) -> Result<Connection, HttpError> {
        let key = dest.key();
        loop {
            match self.claim(&key) {
                Claim::Reuse(manager) => {
                    metrics::MANAGER_REUSES.increment();
                    let stream = manager.open_stream()?;
                    return Ok(Connection::mux(dest, stream));
                }
                Claim::Wait => {
                    SlotWait {
                        managers: self.managers.clone(),
                        key: key.clone(),
                    }
                    .await;
                }
                Claim::Dial => break,
            }
        }
        match self.dial(connector, dest, &key).await {
            Ok(connection) => Ok(connection),
            Err(e) => {
                // Release the pending marker so waiters dial for
                // themselves instead of hanging on our failure.
                self.resolve(&key, None);
                Err(e)
            }
        }
    }

    /// Number of live managers in the table.
    pub fn live_managers(&self) -> usize {
        self.managers
            .borrow()
            .values()
            .filter(|slot| matches!(slot, Slot::Live(m) if m.is_alive()))
            .count()
    }

    /// The live manager for a destination, if one exists.
    pub fn manager_for(&self, dest: &Destination) -> Option<MuxManager> {
        match self.managers.borrow().get(&dest.key()) {
            Some(Slot::Live(manager)) if manager.is_alive() => Some(manager.clone()),
            _ => None,
        }
    }

    /// Inspect the slot for `key` and either claim a reusable manager,
    /// join an in-flight handshake, or mark the key pending and dial.
    fn claim(&self, key: &str) -> Claim {
        let mut table = self.managers.borrow_mut();
        match table.get(key) {
            Some(Slot::Live(manager)) if manager.is_alive() => {
                return Claim::Reuse(manager.clone());
            }
            // Dead manager still in the table: redial below.
            Some(Slot::Live(_)) => {}
            Some(Slot::Pending(_)) => return Claim::Wait,
            None => {}
        }
        table.insert(key.to_string(), Slot::Pending(Vec::new()));
        Claim::Dial
    }

    async fn dial(
        &self,
        connector: &Connector,
        dest: &Destination,
        key: &str,
    ) -> Result<Connection, HttpError> {
        let mut transport = connector(&dest.host, dest.port).await?;
        let mut engine = (self.engines)(&dest.host, dest.port)?;
        engine.set_alpn_preferences(&alpn_preferences());
        metrics::HANDSHAKES.increment();
        handshake(engine.as_mut(), &mut *transport).await?;

        match engine.negotiated() {
            NegotiatedProtocol::Http2 => {
                let manager = MuxManager::new(transport);
                metrics::MANAGERS_OPENED.increment();

                let table = Rc::downgrade(&self.managers);
                let evict_key = key.to_string();
                manager.on_close(move || {
                    if let Some(table) = table.upgrade() {
                        let mut table = table.borrow_mut();
                        if matches!(table.get(&evict_key), Some(Slot::Live(_))) {
                            table.remove(&evict_key);
                        }
                    }
                });

                let stream = manager.open_stream()?;
                self.resolve(key, Some(manager));
                Ok(Connection::mux(dest, stream))
            }
            protocol => {
                self.resolve(key, None);
                Ok(Connection::direct(dest, protocol, transport))
            }
        }
    }

    /// Replace the pending marker with `manager` (or nothing) and wake
    /// every connect that was waiting on the handshake.
    fn resolve(&self, key: &str, manager: Option<MuxManager>) {
        let waiters = {
            let mut table = self.managers.borrow_mut();
            let waiters = match table.remove(key) {
                Some(Slot::Pending(waiters)) => waiters,
                _ => Vec::new(),
            };
            if let Some(manager) = manager {
                table.insert(key.to_string(), Slot::Live(manager));
            }
            waiters
        };
        for waker in waiters {
            waker.wake();
        }
    }
}

/// Resolves once the slot for `key` is no longer pending.
struct SlotWait {
    managers: ManagerTable,
    key: String,
}

impl Future for SlotWait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let mut table = this.managers.borrow_mut();
        match table.get_mut(&this.key) {
            Some(Slot::Pending(waiters)) => {
                if !waiters.iter().any(|w| w.will_wake(cx.waker())) {
                    waiters.push(cx.waker().clone());
                }
                Poll::Pending
            }
            _ => Poll::Ready(()),
        }
    }
}
