use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use super::supervisor::RunSupervisor;
use crate::{
    config::Config,
    events::Bus,
    producer::ProducerRef,
    store::StoreRef,
    subscribers::{Subscribe, SubscriberSet},
    transport::TransportRef,
};

/// Builder for a [`RunSupervisor`] with optional observers.
pub struct RunSupervisorBuilder {
    cfg: Config,
    transport: TransportRef,
    store: StoreRef,
    producer: ProducerRef,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl RunSupervisorBuilder {
    pub fn new(cfg: Config, transport: TransportRef, store: StoreRef, producer: ProducerRef) -> Self {
        Self {
            cfg,
            transport,
            store,
            producer,
            subscribers: Vec::new(),
        }
    }

    /// Sets lifecycle event subscribers.
    ///
    /// Subscribers receive runtime events (retries, truncation, persistence,
    /// cleanup failures) through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the supervisor.
    ///
    /// With subscribers, the fan-out task and subscriber workers are spawned
    /// on the current Tokio runtime, so this must then be called inside one.
    pub fn build(self) -> Arc<RunSupervisor> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        if !self.subscribers.is_empty() {
            let subs = SubscriberSet::new(self.subscribers, bus.clone());
            fan_out(&bus, subs);
        }

        Arc::new(RunSupervisor::new_internal(
            self.cfg,
            self.transport,
            self.store,
            self.producer,
            bus,
        ))
    }
}

/// Forwards every bus event to the subscriber set until the bus closes.
fn fan_out(bus: &Bus, subs: SubscriberSet) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ev) => subs.emit_arc(Arc::new(ev)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber fan-out lagged behind the bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
        subs.shutdown().await;
    });
}
