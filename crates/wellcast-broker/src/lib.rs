//! `wellcast-broker`: task queue access for the Wellcast scheduler.
//!
//! The [`Broker`] traits describe everything the rest of the system needs
//! from the message broker: list queues ([`QueueBroker`]) and the worker
//! control plane ([`WorkerControl`]). Two backends implement them:
//!
//! | Backend         | Use                                            |
//! |-----------------|------------------------------------------------|
//! | [`RedisBroker`] | Production; Celery-compatible list queues      |
//! | [`MemoryBroker`]| Single-process setups and tests                |
//!
//! On top sit the [`TaskDispatcher`] (enqueue by task name with routing)
//! and the [`Inspector`] (worker liveness, queue depth, pending preview).

pub mod broker;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod inspect;
pub mod memory;
pub mod redis_broker;

pub use broker::{Broker, QueueBroker, WorkerControl, WorkerReply};
pub use dispatch::{TaskDispatcher, TaskHandle};
pub use envelope::PeekedTask;
pub use error::{BrokerError, Result};
pub use inspect::{Inspector, WorkerRow, WorkersStatus};
pub use memory::MemoryBroker;
pub use redis_broker::RedisBroker;
