/// Process settings: node, delivery, flush schedule, logging.
pub mod config;
/// Pause, flush and resume of delivery on a schedule or on command.
pub mod control;
/// Background delivery threads consuming a dispatch queue.
pub mod delivery;
/// Flexible logging (formatting, filters, sinks).
pub mod logging;
/// In-process pub/sub: Node, Subscriber, Message.
pub mod pubsub;
/// Callback queues: work items, subscription buffers, dispatch queue.
pub mod queue;
/// Shutdown signal handling.
pub mod signals;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// config
pub use config::Settings;
/// Controller and its command channel.
pub use control::{command_channel, ControlCommand, Controller, ControllerHandle, FlushSchedule};
/// Delivery worker.
pub use delivery::{DeliveryWorker, WorkerConfig, WorkerStats};
/// Logging entry point.
pub use logging::{init_logging, LoggingConfig, LoggingHandle};
/// Pub/Sub API.
pub use pubsub::{Message, Node, Subscriber};
/// Queue types.
pub use queue::{
    CallbackSource, DispatchQueue, DispatchStats, DrainReport, RemovalKey, SubscriptionId,
    SubscriptionQueue, WorkItem,
};
/// Error types shared with `spindle-error`.
pub use spindle_error::{
    DispatchError, HandlerError, HandlerResult, SettingsError, SpindleResult, StackError,
    StatusCode, WorkerError,
};
