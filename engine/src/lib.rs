// Job scheduling and trigger-dispatch engine: time-based polling, inbound
// webhooks, file-change detection, manual/conversational invocation and
// completion chaining, funnelled through one execution path.

pub mod chain;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod errors;
pub mod models;
pub mod notify;
pub mod poller;
pub mod recurrence;
pub mod runner;
pub mod store;
pub mod telemetry;
pub mod watch;
pub mod webhook;
