//! Cadence Core - Campaign send orchestration engine
//!
//! This crate provides the campaign state machine, the self-scheduling tick
//! dispatcher, rate gating, snapshot building and outbound delivery.

pub mod campaign;
pub mod clock;
pub mod metrics;
pub mod queue;
pub mod sender;

pub use campaign::{
    CampaignError, CampaignManager, CampaignResult, EngineOptions, RateGate, SnapshotBuilder,
    TemplateRenderer, TickDispatcher, TickOutcome,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use metrics::EngineMetrics;
pub use queue::{ChannelTickScheduler, JobTickScheduler, TickLoop, TickRequest, TickScheduler, TickWorker};
pub use sender::{DryRunSender, MailSender, OutgoingMessage, SendError, SendReceipt, SmtpSender};
