#![forbid(unsafe_code)]

pub mod audit;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod cooldown;
pub mod engine;
pub mod error;
pub mod guardian;
pub mod notification;
pub mod outbox;
pub mod proposal;
pub mod scanner;
pub mod store;

pub use audit::{
    AuditAction, AuditEntry, AuditRecorder, ChainVerification, ChainedEntry,
    InMemoryAuditRecorder, LoggingAuditRecorder,
};
pub use classifier::{classify, classify_payload, Restrictiveness};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use cooldown::{CooldownGuard, CooldownStatus};
pub use engine::ConsentEngine;
pub use error::{Error, Result};
pub use guardian::{Guardian, GuardianDirectory, GuardianRole, InMemoryGuardianDirectory};
pub use notification::{
    AcknowledgmentProgressNotification, CoolingPeriodNotification, InMemorySender, LoggingSender,
    Notification, NotificationError, NotificationRecord, NotificationSender, NotificationService,
    NotificationStatus, ProposalCreatedNotification, ProposalResolvedNotification, RetryPolicy,
    WebhookSender,
};
pub use outbox::Outbox;
pub use proposal::{
    Acknowledgment, AgreementChange, ConsentProposal, ProposalPayload, ProposalStatus,
    ProtectionLevel, SettingKey, SettingValue, SubjectRules, SubjectType,
};
pub use scanner::ExpiryScanner;
pub use store::{InMemoryProposalStore, ProposalStore, RedbProposalStore, RedbStorage};
