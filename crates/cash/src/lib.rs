//! Cash custody domain module (event-sourced).
//!
//! A cash session tracks one operator's drawer from open to close; movements
//! and settlement postings accumulate against it, remittances hand cash up
//! to a supervisor, and closing runs reconciliation and freezes the record.

pub mod reconciliation;
pub mod remittance;
pub mod session;

pub use reconciliation::{evaluate, evaluate_statement, ReconciliationReport};
pub use remittance::{
    AcceptRemittance, CreateRemittance, Remittance, RemittanceAccepted, RemittanceCommand,
    RemittanceCreated, RemittanceEvent, RemittanceId, RemittanceStatus,
};
pub use session::{
    CashMovement, CashSession, CloseSession, CustodyWithdrawn, MovementCategory, MovementRecorded,
    MovementType, OpenSession, PostSettlement, RecordMovement, SessionClosed, SessionCommand,
    SessionEvent, SessionId, SessionOpened, SessionStatus, SettlementPosted, TenderType,
    WithdrawCustody,
};
