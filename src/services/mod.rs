pub mod badges;
pub mod balance;
pub mod chain_sync;
pub mod ledger;
pub mod payments;
pub mod payout;
pub mod reconciler;

pub use badges::BadgeService;
pub use balance::BalanceService;
pub use chain_sync::ChainSynchronizer;
pub use ledger::{LedgerService, MarkOutcome};
pub use payments::PaymentService;
pub use payout::PayoutService;
pub use reconciler::WebhookReconciler;
