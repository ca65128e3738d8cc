//! Rollback bookkeeping
//!
//! A `RollbackLedger` records every side effect an operation makes so a
//! failed operation can be undone. Rolling back never fails: problems are
//! downgraded to warnings in the returned `RollbackReport`.

mod ledger;
mod report;
mod set_aside;

pub use ledger::{RollbackContext, RollbackLedger};
pub use report::RollbackReport;
pub use set_aside::SetAside;
