mod account;
mod ledger;

pub use account::QuotaAccountDao;
pub use ledger::QuotaLedgerDao;
