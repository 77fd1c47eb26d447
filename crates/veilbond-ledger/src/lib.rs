pub mod ledger;
pub mod reputation;
pub mod settlement;

pub use ledger::{BondLedger, LedgerConfig};
pub use reputation::{required_bond_amount, ReputationStore};
pub use settlement::{
    AuthorityProvider, MemorySettlement, ReleaseDestination, SettlementLedger, StaticAuthority,
};
