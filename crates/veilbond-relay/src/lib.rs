pub mod delivery;
pub mod evidence;
pub mod rate_limit;
pub mod receipt;
pub mod relay;

pub use delivery::{DeliveryChannel, NullDelivery};
pub use evidence::{EvidenceConfig, EvidenceStore};
pub use rate_limit::{RateLimitConfig, RateLimitDecision, RateLimiter};
pub use receipt::{Receipt, ReceiptIssuer, ReceiptRole};
pub use relay::{EngagementKind, ForwardResult, InboundMessage, Relay, RelayConfig};
