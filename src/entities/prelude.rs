#![allow(unused_imports)]

pub use super::faucet_claim::Entity as FaucetClaim;
pub use super::gate::Entity as Gate;
pub use super::membership::Entity as Membership;
pub use super::user::Entity as User;
pub use super::wallet_address::Entity as WalletAddress;
