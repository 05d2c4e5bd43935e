pub mod faucet_claim;
pub mod gate;
pub mod membership;
pub mod prelude;
pub mod user;
pub mod wallet_address;
