//! Minimal ABI bindings for the contracts the engine talks to.

use alloy::sol;

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function decimals() external view returns (uint8);
        function symbol() external view returns (string);
        function name() external view returns (string);
    }

    #[allow(missing_docs)]
    #[sol(rpc)]
    contract ISponsoredFaucet {
        /// One claim per recipient, enforced on-chain
        function hasClaimed(address account) external view returns (bool);
        /// Sponsor-paid claim on behalf of a recipient
        function claimFor(address recipient) external;
    }
}
