//! Solidity ABI of the TipJar ledger.
//!
//! Selectors, event topics and error encodings generated here are bit-exact with the
//! deployed contract. The ledger uses them to encode logs and reverts, the indexer to
//! decode logs, and clients to build calldata.

use alloy_sol_types::sol;

sol! {
    /// TipJar contract interface.
    #[derive(Debug, PartialEq, Eq)]
    interface ITipJar {
        /// Emitted once for every accepted tip.
        event TipSent(
            address indexed sender,
            address indexed recipient,
            uint256 amount,
            uint256 fee,
            uint256 netAmount,
            uint256 timestamp
        );

        /// Emitted after `TipSent` by `tipWithMessage`, in the same transaction.
        event TipMessage(
            address indexed sender,
            address indexed recipient,
            string message
        );

        /// Recipient (or protocol fee recipient at deployment) is the zero address.
        error InvalidRecipient();

        /// Tip value is below `MIN_TIP_AMOUNT`.
        error TipTooSmall();

        /// Message exceeds the configured byte cap.
        error MessageTooLong(uint256 length, uint256 maxLength);

        /// A value transfer to the fee recipient or the creator failed.
        error TransferFailed();

        function tip(address recipient) external payable;
        function tipWithMessage(address recipient, string message) external payable;
        function calculateFee(uint256 amount) external pure returns (uint256 fee, uint256 netAmount);
        function getCreatorStats(address creator) external view returns (uint256 totalTips, uint256 tipCount);
        function PROTOCOL_FEE_BPS() external view returns (uint256);
        function BPS_DENOMINATOR() external view returns (uint256);
        function MIN_TIP_AMOUNT() external view returns (uint256);
        function protocolFeeRecipient() external view returns (address);
        function globalTipCount() external view returns (uint256);
    }
}
