//! Contract bindings used across the workspace.
//!
//! Only the slice of each ABI that the distribution flow touches is declared:
//! Safe reads and execution, ERC20 transfers and the MultiSendCallOnly batcher.

use alloy::primitives::{b256, B256};
use alloy::sol;

sol! {
	/// Safe v1.3 / v1.4.1 surface.
	#[sol(rpc)]
	interface ISafe {
		function execTransaction(
			address to,
			uint256 value,
			bytes calldata data,
			uint8 operation,
			uint256 safeTxGas,
			uint256 baseGas,
			uint256 gasPrice,
			address gasToken,
			address payable refundReceiver,
			bytes memory signatures
		) external payable returns (bool success);

		function nonce() external view returns (uint256);

		function getThreshold() external view returns (uint256);

		function getOwners() external view returns (address[] memory);

		function getTransactionHash(
			address to,
			uint256 value,
			bytes calldata data,
			uint8 operation,
			uint256 safeTxGas,
			uint256 baseGas,
			uint256 gasPrice,
			address gasToken,
			address refundReceiver,
			uint256 _nonce
		) external view returns (bytes32);

		event ExecutionSuccess(bytes32 indexed txHash, uint256 payment);
		event ExecutionFailure(bytes32 indexed txHash, uint256 payment);
	}

	#[sol(rpc)]
	interface IERC20 {
		function transfer(address to, uint256 amount) external returns (bool);
		function balanceOf(address account) external view returns (uint256);
	}

	/// Batches calls; rejects any entry that is not a plain `Call`.
	#[sol(rpc)]
	interface IMultiSendCallOnly {
		function multiSend(bytes memory transactions) external payable;
	}
}

/// keccak256("SafeTx(address to,uint256 value,bytes data,uint8 operation,uint256 safeTxGas,uint256 baseGas,uint256 gasPrice,address gasToken,address refundReceiver,uint256 nonce)")
pub const SAFE_TX_TYPEHASH: B256 =
	b256!("bb8310d486368db6bd6f849402fdd73ad53d316b5a4b2644ad6efe0f941286d8");

/// keccak256("EIP712Domain(uint256 chainId,address verifyingContract)")
pub const DOMAIN_SEPARATOR_TYPEHASH: B256 =
	b256!("47e79534a245952e8b16893a336b85a3d9ea9fa8c573f3d803afb92a79469218");

pub const SAFE_TX_TYPE: &str = "SafeTx(address to,uint256 value,bytes data,uint8 operation,uint256 safeTxGas,uint256 baseGas,uint256 gasPrice,address gasToken,address refundReceiver,uint256 nonce)";

pub const DOMAIN_TYPE: &str = "EIP712Domain(uint256 chainId,address verifyingContract)";

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::keccak256;

	#[test]
	fn typehashes_match_type_strings() {
		assert_eq!(keccak256(SAFE_TX_TYPE), SAFE_TX_TYPEHASH);
		assert_eq!(keccak256(DOMAIN_TYPE), DOMAIN_SEPARATOR_TYPEHASH);
	}
}
