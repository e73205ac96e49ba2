//! Contract bindings for the position manager and its pool tokens.
//!
//! Only the calls the rebalancer makes are declared. Calldata is encoded
//! with [`SolCall::abi_encode`] and sent through the signer, so the
//! interfaces carry no `#[sol(rpc)]` instance types.

use alloy::primitives::{aliases::I24, aliases::U24, Address, Bytes, U256};
use alloy::sol;
use alloy::sol_types::SolCall;

use crate::error::ChainError;

sol! {
    /// Uniswap V3 NonfungiblePositionManager (subset).
    interface INonfungiblePositionManager {
        struct MintParams {
            address token0;
            address token1;
            uint24 fee;
            int24 tickLower;
            int24 tickUpper;
            uint256 amount0Desired;
            uint256 amount1Desired;
            uint256 amount0Min;
            uint256 amount1Min;
            address recipient;
            uint256 deadline;
        }

        struct DecreaseLiquidityParams {
            uint256 tokenId;
            uint128 liquidity;
            uint256 amount0Min;
            uint256 amount1Min;
            uint256 deadline;
        }

        struct CollectParams {
            uint256 tokenId;
            address recipient;
            uint128 amount0Max;
            uint128 amount1Max;
        }

        function balanceOf(address owner) external view returns (uint256);
        function tokenOfOwnerByIndex(address owner, uint256 index) external view returns (uint256);
        function positions(uint256 tokenId) external view returns (
            uint96 nonce,
            address operator,
            address token0,
            address token1,
            uint24 fee,
            int24 tickLower,
            int24 tickUpper,
            uint128 liquidity,
            uint256 feeGrowthInside0LastX128,
            uint256 feeGrowthInside1LastX128,
            uint128 tokensOwed0,
            uint128 tokensOwed1
        );
        function mint(MintParams calldata params) external payable returns (
            uint256 tokenId,
            uint128 liquidity,
            uint256 amount0,
            uint256 amount1
        );
        function decreaseLiquidity(DecreaseLiquidityParams calldata params) external payable returns (uint256 amount0, uint256 amount1);
        function collect(CollectParams calldata params) external payable returns (uint256 amount0, uint256 amount1);
    }

    /// ERC-20 (subset).
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }
}

/// Arguments for a new position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintRequest {
    pub token0: Address,
    pub token1: Address,
    pub fee: u32,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub amount0_desired: U256,
    pub amount1_desired: U256,
    pub recipient: Address,
    pub deadline: u64,
}

pub fn encode_mint(request: &MintRequest) -> Result<Bytes, ChainError> {
    let params = INonfungiblePositionManager::MintParams {
        token0: request.token0,
        token1: request.token1,
        fee: U24::from(request.fee & 0xFF_FFFF),
        tickLower: to_i24(request.tick_lower)?,
        tickUpper: to_i24(request.tick_upper)?,
        amount0Desired: request.amount0_desired,
        amount1Desired: request.amount1_desired,
        amount0Min: U256::ZERO,
        amount1Min: U256::ZERO,
        recipient: request.recipient,
        deadline: U256::from(request.deadline),
    };
    Ok(INonfungiblePositionManager::mintCall { params }.abi_encode().into())
}

pub fn encode_decrease_liquidity(token_id: U256, liquidity: u128, deadline: u64) -> Bytes {
    INonfungiblePositionManager::decreaseLiquidityCall {
        params: INonfungiblePositionManager::DecreaseLiquidityParams {
            tokenId: token_id,
            liquidity,
            amount0Min: U256::ZERO,
            amount1Min: U256::ZERO,
            deadline: U256::from(deadline),
        },
    }
    .abi_encode()
    .into()
}

/// Collect everything owed to `recipient`.
pub fn encode_collect_all(token_id: U256, recipient: Address) -> Bytes {
    INonfungiblePositionManager::collectCall {
        params: INonfungiblePositionManager::CollectParams {
            tokenId: token_id,
            recipient,
            amount0Max: u128::MAX,
            amount1Max: u128::MAX,
        },
    }
    .abi_encode()
    .into()
}

pub fn encode_approve(spender: Address, amount: U256) -> Bytes {
    IERC20::approveCall { spender, amount }.abi_encode().into()
}

fn to_i24(tick: i32) -> Result<I24, ChainError> {
    I24::try_from(tick).map_err(|_| ChainError::Decode(format!("tick {tick} does not fit int24")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_encoding_round_trips_ticks() {
        let request = MintRequest {
            token0: Address::repeat_byte(1),
            token1: Address::repeat_byte(2),
            fee: 3000,
            tick_lower: -199_980,
            tick_upper: -199_620,
            amount0_desired: U256::from(10u64).pow(U256::from(18u64)),
            amount1_desired: U256::from(3_000_000_000u64),
            recipient: Address::repeat_byte(3),
            deadline: 1_700_000_000,
        };
        let data = encode_mint(&request).unwrap();
        assert!(data.starts_with(&INonfungiblePositionManager::mintCall::SELECTOR));

        let decoded = INonfungiblePositionManager::mintCall::abi_decode(&data, true).unwrap();
        assert_eq!(decoded.params.tickLower, I24::try_from(-199_980).unwrap());
        assert_eq!(decoded.params.fee.to::<u32>(), 3000);
        assert_eq!(decoded.params.amount0Min, U256::ZERO);
    }

    #[test]
    fn test_tick_out_of_int24_range() {
        assert!(to_i24(8_388_608).is_err());
        assert!(to_i24(887_272).is_ok());
    }

    #[test]
    fn test_collect_requests_everything() {
        let data = encode_collect_all(U256::from(42u64), Address::repeat_byte(9));
        let decoded = INonfungiblePositionManager::collectCall::abi_decode(&data, true).unwrap();
        assert_eq!(decoded.params.amount0Max, u128::MAX);
        assert_eq!(decoded.params.amount1Max, u128::MAX);
        assert_eq!(decoded.params.tokenId, U256::from(42u64));
    }
}
