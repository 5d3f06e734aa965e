use alloy::primitives::{Address, Bytes, TxKind, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use alloy_consensus::TxLegacy;

use crate::config::{Config, TokenMethod};
use crate::eth::CallRequest;

sol! {
    interface SimpleToken {
        function mintTo(address to, uint256 amount) external;
        function transfer(address to, uint256 amount) external returns (bool);
        function transferLoop(uint256 n, address to, uint256 amount) external;
        function balanceOf(address owner) external view returns (uint256);
    }
}

/// Fee parameters read from the node once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeParams {
    pub chain_id: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
}

/// What every submission does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Workload {
    /// Plain value transfer of `value` wei to the receiver.
    Native { value: U256 },
    /// A call into the token contract crediting the receiver.
    Token { address: Address, method: TokenMethod, amount: U256, multiplier: U256 },
    /// Caller supplied skeletons, cycled by sender id.
    Raw(Vec<RawPayload>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPayload {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

impl Workload {
    pub fn from_config(config: &Config) -> Self {
        if !config.payloads.is_empty() {
            return Workload::Raw(
                config
                    .payloads
                    .iter()
                    .map(|p| RawPayload { to: p.to, data: p.data.clone(), value: U256::from(p.value) })
                    .collect(),
            );
        }

        match config.token.address {
            Some(address) => Workload::Token {
                address,
                method: config.token.method,
                amount: U256::from(config.token.amount),
                multiplier: U256::from(config.token.transfer_multiplier),
            },
            None => Workload::Native { value: U256::from(config.run.native_value) },
        }
    }

    /// Call target, calldata and value for one transfer from sender `id` to `receiver`.
    pub fn call_parts(&self, id: usize, receiver: Address) -> (Address, Bytes, U256) {
        match self {
            Workload::Native { value } => (receiver, Bytes::new(), *value),
            Workload::Token { address, method, amount, multiplier } => {
                let input = match method {
                    TokenMethod::MintTo => SimpleToken::mintToCall { to: receiver, amount: *amount }.abi_encode(),
                    TokenMethod::Transfer => SimpleToken::transferCall { to: receiver, amount: *amount }.abi_encode(),
                    TokenMethod::TransferLoop => {
                        SimpleToken::transferLoopCall { n: *multiplier, to: receiver, amount: *amount }.abi_encode()
                    }
                };
                (*address, input.into(), U256::ZERO)
            }
            Workload::Raw(payloads) => {
                let payload = &payloads[id % payloads.len()];
                (payload.to, payload.data.clone(), payload.value)
            }
        }
    }

    pub fn template(&self, id: usize, receiver: Address, fees: FeeParams) -> TxTemplate {
        let (to, input, value) = self.call_parts(id, receiver);
        TxTemplate { to, input, value, fees }
    }

    /// A call request matching sender `from`'s template, for gas estimation.
    pub fn probe(&self, from: Address, receiver: Address, gas_price: u128) -> CallRequest {
        let (to, data, value) = self.call_parts(0, receiver);
        CallRequest { from: Some(from), to, data, value: Some(value), gas_price: Some(U256::from(gas_price)) }
    }

    /// How much one accepted submission credits its receiver, if that can be known.
    pub fn delta_per_tx(&self) -> Option<U256> {
        match self {
            Workload::Native { value } => Some(*value),
            Workload::Token { method: TokenMethod::TransferLoop, amount, multiplier, .. } => {
                Some(amount.saturating_mul(*multiplier))
            }
            Workload::Token { amount, .. } => Some(*amount),
            Workload::Raw(_) => None,
        }
    }

    /// The token contract whose balances move, if any.
    pub fn token(&self) -> Option<Address> {
        match self {
            Workload::Token { address, .. } => Some(*address),
            _ => None,
        }
    }

    /// Whether senders must hold tokens for their submissions to succeed.
    pub fn spends_sender_tokens(&self) -> bool {
        matches!(self, Workload::Token { method: TokenMethod::Transfer | TokenMethod::TransferLoop, .. })
    }
}

/// Reusable skeleton for one sender/receiver pair. Only the nonce varies per send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxTemplate {
    pub to: Address,
    pub input: Bytes,
    pub value: U256,
    pub fees: FeeParams,
}

impl TxTemplate {
    pub fn with_nonce(&self, nonce: u64) -> TxLegacy {
        TxLegacy {
            chain_id: Some(self.fees.chain_id),
            nonce,
            gas_price: self.fees.gas_price,
            gas_limit: self.fees.gas_limit,
            to: TxKind::Call(self.to),
            value: self.value,
            input: self.input.clone(),
        }
    }
}

pub fn balance_of_call(token: Address, owner: Address) -> CallRequest {
    CallRequest { to: token, data: SimpleToken::balanceOfCall { owner }.abi_encode().into(), ..Default::default() }
}

pub fn mint_to_call(to: Address, amount: U256) -> Bytes {
    SimpleToken::mintToCall { to, amount }.abi_encode().into()
}
