//! `ethers`-backed `ChainAdapter`: `Provider<Http>` plus precomputed
//! `keccak256` topic hashes for event filtering, wired up with
//! `lazy_static!`.

use std::sync::Arc;

use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::LocalWallet;
use ethers_core::abi::{self, Token};
use ethers_core::types::{
    Address, BlockNumber, Bytes, Filter, TransactionRequest, H256, U256, U64,
};
use ethers_core::utils::keccak256;
use lazy_static::lazy_static;
use log::warn;

use ms_common::ids::ChannelId;
use ms_common::Hash32;

use super::adapter::{Call, ChainAdapter, ReceiptStatus};
use super::error::ChainError;
use super::events::Event;

lazy_static! {
    static ref CHANNEL_OPENED_TOPIC: H256 = H256::from(keccak256(
        "ChannelOpened(uint256,address,address,uint256)"
    ));
    static ref CHANNEL_CLOSED_TOPIC: H256 =
        H256::from(keccak256("ChannelClosed(uint256,address,uint256)"));
    static ref NON_CLOSING_UPDATE_TOPIC: H256 = H256::from(keccak256(
        "NonClosingBalanceProofUpdated(uint256,address,uint256)"
    ));
    static ref CHANNEL_SETTLED_TOPIC: H256 = H256::from(keccak256("ChannelSettled(uint256)"));
    static ref NEW_BALANCE_PROOF_TOPIC: H256 = H256::from(keccak256(
        "NewBalanceProofReceived(address,uint256,uint256,uint256,address,address)"
    ));
    static ref REWARD_CLAIMED_TOPIC: H256 =
        H256::from(keccak256("RewardClaimed(address,uint256,bytes32)"));
}

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

pub struct EthersChainAdapter {
    provider: Provider<Http>,
    client: Arc<SignerClient>,
    monitoring_service_address: Address,
    user_deposit_address: Address,
}

impl EthersChainAdapter {
    pub fn new(
        rpc_url: &str,
        private_key: &str,
        chain_id: u64,
        monitoring_service_address: Address,
        user_deposit_address: Address,
    ) -> Result<Self, ChainError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| ChainError::MalformedLog(format!("invalid rpc url: {e}")))?;
        let wallet: LocalWallet = private_key.parse::<LocalWallet>()?.with_chain_id(chain_id);
        let client = Arc::new(SignerMiddleware::new(provider.clone(), wallet));
        Ok(Self {
            provider,
            client,
            monitoring_service_address,
            user_deposit_address,
        })
    }

    fn decode_log(log: &ethers_core::types::Log) -> Result<Option<Event>, ChainError> {
        let topic0 = match log.topics.first() {
            Some(t) => *t,
            None => return Ok(None),
        };
        let block_number = log
            .block_number
            .ok_or_else(|| ChainError::MalformedLog("log missing block number".into()))?
            .as_u64();
        let token_network_address = log.address;

        if topic0 == *CHANNEL_OPENED_TOPIC {
            let tokens = abi::decode(
                &[
                    abi::ParamType::Uint(256),
                    abi::ParamType::Address,
                    abi::ParamType::Address,
                    abi::ParamType::Uint(256),
                ],
                &log.data,
            )?;
            let [cid, p1, p2, settle_timeout] = take4(tokens)?;
            return Ok(Some(Event::ChannelOpened {
                token_network_address,
                channel_identifier: ChannelId(as_u256(cid)?),
                participant1: as_address(p1)?,
                participant2: as_address(p2)?,
                settle_timeout: as_u256(settle_timeout)?.as_u64(),
                block_number,
            }));
        }

        if topic0 == *CHANNEL_CLOSED_TOPIC {
            let tokens = abi::decode(
                &[
                    abi::ParamType::Uint(256),
                    abi::ParamType::Address,
                    abi::ParamType::Uint(256),
                ],
                &log.data,
            )?;
            let [cid, closing_participant, _nonce] = take3(tokens)?;
            return Ok(Some(Event::ChannelClosed {
                token_network_address,
                channel_identifier: ChannelId(as_u256(cid)?),
                closing_participant: as_address(closing_participant)?,
                block_number,
            }));
        }

        if topic0 == *NON_CLOSING_UPDATE_TOPIC {
            let tokens = abi::decode(
                &[
                    abi::ParamType::Uint(256),
                    abi::ParamType::Address,
                    abi::ParamType::Uint(256),
                ],
                &log.data,
            )?;
            let [cid, closing_participant, nonce] = take3(tokens)?;
            return Ok(Some(Event::NonClosingBalanceProofUpdated {
                token_network_address,
                channel_identifier: ChannelId(as_u256(cid)?),
                closing_participant: as_address(closing_participant)?,
                nonce: as_u256(nonce)?.as_u64(),
                block_number,
            }));
        }

        if topic0 == *CHANNEL_SETTLED_TOPIC {
            let tokens = abi::decode(&[abi::ParamType::Uint(256)], &log.data)?;
            let cid = tokens
                .into_iter()
                .next()
                .ok_or_else(|| ChainError::MalformedLog("ChannelSettled missing args".into()))?;
            return Ok(Some(Event::ChannelSettled {
                token_network_address,
                channel_identifier: ChannelId(as_u256(cid)?),
                block_number,
            }));
        }

        if topic0 == *NEW_BALANCE_PROOF_TOPIC {
            let tokens = abi::decode(
                &[
                    abi::ParamType::Address,
                    abi::ParamType::Uint(256),
                    abi::ParamType::Uint(256),
                    abi::ParamType::Uint(256),
                    abi::ParamType::Address,
                    abi::ParamType::Address,
                ],
                &log.data,
            )?;
            let [tn, cid, reward, nonce, ms_address, raiden_node] = take6(tokens)?;
            return Ok(Some(Event::MonitorNewBalanceProof {
                token_network_address: as_address(tn)?,
                channel_identifier: ChannelId(as_u256(cid)?),
                reward_amount: as_u256(reward)?,
                nonce: as_u256(nonce)?.as_u64(),
                ms_address: as_address(ms_address)?,
                raiden_node_address: as_address(raiden_node)?,
                block_number,
            }));
        }

        if topic0 == *REWARD_CLAIMED_TOPIC {
            let tokens = abi::decode(
                &[
                    abi::ParamType::Address,
                    abi::ParamType::Uint(256),
                    abi::ParamType::FixedBytes(32),
                ],
                &log.data,
            )?;
            let [ms_address, amount, reward_identifier] = take3(tokens)?;
            let bytes = reward_identifier
                .into_fixed_bytes()
                .ok_or_else(|| ChainError::MalformedLog("reward_identifier not bytes32".into()))?;
            return Ok(Some(Event::MonitorRewardClaimed {
                ms_address: as_address(ms_address)?,
                amount: as_u256(amount)?,
                reward_identifier: Hash32::from_slice(&bytes),
                block_number,
            }));
        }

        Err(ChainError::UnknownTopic(topic0, log.address))
    }
}

fn take3(tokens: Vec<Token>) -> Result<[Token; 3], ChainError> {
    tokens
        .try_into()
        .map_err(|_| ChainError::MalformedLog("unexpected arity".into()))
}

fn take4(tokens: Vec<Token>) -> Result<[Token; 4], ChainError> {
    tokens
        .try_into()
        .map_err(|_| ChainError::MalformedLog("unexpected arity".into()))
}

fn take6(tokens: Vec<Token>) -> Result<[Token; 6], ChainError> {
    tokens
        .try_into()
        .map_err(|_| ChainError::MalformedLog("unexpected arity".into()))
}

fn as_address(token: Token) -> Result<Address, ChainError> {
    token
        .into_address()
        .ok_or_else(|| ChainError::MalformedLog("expected address".into()))
}

fn as_u256(token: Token) -> Result<U256, ChainError> {
    token
        .into_uint()
        .ok_or_else(|| ChainError::MalformedLog("expected uint256".into()))
}

fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature);
    [hash[0], hash[1], hash[2], hash[3]]
}

fn encode_call(signature: &str, tokens: &[Token]) -> Bytes {
    let mut data = selector(signature).to_vec();
    data.extend(abi::encode(tokens));
    Bytes::from(data)
}

fn call_calldata(call: &Call) -> Bytes {
    match call {
        Call::Monitor {
            signer,
            non_closing_signer,
            balance_hash,
            nonce,
            additional_hash,
            closing_signature,
            non_closing_signature,
            reward_amount,
            token_network,
            reward_proof_signature,
        } => encode_call(
            "monitor(address,address,bytes32,uint256,bytes32,bytes,bytes,uint256,address,bytes)",
            &[
                Token::Address(*signer),
                Token::Address(*non_closing_signer),
                Token::FixedBytes(balance_hash.as_bytes().to_vec()),
                Token::Uint(U256::from(*nonce)),
                Token::FixedBytes(additional_hash.as_bytes().to_vec()),
                Token::Bytes(closing_signature.0.to_vec()),
                Token::Bytes(non_closing_signature.0.to_vec()),
                Token::Uint(*reward_amount),
                Token::Address(*token_network),
                Token::Bytes(reward_proof_signature.0.to_vec()),
            ],
        ),
        Call::ClaimReward {
            channel_identifier,
            token_network,
            signer,
            non_closing_signer,
        } => encode_call(
            "claimReward(uint256,address,address,address)",
            &[
                Token::Uint(channel_identifier.0),
                Token::Address(*token_network),
                Token::Address(*signer),
                Token::Address(*non_closing_signer),
            ],
        ),
    }
}

#[async_trait]
impl ChainAdapter for EthersChainAdapter {
    async fn poll(&self, from_block: u64, to_block: u64) -> Result<Vec<Event>, ChainError> {
        if from_block > to_block {
            return Ok(Vec::new());
        }

        let token_network_filter = Filter::new()
            .from_block(BlockNumber::Number(U64::from(from_block)))
            .to_block(BlockNumber::Number(U64::from(to_block)))
            .topic0(vec![
                *CHANNEL_OPENED_TOPIC,
                *CHANNEL_CLOSED_TOPIC,
                *NON_CLOSING_UPDATE_TOPIC,
                *CHANNEL_SETTLED_TOPIC,
            ]);
        let monitoring_filter = Filter::new()
            .from_block(BlockNumber::Number(U64::from(from_block)))
            .to_block(BlockNumber::Number(U64::from(to_block)))
            .address(self.monitoring_service_address)
            .topic0(vec![*NEW_BALANCE_PROOF_TOPIC, *REWARD_CLAIMED_TOPIC]);

        let mut logs = self.provider.get_logs(&token_network_filter).await?;
        logs.extend(self.provider.get_logs(&monitoring_filter).await?);
        logs.sort_by_key(|log| {
            (
                log.block_number.map(|n| n.as_u64()).unwrap_or_default(),
                log.log_index.map(|n| n.as_u64()).unwrap_or_default(),
            )
        });

        // A single undecodable log (unknown topic0 from a colliding
        // contract, unexpected calldata shape) must not sink the rest of
        // an already-fetched batch; only an RPC failure from `get_logs`
        // above aborts the whole poll.
        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            match Self::decode_log(log) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        "skipping undecodable log block={:?} index={:?} contract={:?}: {e}",
                        log.block_number, log.log_index, log.address
                    );
                }
            }
        }
        Ok(events)
    }

    async fn head_block(&self) -> Result<u64, ChainError> {
        Ok(self.provider.get_block_number().await?.as_u64())
    }

    async fn send_transaction(&self, call: Call) -> Result<Hash32, ChainError> {
        let to = match &call {
            Call::Monitor { .. } => self.monitoring_service_address,
            Call::ClaimReward { .. } => self.monitoring_service_address,
        };
        let tx = TransactionRequest::new().to(to).data(call_calldata(&call));
        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(|e| ChainError::Submission(format!("{call:?}: {e}")))?;
        Ok(*pending)
    }

    async fn receipt_status(&self, tx_hash: Hash32) -> Result<ReceiptStatus, ChainError> {
        match self.provider.get_transaction_receipt(tx_hash).await? {
            None => Ok(ReceiptStatus::Pending),
            Some(receipt) => match receipt.status {
                Some(status) if status == U64::from(1) => Ok(ReceiptStatus::Confirmed),
                _ => Ok(ReceiptStatus::Reverted),
            },
        }
    }

    async fn effective_balance(&self, address: Address) -> Result<U256, ChainError> {
        let calldata = encode_call("effectiveBalance(address)", &[Token::Address(address)]);
        let tx = TransactionRequest::new()
            .to(self.user_deposit_address)
            .data(calldata);
        let result = self.provider.call(&tx.into(), None).await?;
        abi::decode(&[abi::ParamType::Uint(256)], &result)?
            .into_iter()
            .next()
            .and_then(Token::into_uint)
            .ok_or_else(|| ChainError::MalformedLog("effectiveBalance: empty result".into()))
    }
}
