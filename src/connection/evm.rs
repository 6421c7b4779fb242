// Copyright 2024 Bridge Relay Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! The EVM implementation of [`Connection`], built on an ethers provider
//! with a local signing wallet. Contract surface is kept to the minimal
//! bridge bindings the relay needs: the deposit event, proposal execution
//! and the executed-proposal query backing the writer's idempotence guard.

use std::sync::Arc;
use std::time::Duration;

use ethers::contract::abigen;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, BlockNumber, H256, U256};

use super::{Connection, DepositEvent, NonceAllocator, TxStatus};
use crate::config::ChainConfig;
use crate::error::{Error, EvmClient, Result};
use crate::types::{ChainId, DepositNonce, Proposal, ResourceId};

abigen!(
    BridgeContract,
    r#"[
        event Deposit(uint8 indexed destinationChainId, bytes32 indexed resourceId, uint64 indexed depositNonce, address depositer, bytes data)
        function executeProposal(uint8 sourceChainId, uint64 depositNonce, bytes data, bytes32 resourceId)
        function isProposalExecuted(uint8 sourceChainId, uint64 depositNonce) view returns (bool)
    ]"#
);

/// A connection to one EVM chain's RPC endpoint, holding the signing
/// client, the bridge binding and the relayer's nonce allocator.
pub struct EvmConnection {
    chain_id: ChainId,
    client: Arc<EvmClient>,
    bridge: BridgeContract<EvmClient>,
    address: Address,
    nonces: NonceAllocator,
    block_confirmations: u64,
    gas_bump_percent: u64,
    explorer: Option<url::Url>,
}

impl std::fmt::Debug for EvmConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmConnection")
            .field("chain_id", &self.chain_id)
            .field("address", &self.address)
            .finish()
    }
}

impl EvmConnection {
    /// Connects to the chain, verifies the bridge contract is actually
    /// deployed, and seeds the nonce allocator from the pending account
    /// nonce.
    ///
    /// Fails fast on an unreachable endpoint or a code-less bridge
    /// address; both are configuration errors and the chain must not
    /// start.
    pub async fn connect(cfg: &ChainConfig) -> Result<Self> {
        let provider = Provider::<Http>::try_from(cfg.http_endpoint.as_str())?
            .interval(Duration::from_millis(100));
        let wallet = LocalWallet::from_bytes(cfg.private_key.as_bytes())?
            .with_chain_id(cfg.network_id);
        let address = wallet.address();
        let client = Arc::new(SignerMiddleware::new(provider, wallet));

        let code = client.get_code(cfg.bridge, None).await?;
        if code.is_empty() {
            return Err(Error::MissingBytecode {
                address: cfg.bridge,
            });
        }

        let base_nonce = client
            .get_transaction_count(address, Some(BlockNumber::Pending.into()))
            .await?
            .as_u64();
        let bridge = BridgeContract::new(cfg.bridge, client.clone());

        tracing::debug!(
            chain_id = %cfg.chain_id,
            relayer = ?address,
            base_nonce,
            "connected to chain"
        );

        Ok(Self {
            chain_id: cfg.chain_id,
            client,
            bridge,
            address,
            nonces: NonceAllocator::new(base_nonce),
            block_confirmations: cfg.block_confirmations,
            gas_bump_percent: cfg.proposals.gas_bump_percent,
            explorer: cfg.explorer.clone(),
        })
    }

    fn log_submitted(&self, tx_hash: H256) {
        if let Some(mut url) = self.explorer.clone() {
            url.set_path(&format!("tx/{:#x}", tx_hash));
            tracing::info!("Tx {} is submitted and pending!", url);
        } else {
            tracing::info!("Tx {:#x} is submitted and pending!", tx_hash);
        }
    }
}

#[async_trait::async_trait]
impl Connection for EvmConnection {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    fn relayer_address(&self) -> Address {
        self.address
    }

    fn nonces(&self) -> &NonceAllocator {
        &self.nonces
    }

    async fn current_height(&self) -> Result<u64> {
        Ok(self.client.get_block_number().await?.as_u64())
    }

    async fn fetch_deposits(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<DepositEvent>> {
        let found = self
            .bridge
            .deposit_filter()
            .from_block(from)
            .to_block(to)
            .query_with_meta()
            .await?;
        let deposits = found
            .into_iter()
            .map(|(event, meta)| DepositEvent {
                block_number: meta.block_number.as_u64(),
                log_index: meta.log_index.as_u64(),
                destination: ChainId(event.destination_chain_id),
                resource_id: ResourceId::from(event.resource_id),
                deposit_nonce: DepositNonce(event.deposit_nonce),
                data: event.data.to_vec(),
            })
            .collect();
        Ok(deposits)
    }

    async fn submit_proposal(
        &self,
        proposal: &Proposal,
        nonce: u64,
        attempt: u32,
    ) -> Result<H256> {
        let call = self.bridge.execute_proposal(
            proposal.source.0,
            proposal.deposit_nonce.0,
            proposal.data.clone().into(),
            proposal.resource_id.to_fixed_bytes(),
        );
        let mut tx = call.tx;
        // replacement transactions need a higher fee than what they
        // replace, so each attempt bumps the gas price.
        let base_gas_price = self.client.get_gas_price().await?;
        let bump = U256::from(
            100 + self.gas_bump_percent * u64::from(attempt.saturating_sub(1)),
        );
        tx.set_nonce(nonce);
        tx.set_gas_price(base_gas_price * bump / U256::from(100));
        let pending = self.client.send_transaction(tx, None).await?;
        let tx_hash = *pending;
        self.log_submitted(tx_hash);
        Ok(tx_hash)
    }

    async fn transaction_status(&self, tx_hash: H256) -> Result<TxStatus> {
        let maybe_receipt =
            self.client.get_transaction_receipt(tx_hash).await?;
        match maybe_receipt {
            Some(receipt) => {
                if receipt.status == Some(0u64.into()) {
                    return Ok(TxStatus::Reverted);
                }
                let head = self.client.get_block_number().await?.as_u64();
                let mined = receipt
                    .block_number
                    .map(|b| b.as_u64())
                    .unwrap_or(head);
                if head >= mined + self.block_confirmations {
                    Ok(TxStatus::Confirmed)
                } else {
                    Ok(TxStatus::Pending)
                }
            }
            None => {
                let known =
                    self.client.get_transaction(tx_hash).await?.is_some();
                if known {
                    Ok(TxStatus::Pending)
                } else {
                    Ok(TxStatus::Dropped)
                }
            }
        }
    }

    async fn proposal_executed(
        &self,
        source: ChainId,
        deposit_nonce: DepositNonce,
    ) -> Result<bool> {
        let executed = self
            .bridge
            .is_proposal_executed(source.0, deposit_nonce.0)
            .call()
            .await?;
        Ok(executed)
    }

    async fn chain_nonce(&self) -> Result<u64> {
        let nonce = self
            .client
            .get_transaction_count(
                self.address,
                Some(BlockNumber::Pending.into()),
            )
            .await?;
        Ok(nonce.as_u64())
    }
}
