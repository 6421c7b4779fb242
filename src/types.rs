// Copyright 2024 Bridge Relay Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Canonical cross-chain types.
//!
//! A deposit observed on a source chain is translated into a [`Message`],
//! the value object that travels through the router. The message payload is
//! a tagged variant keyed by the resource's [`TransferKind`], so encoding
//! and decoding are exhaustive matches rather than positional lists.

use ethers::types::{H256, U256};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The bridge-level identifier of a chain.
///
/// This is the id the bridge contracts were deployed with, not the EVM
/// network chain id.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct ChainId(pub u8);

impl std::fmt::Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The source chain's monotonic sequence number for deposits.
///
/// `(source chain id, deposit nonce)` is the cross-chain idempotence key:
/// it is assigned once by the source bridge contract and never renumbered
/// by the relay.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct DepositNonce(pub u64);

impl std::fmt::Display for DepositNonce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 32-byte identifier naming an asset/handler pairing across chains.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct ResourceId(pub H256);

impl ResourceId {
    /// The raw 32 bytes, in the layout the bridge contracts expect.
    pub fn to_fixed_bytes(self) -> [u8; 32] {
        self.0.to_fixed_bytes()
    }
}

impl From<[u8; 32]> for ResourceId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(H256::from(bytes))
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0.as_bytes()))
    }
}

/// The transfer semantics a resource id is configured with.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum TransferKind {
    /// An ERC20-style value transfer.
    FungibleTransfer,
    /// An ERC721-style token transfer with optional token metadata.
    NonFungibleTransfer,
    /// An opaque call payload forwarded to a generic handler.
    GenericTransfer,
}

/// The typed payload of a [`Message`], one shape per [`TransferKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Move `amount` of the resource's asset to `recipient`.
    Fungible {
        /// Destination-chain recipient, in that chain's address encoding.
        recipient: Vec<u8>,
        /// Amount to credit, as a 256-bit integer.
        amount: U256,
    },
    /// Move one token (by id) of the resource's collection to `recipient`.
    NonFungible {
        /// Destination-chain recipient, in that chain's address encoding.
        recipient: Vec<u8>,
        /// The token id being moved.
        token_id: U256,
        /// Token metadata carried along with the transfer.
        metadata: Vec<u8>,
    },
    /// An opaque payload for the destination's generic handler.
    Generic {
        /// The raw call data.
        data: Vec<u8>,
    },
}

impl Payload {
    /// The transfer kind this payload belongs to.
    pub fn kind(&self) -> TransferKind {
        match self {
            Payload::Fungible { .. } => TransferKind::FungibleTransfer,
            Payload::NonFungible { .. } => TransferKind::NonFungibleTransfer,
            Payload::Generic { .. } => TransferKind::GenericTransfer,
        }
    }

    /// Encodes the payload into the bridge wire format.
    ///
    /// Fungible: `amount(32) + len(recipient)(32) + recipient`.
    /// Non-fungible: `token_id(32) + len(recipient)(32) + recipient +
    /// len(metadata)(32) + metadata`. Generic: `len(data)(32) + data`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Payload::Fungible { recipient, amount } => {
                out.extend_from_slice(&u256_bytes(*amount));
                out.extend_from_slice(&len_bytes(recipient));
                out.extend_from_slice(recipient);
            }
            Payload::NonFungible {
                recipient,
                token_id,
                metadata,
            } => {
                out.extend_from_slice(&u256_bytes(*token_id));
                out.extend_from_slice(&len_bytes(recipient));
                out.extend_from_slice(recipient);
                out.extend_from_slice(&len_bytes(metadata));
                out.extend_from_slice(metadata);
            }
            Payload::Generic { data } => {
                out.extend_from_slice(&len_bytes(data));
                out.extend_from_slice(data);
            }
        }
        out
    }

    /// Decodes raw deposit bytes according to the resource's kind.
    ///
    /// Fails with [`Error::InvalidPayload`] when the bytes do not match the
    /// wire format; the caller treats that as a per-item skip.
    pub fn decode(kind: TransferKind, data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let payload = match kind {
            TransferKind::FungibleTransfer => {
                let amount = cursor.read_u256()?;
                let recipient = cursor.read_len_prefixed()?;
                Payload::Fungible { recipient, amount }
            }
            TransferKind::NonFungibleTransfer => {
                let token_id = cursor.read_u256()?;
                let recipient = cursor.read_len_prefixed()?;
                let metadata = cursor.read_len_prefixed()?;
                Payload::NonFungible {
                    recipient,
                    token_id,
                    metadata,
                }
            }
            TransferKind::GenericTransfer => {
                let data = cursor.read_len_prefixed()?;
                Payload::Generic { data }
            }
        };
        cursor.finish()?;
        Ok(payload)
    }
}

/// The canonical cross-chain intent, created by a listener from a decoded
/// deposit event and consumed exactly once by the destination's writer.
///
/// Treated as an immutable value object after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The chain the deposit happened on.
    pub source: ChainId,
    /// The chain the deposit must be executed on.
    pub destination: ChainId,
    /// The source chain's sequence number for this deposit.
    pub deposit_nonce: DepositNonce,
    /// The resource the deposit refers to.
    pub resource_id: ResourceId,
    /// The typed transfer payload.
    pub payload: Payload,
}

/// A destination-call description derived from a [`Message`], ready to be
/// handed to a connection for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    /// The origin chain of the deposit being executed.
    pub source: ChainId,
    /// The deposit nonce being executed.
    pub deposit_nonce: DepositNonce,
    /// The resource the proposal executes against.
    pub resource_id: ResourceId,
    /// The encoded payload, in the bridge wire format.
    pub data: Vec<u8>,
}

impl Proposal {
    /// Builds the proposal for a message.
    pub fn from_message(msg: &Message) -> Self {
        Self {
            source: msg.source,
            deposit_nonce: msg.deposit_nonce,
            resource_id: msg.resource_id,
            data: msg.payload.encode(),
        }
    }
}

fn u256_bytes(value: U256) -> [u8; 32] {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    buf
}

fn len_bytes(slice: &[u8]) -> [u8; 32] {
    u256_bytes(U256::from(slice.len()))
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_u256(&mut self) -> Result<U256> {
        let end = self.pos.checked_add(32).ok_or(Error::InvalidPayload {
            reason: "length overflow",
        })?;
        let word =
            self.data.get(self.pos..end).ok_or(Error::InvalidPayload {
                reason: "truncated 32-byte word",
            })?;
        self.pos = end;
        Ok(U256::from_big_endian(word))
    }

    fn read_len_prefixed(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u256()?;
        if len > U256::from(self.data.len()) {
            return Err(Error::InvalidPayload {
                reason: "declared length exceeds payload",
            });
        }
        let len = len.as_usize();
        let end = self.pos.checked_add(len).ok_or(Error::InvalidPayload {
            reason: "length overflow",
        })?;
        let bytes =
            self.data.get(self.pos..end).ok_or(Error::InvalidPayload {
                reason: "truncated field",
            })?;
        self.pos = end;
        Ok(bytes.to_vec())
    }

    fn finish(self) -> Result<()> {
        if self.pos == self.data.len() {
            Ok(())
        } else {
            Err(Error::InvalidPayload {
                reason: "trailing bytes after payload",
            })
        }
    }
}
