// Copyright 2024 Bridge Relay Contributors
// SPDX-License-Identifier: Apache-2.0

use ethers::contract::ContractError;
use ethers::middleware::signer::SignerMiddlewareError;
use ethers::providers::{Http, Provider, ProviderError};
use ethers::signers::{LocalWallet, WalletError};

use crate::types::{ChainId, DepositNonce, ResourceId};

/// The signing client every EVM connection is built on.
pub type EvmClient =
    ethers::middleware::SignerMiddleware<Provider<Http>, LocalWallet>;

/// An enum of all possible errors that could be encountered during the
/// execution of the relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Config loading error.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// Error while parsing the config files.
    #[error("Config parse error: {}", _0)]
    ParseConfig(#[from] serde_path_to_error::Error<config::ConfigError>),
    /// Error while iterating over a glob pattern.
    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),
    /// Error while parsing a URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),
    /// Error in Http Provider (ethers client).
    #[error(transparent)]
    EthersProvider(#[from] ProviderError),
    /// Smart contract error.
    #[error(transparent)]
    EthersContract(#[from] ContractError<EvmClient>),
    /// Error from the signing middleware while submitting a transaction.
    #[error(transparent)]
    EthersSigner(#[from] SignerMiddlewareError<Provider<Http>, LocalWallet>),
    /// Wallet construction error.
    #[error(transparent)]
    EthersWallet(#[from] WalletError),
    /// Sled database error.
    #[error(transparent)]
    Sled(#[from] sled::Error),
    /// A configured contract address holds no deployed bytecode.
    #[error("No bytecode found at {}, wrong address or undeployed contract", address)]
    MissingBytecode {
        /// The configured contract address.
        address: ethers::types::Address,
    },
    /// A second writer was registered for the same destination chain.
    #[error("Duplicate route registration for chain {}", chain_id)]
    DuplicateRoute {
        /// The destination chain id.
        chain_id: ChainId,
    },
    /// No writer is registered for a message's destination chain.
    #[error("No route registered for destination chain {}", chain_id)]
    UnknownDestination {
        /// The destination chain id.
        chain_id: ChainId,
    },
    /// A route exists but its writer has hung up.
    #[error("Route for destination chain {} is closed", chain_id)]
    RouteClosed {
        /// The destination chain id.
        chain_id: ChainId,
    },
    /// A deposit references a resource id this relay is not configured for.
    #[error("Unsupported resource id {}", resource_id)]
    UnsupportedResource {
        /// The offending resource id.
        resource_id: ResourceId,
    },
    /// A deposit's payload bytes did not match its resource's wire format.
    #[error("Invalid deposit payload: {}", reason)]
    InvalidPayload {
        /// Why decoding failed.
        reason: &'static str,
    },
    /// A proposal exhausted its submission attempts and was given up on.
    #[error(
        "Proposal abandoned after {} attempts: source chain {}, destination \
         chain {}, deposit nonce {}",
        attempts,
        source_chain,
        destination,
        deposit_nonce
    )]
    ProposalAbandoned {
        /// The origin chain of the deposit.
        ///
        /// Not named `source`; thiserror reserves that name for error
        /// chaining.
        source_chain: ChainId,
        /// The chain the proposal was destined for.
        destination: ChainId,
        /// The deposit nonce identifying the lost message.
        deposit_nonce: DepositNonce,
        /// How many submissions were made before giving up.
        attempts: u32,
    },
}

/// A type alias for the result of the relay, that uses the `Error` enum.
pub type Result<T> = std::result::Result<T, Error>;
