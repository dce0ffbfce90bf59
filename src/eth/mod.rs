//! Ethereum primitives used to authorize x402 payments

pub mod eip712;
pub mod network;
pub mod signer;

pub use eip712::{Eip712Domain, TransferWithAuthorization};
pub use network::Network;
pub use signer::{EvmSigner, Signer, SignerError, recover_address};
