//! The verify / settle / supported interface served over HTTP.
//!
//! Implementors validate payment payloads against requirements ([`Facilitator::verify`])
//! and execute on-chain transfers ([`Facilitator::settle`]).

use std::fmt::{Debug, Display};
use std::sync::Arc;

use crate::proto;

/// Asynchronous interface of an x402 payment facilitator.
///
/// Payment problems are reported inside the response values. `Err` is reserved for
/// conditions the caller cannot act on, plus aborted settlements, whose `Display`
/// carries a recognizable prefix so transports can turn them back into responses.
pub trait Facilitator {
    type Error: Debug + Display;

    /// Verifies a payment payload against its requirements, without moving funds.
    fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> impl Future<Output = Result<proto::VerifyResponse, Self::Error>> + Send;

    /// Settles a previously verified payment on-chain.
    fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> impl Future<Output = Result<proto::SettleResponse, Self::Error>> + Send;

    /// Lists the `(scheme, network)` pairs served and the signer addresses per network.
    fn supported(
        &self,
    ) -> impl Future<Output = Result<proto::SupportedResponse, Self::Error>> + Send;
}

impl<T: Facilitator + Sync + Send> Facilitator for Arc<T> {
    type Error = T::Error;

    fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> impl Future<Output = Result<proto::VerifyResponse, Self::Error>> + Send {
        self.as_ref().verify(request)
    }

    fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> impl Future<Output = Result<proto::SettleResponse, Self::Error>> + Send {
        self.as_ref().settle(request)
    }

    fn supported(
        &self,
    ) -> impl Future<Output = Result<proto::SupportedResponse, Self::Error>> + Send {
        self.as_ref().supported()
    }
}
