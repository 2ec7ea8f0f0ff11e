use async_trait::async_trait;
use courier_core::{Channel, DispatchRequest, FunctionReply};

use crate::error::ProviderError;

/// A remote send function for one channel, with native `async fn`.
///
/// This trait is **not** object-safe. Every `Provider` automatically
/// implements [`DynProvider`] through a blanket implementation, which is what
/// the registry stores.
pub trait Provider: Send + Sync {
    /// Name of the remote function (e.g. `send-email`).
    fn name(&self) -> &str;

    /// Channel this function delivers on.
    fn channel(&self) -> Channel;

    /// Issue one call and return the normalized reply.
    fn call(
        &self,
        request: &DispatchRequest,
    ) -> impl std::future::Future<Output = Result<FunctionReply, ProviderError>> + Send;
}

/// Object-safe provider trait for use behind `Arc<dyn DynProvider>`.
///
/// You generally should not implement this trait directly; implement
/// [`Provider`] and rely on the blanket implementation.
#[async_trait]
pub trait DynProvider: Send + Sync {
    fn name(&self) -> &str;

    fn channel(&self) -> Channel;

    async fn call(&self, request: &DispatchRequest) -> Result<FunctionReply, ProviderError>;
}

#[async_trait]
impl<T: Provider> DynProvider for T {
    fn name(&self) -> &str {
        Provider::name(self)
    }

    fn channel(&self) -> Channel {
        Provider::channel(self)
    }

    async fn call(&self, request: &DispatchRequest) -> Result<FunctionReply, ProviderError> {
        Provider::call(self, request).await
    }
}
