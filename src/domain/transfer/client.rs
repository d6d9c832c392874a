//! Transfers sub-client.

use rust_decimal::Decimal;
use serde_json::{json, Value};

use crate::client::CrosspayClient;
use crate::domain::transfer::{TransferParams, TransferResult};
use crate::error::SdkError;
use crate::rpc::Method;
use crate::shared::{Address, Asset};

pub struct Transfers<'a> {
    pub(crate) client: &'a CrosspayClient,
}

impl<'a> Transfers<'a> {
    /// Transfer `amount` of `asset` to `recipient`.
    ///
    /// Never returns an error: failures come back as `success: false` with
    /// the reason attached.
    pub async fn transfer(
        &self,
        recipient: impl Into<Address>,
        amount: Decimal,
        asset: impl Into<Asset>,
    ) -> TransferResult {
        let recipient = recipient.into();
        let asset = asset.into();
        match self.try_transfer(recipient.clone(), amount, asset.clone()).await {
            Ok(_) => {
                tracing::info!("Transferred {} {} to {}", amount, asset, recipient);
                TransferResult::ok()
            }
            Err(e) => {
                tracing::warn!("Transfer of {} {} to {} failed: {}", amount, asset, recipient, e);
                TransferResult::failed(e.to_string())
            }
        }
    }

    async fn try_transfer(&self, recipient: Address, amount: Decimal, asset: Asset) -> Result<Value, SdkError> {
        if amount <= Decimal::ZERO {
            return Err(SdkError::Validation(format!("amount must be positive, got {}", amount)));
        }
        let params = TransferParams::single(recipient, asset, amount);
        self.client
            .request(Method::Transfer, Method::Transfer, json!([params]))
            .await
    }
}
