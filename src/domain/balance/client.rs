//! Balances sub-client — ledger balance queries.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde_json::json;

use crate::client::CrosspayClient;
use crate::domain::balance::wire::{normalize, LedgerBalancesParams};
use crate::domain::balance::{by_asset, Balance};
use crate::error::SdkError;
use crate::rpc::Method;
use crate::shared::{Address, Asset};

pub struct Balances<'a> {
    pub(crate) client: &'a CrosspayClient,
}

impl<'a> Balances<'a> {
    /// Fetch ledger balances for `address`.
    ///
    /// Rejected without sending anything unless the client is authenticated.
    pub async fn fetch_balances(
        &self,
        address: impl Into<Address>,
    ) -> Result<HashMap<Asset, Decimal>, SdkError> {
        let params = LedgerBalancesParams {
            participant: address.into(),
        };
        let value = self
            .client
            .request(Method::GetLedgerBalances, Method::GetLedgerBalances, json!([params]))
            .await?;
        let balances = normalize(&value)?;

        self.client.record_balances(balances.clone());
        Ok(by_asset(&balances))
    }

    /// Balances from the last fetch or push, if any.
    pub fn latest(&self) -> Vec<Balance> {
        self.client.latest_balances()
    }
}
