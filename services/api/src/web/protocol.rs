//! services/api/src/web/protocol.rs
//!
//! Defines the JSON/form payloads exchanged with the payment gateway and with
//! authenticated clients.

use coin_ledger_core::{
    Coins, EpisodeId, LedgerEntry, PurchaseReceipt, PurchaseRequest, TopupPackage,
    TopupTransaction, WorkKind,
};
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

//=========================================================================================
// Payment Gateway Webhook
//=========================================================================================

/// The webhook body: `data` is a JSON document encoded as a string, signed as-is.
#[derive(Deserialize, Debug, Default, ToSchema)]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
}

/// The decoded `data` field of a webhook.
///
/// The gateway sends every field as a string, but numbers are tolerated.
#[derive(Deserialize, Debug, Default)]
pub struct PaymentData {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id_pay: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub ref1: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub amount_check: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub amount: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub date_pay: Option<String>,
}

/// The gateway's acknowledgement contract: `{"status":1}` or `{"status":0,"error":"..."}`.
#[derive(Serialize, Debug, PartialEq, Eq, ToSchema)]
pub struct WebhookAck {
    pub status: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WebhookAck {
    pub fn ok() -> Self {
        Self {
            status: 1,
            error: None,
        }
    }

    pub fn failed(error: &str) -> Self {
        Self {
            status: 0,
            error: Some(error.to_string()),
        }
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

//=========================================================================================
// Episode Purchase
//=========================================================================================

/// Either `{episodeUuids}` or the legacy `{cartoonUuid, episode, type}` shape.
#[derive(Deserialize, Debug, Default, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseBody {
    pub episode_uuids: Option<Vec<Uuid>>,
    pub cartoon_uuid: Option<Uuid>,
    /// Episode number, as a number or numeric string.
    #[schema(value_type = Option<String>)]
    pub episode: Option<serde_json::Value>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl PurchaseBody {
    /// Maps the body onto one of the two request variants.
    pub fn into_request(self) -> Result<PurchaseRequest, String> {
        if let Some(ids) = self.episode_uuids {
            return Ok(PurchaseRequest::Episodes(ids));
        }

        let number = self.episode.as_ref().and_then(|value| match value {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        });

        match (self.cartoon_uuid, number) {
            (Some(work_id), Some(number)) => {
                let number = i32::try_from(number)
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| "episode number is out of range".to_string())?;
                Ok(PurchaseRequest::Legacy {
                    work_id,
                    number,
                    kind: WorkKind::from_label(self.kind.as_deref()),
                })
            }
            _ => Err(
                "Incomplete request: provide episodeUuids or cartoonUuid and episode".to_string(),
            ),
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct PurchaseResponse {
    pub success: bool,
    pub message: String,
    pub purchased: usize,
    pub charged: i64,
    pub balance: i64,
}

impl From<PurchaseReceipt> for PurchaseResponse {
    fn from(receipt: PurchaseReceipt) -> Self {
        Self {
            success: true,
            message: format!("Purchased {} episode(s)", receipt.purchased),
            purchased: receipt.purchased,
            charged: receipt.charged.0,
            balance: receipt.balance_after.0,
        }
    }
}

/// The error body returned by client-facing endpoints.
#[derive(Serialize, Debug, Default, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_up_required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Vec<String>>)]
    pub episodes: Option<Vec<EpisodeId>>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            ..Default::default()
        }
    }
}

//=========================================================================================
// Top-ups and Balance
//=========================================================================================

#[derive(Serialize, Debug, ToSchema)]
pub struct TopupPackageView {
    pub id: String,
    /// Price in whole currency units.
    pub price: i64,
    pub coins: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bonus: Option<i64>,
    pub popular: bool,
}

impl TopupPackageView {
    /// The view of `package` shown at `position` of the price-ordered list.
    pub fn listed(position: usize, package: &TopupPackage) -> Self {
        // Rounded to the nearest whole unit for display.
        let price = (package.price.minor_units() + 50) / 100;
        Self {
            id: package.id.to_string(),
            price,
            coins: package.coin_amount.0,
            bonus: (package.bonus > Coins::ZERO).then_some(package.bonus.0),
            popular: package.is_popular(position),
        }
    }
}

#[derive(Deserialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitiateTopupBody {
    pub package_id: i64,
    pub gateway_ref: String,
}

#[derive(Serialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TopupTransactionView {
    pub id: i64,
    pub gateway_ref: String,
    /// Decimal amount the gateway must report, e.g. `"19.00"`.
    pub amount: String,
    pub coins: i64,
    pub status: String,
}

impl From<TopupTransaction> for TopupTransactionView {
    fn from(tx: TopupTransaction) -> Self {
        Self {
            id: tx.id,
            gateway_ref: tx.gateway_ref,
            amount: tx.amount_paid.to_string(),
            coins: tx.coins_added.0,
            status: tx.status.as_str().to_string(),
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub user_id: i64,
    pub balance: i64,
}

impl From<LedgerEntry> for BalanceResponse {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            user_id: entry.user_id.0,
            balance: entry.balance.0,
        }
    }
}
