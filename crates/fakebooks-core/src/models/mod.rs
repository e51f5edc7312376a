use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Date, OffsetDateTime};

pub mod write;

pub type RecordId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletableType {
    BankAccount,
    CreditCard,
    Wallet,
}

impl WalletableType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletableType::BankAccount => "bank_account",
            WalletableType::CreditCard => "credit_card",
            WalletableType::Wallet => "wallet",
        }
    }
}

impl Display for WalletableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settlement state of an imported statement line.
///
/// The upstream API reports these as numeric codes (`1`, `2`) in filters but
/// as words in payloads; `FromStr` accepts both spellings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletTxnStatus {
    Unbooked,
    Settled,
}

impl WalletTxnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletTxnStatus::Unbooked => "unbooked",
            WalletTxnStatus::Settled => "settled",
        }
    }
}

impl FromStr for WalletTxnStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" | "unbooked" => Ok(WalletTxnStatus::Unbooked),
            "2" | "settled" => Ok(WalletTxnStatus::Settled),
            other => Err(UnknownVariant { kind: "wallet txn status", value: other.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySide {
    Income,
    Expense,
}

impl EntrySide {
    pub fn from_amount(amount: i64) -> Self {
        if amount < 0 {
            EntrySide::Expense
        } else {
            EntrySide::Income
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealType {
    Income,
    Expense,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalSide {
    Debit,
    Credit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: RecordId,
    pub display_name: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountItem {
    pub id: RecordId,
    pub company_id: RecordId,
    pub name: String,
    pub account_category: String,
    pub default_tax_code: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Walletable {
    pub id: RecordId,
    pub company_id: RecordId,
    pub name: String,
    #[serde(rename = "type")]
    pub walletable_type: WalletableType,
    pub walletable_balance: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTxn {
    pub id: RecordId,
    pub company_id: RecordId,
    pub date: Date,
    pub amount: i64,
    pub entry_side: EntrySide,
    pub walletable_type: WalletableType,
    pub walletable_id: RecordId,
    pub description: String,
    pub status: WalletTxnStatus,
    pub deal_id: Option<RecordId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl WalletTxn {
    pub fn is_unbooked(&self) -> bool {
        self.status == WalletTxnStatus::Unbooked
    }

    /// Marks the line as claimed by `deal_id`. There is no way back.
    pub fn settle(&mut self, deal_id: RecordId, now: OffsetDateTime) {
        self.status = WalletTxnStatus::Settled;
        self.deal_id = Some(deal_id);
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealDetail {
    pub account_item_id: RecordId,
    pub tax_code: i64,
    pub amount: i64,
    #[serde(default)]
    pub vat: i64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealPayment {
    pub from_walletable_type: Option<WalletableType>,
    pub from_walletable_id: Option<RecordId>,
    pub date: Date,
    pub amount: i64,
}

impl DealPayment {
    /// The walletable this payment names, if it names one.
    pub fn walletable(&self) -> Option<(WalletableType, RecordId)> {
        match (self.from_walletable_type, self.from_walletable_id) {
            (Some(t), Some(id)) => Some((t, id)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deal {
    pub id: RecordId,
    pub company_id: RecordId,
    pub issue_date: Date,
    #[serde(rename = "type")]
    pub deal_type: DealType,
    pub amount: i64,
    pub details: Vec<DealDetail>,
    #[serde(default)]
    pub payments: Vec<DealPayment>,
    #[serde(default)]
    pub ref_number: Option<String>,
    #[serde(default)]
    pub partner_id: Option<RecordId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Deal {
    /// Sum of detail amounts plus their tax, or `None` when it does not fit
    /// in an `i64`.
    pub fn total_amount(details: &[DealDetail]) -> Option<i64> {
        details
            .iter()
            .try_fold(0i64, |total, d| total.checked_add(d.amount)?.checked_add(d.vat))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalDetail {
    pub entry_side: JournalSide,
    pub account_item_id: RecordId,
    pub tax_code: i64,
    pub amount: i64,
    #[serde(default)]
    pub vat: i64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journal {
    pub id: RecordId,
    pub company_id: RecordId,
    pub issue_date: Date,
    pub details: Vec<JournalDetail>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Journal {
    pub fn side_total(&self, side: JournalSide) -> i128 {
        self.details
            .iter()
            .filter(|d| d.entry_side == side)
            .map(|d| i128::from(d.amount))
            .sum()
    }

    /// Debits equal credits. Not enforced on write; callers own the convention.
    pub fn is_balanced(&self) -> bool {
        self.side_total(JournalSide::Debit) == self.side_total(JournalSide::Credit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: RecordId,
    pub company_id: RecordId,
    pub issue_date: Date,
    pub description: String,
    pub file_path: String,
    pub file_name: String,
    pub mime_type: String,
    pub file_size: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
