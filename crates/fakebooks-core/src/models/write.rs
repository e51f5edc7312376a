use serde::Deserialize;
use thiserror::Error;
use time::{macros::format_description, Date, OffsetDateTime};

use super::{
    Deal, DealDetail, DealPayment, DealType, EntrySide, Journal, JournalDetail, JournalSide,
    RecordId, WalletTxn, WalletTxnStatus, WalletableType,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    Missing(String),
    #[error("{field} {reason}")]
    Invalid { field: String, reason: String },
}

impl ValidationError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::Invalid { field: field.into(), reason: reason.into() }
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, ValidationError> {
    value.ok_or_else(|| ValidationError::Missing(field.to_string()))
}

/// Parses the `YYYY-MM-DD` form used by every date field of the API.
pub fn parse_date(field: &str, value: &str) -> Result<Date, ValidationError> {
    Date::parse(value.trim(), format_description!("[year]-[month]-[day]"))
        .map_err(|_| ValidationError::invalid(field, "must be a YYYY-MM-DD date"))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewWalletTxn {
    pub company_id: Option<RecordId>,
    pub date: Option<Date>,
    pub amount: Option<i64>,
    pub entry_side: Option<EntrySide>,
    pub walletable_type: Option<WalletableType>,
    pub walletable_id: Option<RecordId>,
    pub description: Option<String>,
}

impl NewWalletTxn {
    pub fn into_record(self, id: RecordId, now: OffsetDateTime) -> Result<WalletTxn, ValidationError> {
        let amount = required(self.amount, "amount")?;
        Ok(WalletTxn {
            id,
            company_id: required(self.company_id, "company_id")?,
            date: required(self.date, "date")?,
            amount,
            entry_side: self.entry_side.unwrap_or_else(|| EntrySide::from_amount(amount)),
            walletable_type: required(self.walletable_type, "walletable_type")?,
            walletable_id: required(self.walletable_id, "walletable_id")?,
            description: self.description.unwrap_or_default(),
            status: WalletTxnStatus::Unbooked,
            deal_id: None,
            created_at: now,
            updated_at: now,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WalletTxnPatch {
    pub date: Option<Date>,
    pub amount: Option<i64>,
    pub entry_side: Option<EntrySide>,
    pub walletable_type: Option<WalletableType>,
    pub walletable_id: Option<RecordId>,
    pub description: Option<String>,
    pub status: Option<WalletTxnStatus>,
}

impl WalletTxnPatch {
    pub fn apply(self, txn: &mut WalletTxn, now: OffsetDateTime) -> Result<(), ValidationError> {
        if let Some(status) = self.status {
            if status == WalletTxnStatus::Unbooked && txn.status == WalletTxnStatus::Settled {
                return Err(ValidationError::invalid("status", "cannot return a settled transaction to unbooked"));
            }
            txn.status = status;
        }
        if let Some(date) = self.date {
            txn.date = date;
        }
        if let Some(amount) = self.amount {
            txn.amount = amount;
        }
        if let Some(entry_side) = self.entry_side {
            txn.entry_side = entry_side;
        }
        if let Some(walletable_type) = self.walletable_type {
            txn.walletable_type = walletable_type;
        }
        if let Some(walletable_id) = self.walletable_id {
            txn.walletable_id = walletable_id;
        }
        if let Some(description) = self.description {
            txn.description = description;
        }
        txn.updated_at = now;
        Ok(())
    }

    /// True when the patch moves the transaction to another walletable.
    pub fn touches_walletable(&self) -> bool {
        self.walletable_type.is_some() || self.walletable_id.is_some()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewDealDetail {
    pub account_item_id: Option<RecordId>,
    pub tax_code: Option<i64>,
    pub amount: Option<i64>,
    pub vat: Option<i64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewDealPayment {
    #[serde(alias = "walletable_type")]
    pub from_walletable_type: Option<WalletableType>,
    #[serde(alias = "walletable_id")]
    pub from_walletable_id: Option<RecordId>,
    pub date: Option<Date>,
    pub amount: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewDeal {
    pub company_id: Option<RecordId>,
    pub issue_date: Option<Date>,
    #[serde(rename = "type")]
    pub deal_type: Option<DealType>,
    pub details: Option<Vec<NewDealDetail>>,
    pub payments: Option<Vec<NewDealPayment>>,
    pub ref_number: Option<String>,
    pub partner_id: Option<RecordId>,
}

fn deal_details(details: Option<Vec<NewDealDetail>>) -> Result<Vec<DealDetail>, ValidationError> {
    let details = required(details, "details")?;
    if details.is_empty() {
        return Err(ValidationError::invalid("details", "must contain at least one line"));
    }

    details
        .into_iter()
        .enumerate()
        .map(|(i, d)| -> Result<DealDetail, ValidationError> {
            Ok(DealDetail {
                account_item_id: required(d.account_item_id, &format!("details[{}].account_item_id", i))?,
                tax_code: required(d.tax_code, &format!("details[{}].tax_code", i))?,
                amount: required(d.amount, &format!("details[{}].amount", i))?,
                vat: d.vat.unwrap_or(0),
                description: d.description,
            })
        })
        .collect()
}

fn deal_total(details: &[DealDetail]) -> Result<i64, ValidationError> {
    Deal::total_amount(details).ok_or_else(|| ValidationError::invalid("details", "total amount is out of range"))
}

fn deal_payments(payments: Option<Vec<NewDealPayment>>) -> Result<Vec<DealPayment>, ValidationError> {
    payments
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(i, p)| -> Result<DealPayment, ValidationError> {
            if p.from_walletable_type.is_some() != p.from_walletable_id.is_some() {
                return Err(ValidationError::invalid(
                    format!("payments[{}]", i),
                    "must name both from_walletable_type and from_walletable_id, or neither",
                ));
            }
            Ok(DealPayment {
                from_walletable_type: p.from_walletable_type,
                from_walletable_id: p.from_walletable_id,
                date: required(p.date, &format!("payments[{}].date", i))?,
                amount: required(p.amount, &format!("payments[{}].amount", i))?,
            })
        })
        .collect()
}

impl NewDeal {
    pub fn into_record(self, id: RecordId, now: OffsetDateTime) -> Result<Deal, ValidationError> {
        let company_id = required(self.company_id, "company_id")?;
        let issue_date = required(self.issue_date, "issue_date")?;
        let deal_type = required(self.deal_type, "type")?;
        let details = deal_details(self.details)?;
        let payments = deal_payments(self.payments)?;

        Ok(Deal {
            id,
            company_id,
            issue_date,
            deal_type,
            amount: deal_total(&details)?,
            details,
            payments,
            ref_number: self.ref_number,
            partner_id: self.partner_id,
            created_at: now,
            updated_at: now,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DealPatch {
    pub issue_date: Option<Date>,
    #[serde(rename = "type")]
    pub deal_type: Option<DealType>,
    pub details: Option<Vec<NewDealDetail>>,
    pub payments: Option<Vec<NewDealPayment>>,
    pub ref_number: Option<String>,
    pub partner_id: Option<RecordId>,
}

impl DealPatch {
    pub fn apply(self, deal: &mut Deal, now: OffsetDateTime) -> Result<(), ValidationError> {
        if let Some(issue_date) = self.issue_date {
            deal.issue_date = issue_date;
        }
        if let Some(deal_type) = self.deal_type {
            deal.deal_type = deal_type;
        }
        if self.details.is_some() {
            let details = deal_details(self.details)?;
            deal.amount = deal_total(&details)?;
            deal.details = details;
        }
        if self.payments.is_some() {
            deal.payments = deal_payments(self.payments)?;
        }
        if self.ref_number.is_some() {
            deal.ref_number = self.ref_number;
        }
        if self.partner_id.is_some() {
            deal.partner_id = self.partner_id;
        }
        deal.updated_at = now;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewJournalDetail {
    pub entry_side: Option<JournalSide>,
    pub account_item_id: Option<RecordId>,
    pub tax_code: Option<i64>,
    pub amount: Option<i64>,
    pub vat: Option<i64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewJournal {
    pub company_id: Option<RecordId>,
    pub issue_date: Option<Date>,
    pub details: Option<Vec<NewJournalDetail>>,
}

impl NewJournal {
    pub fn into_record(self, id: RecordId, now: OffsetDateTime) -> Result<Journal, ValidationError> {
        let company_id = required(self.company_id, "company_id")?;
        let issue_date = required(self.issue_date, "issue_date")?;
        let details = required(self.details, "details")?;
        if details.is_empty() {
            return Err(ValidationError::invalid("details", "must contain at least one line"));
        }

        let details = details
            .into_iter()
            .enumerate()
            .map(|(i, d)| -> Result<JournalDetail, ValidationError> {
                Ok(JournalDetail {
                    entry_side: required(d.entry_side, &format!("details[{}].entry_side", i))?,
                    account_item_id: required(d.account_item_id, &format!("details[{}].account_item_id", i))?,
                    tax_code: d.tax_code.unwrap_or(0),
                    amount: required(d.amount, &format!("details[{}].amount", i))?,
                    vat: d.vat.unwrap_or(0),
                    description: d.description,
                })
            })
            .collect::<Result<Vec<_>, ValidationError>>()?;

        Ok(Journal { id, company_id, issue_date, details, created_at: now })
    }
}

/// Text fields of a receipt upload, gathered from multipart parts.
#[derive(Debug, Clone, Default)]
pub struct NewReceipt {
    pub company_id: Option<RecordId>,
    pub issue_date: Option<Date>,
    pub description: Option<String>,
}

impl NewReceipt {
    pub fn set_field(&mut self, name: &str, value: &str) -> Result<(), ValidationError> {
        match name {
            "company_id" => {
                let id = value
                    .trim()
                    .parse()
                    .map_err(|_| ValidationError::invalid("company_id", "must be an integer"))?;
                self.company_id = Some(id);
            }
            "issue_date" => self.issue_date = Some(parse_date("issue_date", value)?),
            "description" => self.description = Some(value.to_string()),
            _ => {}
        }
        Ok(())
    }

    pub fn company_id(&self) -> Result<RecordId, ValidationError> {
        required(self.company_id, "company_id")
    }

    pub fn issue_date(&self) -> Result<Date, ValidationError> {
        required(self.issue_date, "issue_date")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    fn now() -> OffsetDateTime {
        datetime!(2024-11-21 09:00 UTC)
    }

    #[test]
    fn test_wallet_txn_requires_fields() {
        let err = NewWalletTxn { amount: Some(-1980), ..Default::default() }
            .into_record(1, now())
            .unwrap_err();
        assert_eq!(err, ValidationError::Missing("company_id".to_string()));
    }

    #[test]
    fn test_wallet_txn_entry_side_follows_sign() {
        let txn = NewWalletTxn {
            company_id: Some(1),
            date: Some(date!(2024 - 11 - 20)),
            amount: Some(-1980),
            walletable_type: Some(WalletableType::CreditCard),
            walletable_id: Some(2),
            ..Default::default()
        }
        .into_record(5, now())
        .unwrap();

        assert_eq!(txn.entry_side, EntrySide::Expense);
        assert_eq!(txn.status, WalletTxnStatus::Unbooked);
        assert_eq!(txn.description, "");
    }

    #[test]
    fn test_patch_cannot_unsettle() {
        let mut txn = NewWalletTxn {
            company_id: Some(1),
            date: Some(date!(2024 - 11 - 20)),
            amount: Some(100),
            walletable_type: Some(WalletableType::BankAccount),
            walletable_id: Some(1),
            ..Default::default()
        }
        .into_record(1, now())
        .unwrap();
        txn.settle(9, now());

        let patch = WalletTxnPatch { status: Some(WalletTxnStatus::Unbooked), ..Default::default() };
        assert!(patch.apply(&mut txn, now()).is_err());
        assert_eq!(txn.status, WalletTxnStatus::Settled);
    }

    #[test]
    fn test_deal_rejects_half_named_walletable() {
        let deal: NewDeal = serde_json::from_value(serde_json::json!({
            "company_id": 1,
            "issue_date": "2024-11-20",
            "type": "expense",
            "details": [{"account_item_id": 1, "tax_code": 136, "amount": 1980}],
            "payments": [{"from_walletable_type": "credit_card", "date": "2024-11-20", "amount": 1980}]
        }))
        .unwrap();

        let err = deal.into_record(1, now()).unwrap_err();
        assert!(matches!(err, ValidationError::Invalid { ref field, .. } if field == "payments[0]"));
    }

    #[test]
    fn test_deal_payment_accepts_short_aliases() {
        let deal: NewDeal = serde_json::from_value(serde_json::json!({
            "company_id": 1,
            "issue_date": "2024-11-20",
            "type": "expense",
            "details": [{"account_item_id": 1, "tax_code": 136, "amount": 1800, "vat": 180}],
            "payments": [{"walletable_type": "credit_card", "walletable_id": 2, "date": "2024-11-20", "amount": 1980}]
        }))
        .unwrap();

        let deal = deal.into_record(3, now()).unwrap();
        assert_eq!(deal.amount, 1980);
        assert_eq!(deal.payments[0].walletable(), Some((WalletableType::CreditCard, 2)));
    }

    #[test]
    fn test_deal_total_out_of_range_is_invalid() {
        let deal: NewDeal = serde_json::from_value(serde_json::json!({
            "company_id": 1,
            "issue_date": "2024-11-20",
            "type": "expense",
            "details": [{"account_item_id": 1, "tax_code": 136, "amount": i64::MAX, "vat": 1}]
        }))
        .unwrap();

        let err = deal.into_record(1, now()).unwrap_err();
        assert!(matches!(err, ValidationError::Invalid { ref field, .. } if field == "details"));
    }

    #[test]
    fn test_deal_patch_recomputes_amount() {
        let mut deal = NewDeal {
            company_id: Some(1),
            issue_date: Some(date!(2024 - 11 - 20)),
            deal_type: Some(DealType::Expense),
            details: Some(vec![NewDealDetail {
                account_item_id: Some(1),
                tax_code: Some(136),
                amount: Some(1000),
                ..Default::default()
            }]),
            ..Default::default()
        }
        .into_record(1, now())
        .unwrap();

        let later = datetime!(2024-11-22 09:00 UTC);
        DealPatch {
            details: Some(vec![NewDealDetail {
                account_item_id: Some(1),
                tax_code: Some(136),
                amount: Some(2000),
                vat: Some(200),
                ..Default::default()
            }]),
            ref_number: Some("INV-7".to_string()),
            ..Default::default()
        }
        .apply(&mut deal, later)
        .unwrap();

        assert_eq!(deal.amount, 2200);
        assert_eq!(deal.ref_number.as_deref(), Some("INV-7"));
        assert_eq!(deal.issue_date, date!(2024 - 11 - 20));
        assert_eq!(deal.updated_at, later);
    }

    #[test]
    fn test_receipt_fields() {
        let mut receipt = NewReceipt::default();
        receipt.set_field("company_id", "1").unwrap();
        receipt.set_field("issue_date", "2024-11-20").unwrap();
        receipt.set_field("ignored", "x").unwrap();
        assert_eq!(receipt.company_id().unwrap(), 1);
        assert_eq!(receipt.issue_date().unwrap(), date!(2024 - 11 - 20));
        assert!(receipt.set_field("issue_date", "20/11/2024").is_err());
    }
}
