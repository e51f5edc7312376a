//! Reference data every fresh database starts with.
//!
//! Companies, account items and walletables have no write endpoints, so the
//! emulator creates them at startup. Each collection is seeded only while it
//! is empty; a reopened database keeps whatever it already holds.

use fakebooks_core::{AccountItem, Company, RecordId, StoreError, Walletable, WalletableType};
use fakebooks_sqlite::{Store, Txn};

use crate::{
    collections::{ACCOUNT_ITEMS, COMPANIES, WALLETABLES},
    config::AuthConfig,
};

const ACCOUNT_ITEMS_SEED: &[(&str, &str, i64)] = &[
    ("現金", "現金・預金", 0),
    ("普通預金", "現金・預金", 0),
    ("売上高", "売上高", 129),
    ("消耗品費", "経費", 136),
    ("通信費", "経費", 136),
    ("旅費交通費", "経費", 136),
    ("未払金", "流動負債", 0),
];

const WALLETABLES_SEED: &[(&str, WalletableType)] = &[
    ("Main Bank", WalletableType::BankAccount),
    ("Corporate Card", WalletableType::CreditCard),
    ("Petty Cash", WalletableType::Wallet),
];

fn is_empty(txn: &Txn<'_>, collection: &str) -> Result<bool, StoreError> {
    Ok(txn.count(collection)? == 0)
}

/// Seeds the company named in `auth` with account items and one walletable of
/// each type. Walletable ids are 1, 2 and 3 in the order bank account, credit
/// card, wallet.
pub fn seed(store: &Store, auth: &AuthConfig) -> Result<(), StoreError> {
    let company_id: RecordId = auth.company_id;

    store.update(|txn| {
        if is_empty(txn, COMPANIES)? {
            let company = Company {
                id: company_id,
                display_name: auth.company_name.clone(),
                name: auth.company_name.clone(),
            };
            txn.put(COMPANIES, company.id, &company)?;
            tracing::info!(company_id, name = %company.name, "Seeded company");
        }

        if is_empty(txn, ACCOUNT_ITEMS)? {
            for (i, (name, category, tax_code)) in ACCOUNT_ITEMS_SEED.iter().enumerate() {
                let id = i as RecordId + 1;
                let item = AccountItem {
                    id,
                    company_id,
                    name: name.to_string(),
                    account_category: category.to_string(),
                    default_tax_code: *tax_code,
                };
                txn.put(ACCOUNT_ITEMS, id, &item)?;
            }
            tracing::info!(count = ACCOUNT_ITEMS_SEED.len(), "Seeded account items");
        }

        if is_empty(txn, WALLETABLES)? {
            for (i, (name, walletable_type)) in WALLETABLES_SEED.iter().enumerate() {
                let id = i as RecordId + 1;
                let walletable = Walletable {
                    id,
                    company_id,
                    name: name.to_string(),
                    walletable_type: *walletable_type,
                    walletable_balance: 0,
                };
                txn.put(WALLETABLES, id, &walletable)?;
            }
            tracing::info!(count = WALLETABLES_SEED.len(), "Seeded walletables");
        }

        Ok(())
    })
}
