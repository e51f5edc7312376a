//! Matching deal payments against imported statement lines.
//!
//! Runs inside the transaction that writes the deal, so the candidate scan
//! and the status flip see a consistent view and cannot race another deal.

use fakebooks_core::{Deal, DealPayment, RecordId, StoreError, WalletTxn};
use fakebooks_sqlite::Txn;
use time::OffsetDateTime;

use crate::collections::WALLET_TXNS;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    Settled { wallet_txn_id: RecordId },
    NoMatch,
    Ambiguous { candidates: Vec<RecordId> },
}

impl SettlementOutcome {
    fn label(&self) -> &'static str {
        match self {
            SettlementOutcome::Settled { .. } => "settled",
            SettlementOutcome::NoMatch => "no_match",
            SettlementOutcome::Ambiguous { .. } => "ambiguous",
        }
    }
}

fn is_candidate(candidate: &WalletTxn, company_id: RecordId, payment: &DealPayment) -> bool {
    if !candidate.is_unbooked()
        || candidate.company_id != company_id
        || candidate.date != payment.date
        || candidate.amount.unsigned_abs() != payment.amount.unsigned_abs()
    {
        return false;
    }

    match payment.walletable() {
        Some((walletable_type, walletable_id)) => {
            candidate.walletable_type == walletable_type && candidate.walletable_id == walletable_id
        }
        None => true,
    }
}

/// Settles at most one unbooked wallet transaction per payment line of
/// `deal`. Zero or several candidates leave everything untouched.
pub fn settle_payments(txn: &Txn<'_>, deal: &Deal, now: OffsetDateTime) -> Result<Vec<SettlementOutcome>, StoreError> {
    let mut outcomes = Vec::with_capacity(deal.payments.len());

    for (line, payment) in deal.payments.iter().enumerate() {
        let mut candidates: Vec<WalletTxn> =
            txn.scan(WALLET_TXNS, |t: &WalletTxn| is_candidate(t, deal.company_id, payment))?;

        let outcome = match candidates.len() {
            0 => {
                tracing::info!(deal_id = deal.id, line, date = %payment.date, amount = payment.amount, "No wallet transaction matches payment");
                SettlementOutcome::NoMatch
            }
            1 => {
                let mut wallet_txn = candidates.remove(0);
                wallet_txn.settle(deal.id, now);
                txn.put(WALLET_TXNS, wallet_txn.id, &wallet_txn)?;
                tracing::info!(deal_id = deal.id, line, wallet_txn_id = wallet_txn.id, "Wallet transaction settled");
                SettlementOutcome::Settled { wallet_txn_id: wallet_txn.id }
            }
            _ => {
                let ids: Vec<RecordId> = candidates.iter().map(|t| t.id).collect();
                tracing::warn!(deal_id = deal.id, line, candidates = ?ids, "Payment matches several wallet transactions, leaving them unbooked");
                SettlementOutcome::Ambiguous { candidates: ids }
            }
        };

        metrics::increment_counter!("fakebooks_settlements_total", "outcome" => outcome.label());
        outcomes.push(outcome);
    }

    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fakebooks_core::{DealDetail, DealType, EntrySide, WalletTxnStatus, WalletableType};
    use fakebooks_sqlite::Store;
    use time::{macros::{date, datetime}, Date};

    use crate::collections::ALL;

    fn store() -> Store {
        let mut store = Store::open_in_memory().unwrap();
        store.declare(ALL).unwrap();
        store
    }

    fn wallet_txn(store: &Store, company_id: RecordId, date: Date, amount: i64, walletable: (WalletableType, RecordId)) -> RecordId {
        store
            .update(|txn| -> Result<RecordId, StoreError> {
                let id = txn.next_id(WALLET_TXNS)?;
                let now = datetime!(2024-11-21 09:00 UTC);
                txn.put(
                    WALLET_TXNS,
                    id,
                    &WalletTxn {
                        id,
                        company_id,
                        date,
                        amount,
                        entry_side: EntrySide::from_amount(amount),
                        walletable_type: walletable.0,
                        walletable_id: walletable.1,
                        description: String::new(),
                        status: WalletTxnStatus::Unbooked,
                        deal_id: None,
                        created_at: now,
                        updated_at: now,
                    },
                )?;
                Ok(id)
            })
            .unwrap()
    }

    fn deal(payments: Vec<DealPayment>) -> Deal {
        let now = datetime!(2024-11-22 09:00 UTC);
        let details = vec![DealDetail { account_item_id: 1, tax_code: 136, amount: 1980, vat: 0, description: None }];
        Deal {
            id: 50,
            company_id: 1,
            issue_date: date!(2024 - 11 - 20),
            deal_type: DealType::Expense,
            amount: Deal::total_amount(&details).unwrap(),
            details,
            payments,
            ref_number: None,
            partner_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn payment(walletable: Option<(WalletableType, RecordId)>, amount: i64) -> DealPayment {
        DealPayment {
            from_walletable_type: walletable.map(|w| w.0),
            from_walletable_id: walletable.map(|w| w.1),
            date: date!(2024 - 11 - 20),
            amount,
        }
    }

    fn settle(store: &Store, deal: &Deal) -> Vec<SettlementOutcome> {
        store
            .update(|txn| settle_payments(txn, deal, datetime!(2024-11-22 10:00 UTC)))
            .unwrap()
    }

    #[test]
    fn test_explicit_walletable_settles_single_match() {
        let store = store();
        let card = (WalletableType::CreditCard, 2);
        let target = wallet_txn(&store, 1, date!(2024 - 11 - 20), -1980, card);
        let other_card = wallet_txn(&store, 1, date!(2024 - 11 - 20), -1980, (WalletableType::CreditCard, 9));

        let outcomes = settle(&store, &deal(vec![payment(Some(card), 1980)]));
        assert_eq!(outcomes, vec![SettlementOutcome::Settled { wallet_txn_id: target }]);

        let settled: WalletTxn = store.get(WALLET_TXNS, target).unwrap();
        assert_eq!(settled.status, WalletTxnStatus::Settled);
        assert_eq!(settled.deal_id, Some(50));
        assert_eq!(settled.updated_at, datetime!(2024-11-22 10:00 UTC));

        let untouched: WalletTxn = store.get(WALLET_TXNS, other_card).unwrap();
        assert!(untouched.is_unbooked());
    }

    #[test]
    fn test_mismatch_leaves_everything_unbooked() {
        let store = store();
        let card = (WalletableType::CreditCard, 2);
        let id = wallet_txn(&store, 1, date!(2024 - 11 - 20), -1980, card);

        let outcomes = settle(&store, &deal(vec![payment(Some(card), 1000)]));
        assert_eq!(outcomes, vec![SettlementOutcome::NoMatch]);

        let mut wrong_company = deal(vec![payment(Some(card), 1980)]);
        wrong_company.company_id = 2;
        assert_eq!(settle(&store, &wrong_company), vec![SettlementOutcome::NoMatch]);

        assert!(store.get::<WalletTxn>(WALLET_TXNS, id).unwrap().is_unbooked());
    }

    #[test]
    fn test_unnamed_walletable_matches_on_date_and_amount() {
        let store = store();
        let id = wallet_txn(&store, 1, date!(2024 - 11 - 20), -1980, (WalletableType::Wallet, 3));

        let outcomes = settle(&store, &deal(vec![payment(None, 1980)]));
        assert_eq!(outcomes, vec![SettlementOutcome::Settled { wallet_txn_id: id }]);
    }

    #[test]
    fn test_ambiguous_match_settles_nothing() {
        let store = store();
        let a = wallet_txn(&store, 1, date!(2024 - 11 - 20), -1980, (WalletableType::Wallet, 3));
        let b = wallet_txn(&store, 1, date!(2024 - 11 - 20), -1980, (WalletableType::CreditCard, 2));

        let outcomes = settle(&store, &deal(vec![payment(None, 1980)]));
        assert_eq!(outcomes, vec![SettlementOutcome::Ambiguous { candidates: vec![a, b] }]);
        assert!(store.get::<WalletTxn>(WALLET_TXNS, a).unwrap().is_unbooked());
        assert!(store.get::<WalletTxn>(WALLET_TXNS, b).unwrap().is_unbooked());
    }

    #[test]
    fn test_extreme_amounts_compare_without_overflow() {
        let store = store();
        let extreme = wallet_txn(&store, 1, date!(2024 - 11 - 20), i64::MIN, (WalletableType::Wallet, 3));
        let ordinary = wallet_txn(&store, 1, date!(2024 - 11 - 20), -1980, (WalletableType::Wallet, 3));

        let outcomes = settle(&store, &deal(vec![payment(None, 1980)]));
        assert_eq!(outcomes, vec![SettlementOutcome::Settled { wallet_txn_id: ordinary }]);

        let outcomes = settle(&store, &deal(vec![payment(None, i64::MIN)]));
        assert_eq!(outcomes, vec![SettlementOutcome::Settled { wallet_txn_id: extreme }]);
    }

    #[test]
    fn test_concurrent_deals_settle_a_line_once() {
        let store = store();
        let card = (WalletableType::CreditCard, 2);
        let target = wallet_txn(&store, 1, date!(2024 - 11 - 20), -1980, card);

        let results: Vec<(RecordId, Vec<SettlementOutcome>)> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let store = &store;
                    s.spawn(move || {
                        let mut deal = deal(vec![payment(Some(card), 1980)]);
                        deal.id = 100 + i;
                        (deal.id, settle(store, &deal))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let winners: Vec<RecordId> = results
            .iter()
            .filter(|(_, outcomes)| outcomes == &vec![SettlementOutcome::Settled { wallet_txn_id: target }])
            .map(|(deal_id, _)| *deal_id)
            .collect();
        assert_eq!(winners.len(), 1, "{:?}", results);
        assert!(results
            .iter()
            .filter(|(deal_id, _)| *deal_id != winners[0])
            .all(|(_, outcomes)| outcomes == &vec![SettlementOutcome::NoMatch]));

        let settled: WalletTxn = store.get(WALLET_TXNS, target).unwrap();
        assert_eq!(settled.status, WalletTxnStatus::Settled);
        assert_eq!(settled.deal_id, Some(winners[0]));
    }

    #[test]
    fn test_later_lines_see_earlier_settlements() {
        let store = store();
        let a = wallet_txn(&store, 1, date!(2024 - 11 - 20), -1980, (WalletableType::Wallet, 3));

        // The second identical line finds nothing left to claim.
        let outcomes = settle(&store, &deal(vec![payment(None, 1980), payment(None, 1980)]));
        assert_eq!(outcomes, vec![SettlementOutcome::Settled { wallet_txn_id: a }, SettlementOutcome::NoMatch]);
    }
}
