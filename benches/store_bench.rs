use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fakebooks::collections::{ALL, WALLET_TXNS};
use fakebooks::settlement::settle_payments;
use fakebooks_core::{
    Deal, DealDetail, DealPayment, DealType, EntrySide, StoreError, WalletTxn, WalletTxnStatus,
    WalletableType,
};
use fakebooks_sqlite::Store;
use time::{macros::datetime, Date, Duration};

fn setup() -> Store {
    let mut store = Store::open_in_memory().unwrap();
    store.declare(ALL).unwrap();
    store
}

fn base_date() -> Date {
    Date::from_calendar_date(2024, time::Month::January, 1).unwrap()
}

fn wallet_txn(id: i64, date: Date, amount: i64) -> WalletTxn {
    let now = datetime!(2024-01-01 00:00 UTC);
    WalletTxn {
        id,
        company_id: 1,
        date,
        amount,
        entry_side: EntrySide::from_amount(amount),
        walletable_type: WalletableType::CreditCard,
        walletable_id: 2,
        description: format!("Card line {}", id),
        status: WalletTxnStatus::Unbooked,
        deal_id: None,
        created_at: now,
        updated_at: now,
    }
}

// 1000 unbooked card lines spread over a year
fn seed_data(store: &Store) {
    store
        .update(|txn| -> Result<(), StoreError> {
            for i in 0..1000 {
                let id = txn.next_id(WALLET_TXNS)?;
                let date = base_date() + Duration::days(i % 365);
                txn.put(WALLET_TXNS, id, &wallet_txn(id, date, -(100 + i)))?;
            }
            Ok(())
        })
        .unwrap();
}

fn bench_put_get(c: &mut Criterion) {
    let store = setup();

    c.bench_function("wallet_txn_insert", |b| {
        b.iter(|| {
            store
                .update(|txn| -> Result<i64, StoreError> {
                    let id = txn.next_id(WALLET_TXNS)?;
                    txn.put(WALLET_TXNS, id, &wallet_txn(id, base_date(), -1980))?;
                    Ok(id)
                })
                .unwrap()
        })
    });

    c.bench_function("wallet_txn_get", |b| {
        b.iter(|| store.get::<WalletTxn>(WALLET_TXNS, black_box(1)).unwrap())
    });
}

fn bench_filtered_scan(c: &mut Criterion) {
    let store = setup();
    seed_data(&store);

    c.bench_function("wallet_txn_scan_unbooked", |b| {
        b.iter(|| {
            store
                .scan(WALLET_TXNS, |t: &WalletTxn| t.is_unbooked() && t.walletable_id == black_box(2))
                .unwrap()
        })
    });
}

fn bench_settlement(c: &mut Criterion) {
    let store = setup();
    seed_data(&store);

    let now = datetime!(2024-06-01 00:00 UTC);
    let details = vec![DealDetail { account_item_id: 4, tax_code: 136, amount: 600, vat: 0, description: None }];
    let deal = Deal {
        id: 1,
        company_id: 1,
        issue_date: base_date(),
        deal_type: DealType::Expense,
        amount: Deal::total_amount(&details).unwrap(),
        details,
        payments: vec![DealPayment {
            from_walletable_type: Some(WalletableType::CreditCard),
            from_walletable_id: Some(2),
            date: base_date() + Duration::days(135),
            amount: 600,
        }],
        ref_number: None,
        partner_id: None,
        created_at: now,
        updated_at: now,
    };

    // Runs against a rolled-back transaction so every iteration sees the
    // same unbooked candidate.
    c.bench_function("settle_single_payment", |b| {
        b.iter(|| {
            let _ = store.update(|txn| -> Result<(), StoreError> {
                black_box(settle_payments(txn, &deal, now)?);
                Err(StoreError::Backend("rollback".to_string()))
            });
        })
    });
}

criterion_group!(benches, bench_put_get, bench_filtered_scan, bench_settlement);
criterion_main!(benches);
