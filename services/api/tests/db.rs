//! Tests of the Postgres adapter's transactional guarantees.
//!
//! Each test gets a fresh database with the migrations applied. They need a
//! reachable server in `DATABASE_URL`, so they are ignored by default:
//! `cargo test -p ledger_api --test db -- --ignored`.

use api_lib::adapters::db::DbAdapter;
use chrono::{Duration, Utc};
use coin_ledger_core::{
    domain::{NewTopupTransaction, PurchaseCommit},
    Coins, Episode, LedgerError, LedgerStore, Money, PurchaseCommand, PurchaseEngine,
    SettlementEngine, SettlementOutcome, TopupStatus, UserId, WebhookPayment,
};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

const BUYER: UserId = UserId(7);

async fn funded_account(store: &DbAdapter, pool: &PgPool, user: UserId, coins: i64) {
    store.open_account(user).await.unwrap();
    sqlx::query("UPDATE user_ledgers SET point = $2 WHERE user_id = $1")
        .bind(user.0)
        .bind(coins)
        .execute(pool)
        .await
        .unwrap();
}

async fn pending_topup(store: &DbAdapter, user: UserId, gateway_ref: &str) -> i64 {
    store
        .create_topup_transaction(NewTopupTransaction {
            user_id: user,
            gateway_ref: gateway_ref.to_string(),
            package_id: None,
            amount_paid: Money::from_minor_units(1900),
            coins_added: Coins(190),
        })
        .await
        .unwrap()
        .id
}

async fn seed_episodes(pool: &PgPool, prices: &[i64]) -> Vec<Episode> {
    let work_id = Uuid::new_v4();
    sqlx::query("INSERT INTO works (id, kind) VALUES ($1, 'manga')")
        .bind(work_id)
        .execute(pool)
        .await
        .unwrap();

    let mut episodes = Vec::new();
    for (i, price) in prices.iter().enumerate() {
        let episode = Episode {
            id: Uuid::new_v4(),
            work_id,
            number: i as i32 + 1,
            price: Coins(*price),
        };
        sqlx::query("INSERT INTO episodes (id, work_id, ep_no, price) VALUES ($1, $2, $3, $4)")
            .bind(episode.id)
            .bind(episode.work_id)
            .bind(episode.number)
            .bind(episode.price.0)
            .execute(pool)
            .await
            .unwrap();
        episodes.push(episode);
    }
    episodes
}

async fn balance(store: &DbAdapter, user: UserId) -> Coins {
    store.get_ledger_entry(user).await.unwrap().balance
}

async fn ownership_count(pool: &PgPool, user: UserId) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM episode_ownerships WHERE user_id = $1")
        .bind(user.0)
        .fetch_one(pool)
        .await
        .unwrap()
}

fn payment(gateway_ref: &str) -> WebhookPayment {
    WebhookPayment {
        gateway_ref: gateway_ref.to_string(),
        buyer_ref: "testpay".to_string(),
        amount: Money::from_minor_units(1900),
        amount_check: None,
        paid_at: None,
    }
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres server in DATABASE_URL"]
async fn concurrent_duplicate_deliveries_credit_once(pool: PgPool) {
    let store = Arc::new(DbAdapter::new(pool.clone()));
    funded_account(&store, &pool, BUYER, 0).await;
    pending_topup(&store, BUYER, "754349").await;
    let engine = SettlementEngine::new(store.clone());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.settle(&payment("754349")).await })
        })
        .collect();

    let mut credited = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            SettlementOutcome::Credited(_) => credited += 1,
            SettlementOutcome::AlreadySettled { .. } => {}
        }
    }

    assert_eq!(credited, 1);
    assert_eq!(balance(&store, BUYER).await, Coins(190));
    let tx = store.find_topup_by_gateway_ref("754349").await.unwrap().unwrap();
    assert_eq!(tx.status, TopupStatus::Completed);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres server in DATABASE_URL"]
async fn missing_ledger_row_leaves_transaction_pending(pool: PgPool) {
    let store = DbAdapter::new(pool.clone());
    // A transaction whose owner has no ledger row can only exist without the FK.
    sqlx::query("ALTER TABLE topup_transactions DROP CONSTRAINT topup_transactions_user_id_fkey")
        .execute(&pool)
        .await
        .unwrap();
    let orphan = UserId(99);
    let id = pending_topup(&store, orphan, "orphan").await;

    assert!(store.complete_topup(id).await.is_err());

    let tx = store.find_topup_by_gateway_ref("orphan").await.unwrap().unwrap();
    assert_eq!(tx.status, TopupStatus::Pending);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres server in DATABASE_URL"]
async fn concurrent_purchases_never_overdraw(pool: PgPool) {
    let store = Arc::new(DbAdapter::new(pool.clone()));
    funded_account(&store, &pool, BUYER, 30).await;
    let episodes = seed_episodes(&pool, &[20, 20]).await;

    // Commit directly so that only the adapter's row lock stands between the
    // racing debits.
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            let episode = episodes[i % 2].clone();
            tokio::spawn(async move {
                store
                    .commit_purchase(BUYER, &[episode], Coins(20), Utc::now())
                    .await
            })
        })
        .collect();

    let mut committed = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            PurchaseCommit::Committed { balance_after } => {
                committed += 1;
                assert_eq!(balance_after, Coins(10));
            }
            PurchaseCommit::InsufficientBalance { .. } | PurchaseCommit::AlreadyOwned(_) => {}
        }
    }

    assert_eq!(committed, 1);
    assert_eq!(balance(&store, BUYER).await, Coins(10));
    assert_eq!(ownership_count(&pool, BUYER).await, 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres server in DATABASE_URL"]
async fn owned_episode_is_rechecked_under_the_lock(pool: PgPool) {
    let store = DbAdapter::new(pool.clone());
    funded_account(&store, &pool, BUYER, 100).await;
    let episodes = seed_episodes(&pool, &[20]).await;

    let first = store
        .commit_purchase(BUYER, &episodes, Coins(20), Utc::now())
        .await
        .unwrap();
    assert_eq!(first, PurchaseCommit::Committed { balance_after: Coins(80) });

    let second = store
        .commit_purchase(BUYER, &episodes, Coins(20), Utc::now())
        .await
        .unwrap();
    assert_eq!(second, PurchaseCommit::AlreadyOwned(vec![episodes[0].id]));
    assert_eq!(balance(&store, BUYER).await, Coins(80));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres server in DATABASE_URL"]
async fn expired_grant_is_upgraded_to_permanent(pool: PgPool) {
    let store = Arc::new(DbAdapter::new(pool.clone()));
    funded_account(&store, &pool, BUYER, 50).await;
    let episodes = seed_episodes(&pool, &[20]).await;
    let episode_id = episodes[0].id;
    sqlx::query(
        "INSERT INTO episode_ownerships (user_id, episode_id, acquired_at, expires_at) \
         VALUES ($1, $2, $3, $4)",
    )
    .bind(BUYER.0)
    .bind(episode_id)
    .bind(Utc::now() - Duration::days(8))
    .bind(Utc::now() - Duration::days(1))
    .execute(&pool)
    .await
    .unwrap();

    let engine = PurchaseEngine::new(store.clone());
    let receipt = engine
        .purchase(BUYER, &PurchaseCommand::new([episode_id]).unwrap())
        .await
        .unwrap();
    assert_eq!(receipt.balance_after, Coins(30));

    let permanent: bool = sqlx::query_scalar(
        "SELECT expires_at IS NULL FROM episode_ownerships WHERE user_id = $1 AND episode_id = $2",
    )
    .bind(BUYER.0)
    .bind(episode_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(permanent);
    assert_eq!(ownership_count(&pool, BUYER).await, 1);

    // The upgraded grant now blocks a second purchase.
    let again = engine
        .purchase(BUYER, &PurchaseCommand::new([episode_id]).unwrap())
        .await;
    assert!(matches!(again, Err(LedgerError::AlreadyOwned(ids)) if ids == vec![episode_id]));
}
