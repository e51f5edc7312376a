//! Names of every collection the emulator keeps in its store.

pub const COMPANIES: &str = "companies";
pub const ACCOUNT_ITEMS: &str = "account_items";
pub const WALLETABLES: &str = "walletables";
pub const WALLET_TXNS: &str = "wallet_txns";
pub const DEALS: &str = "deals";
pub const JOURNALS: &str = "journals";
pub const RECEIPTS: &str = "receipts";

pub const ACCESS_TOKENS: &str = "access_tokens";
pub const REFRESH_TOKENS: &str = "refresh_tokens";
pub const LOGIN_SESSIONS: &str = "login_sessions";
pub const AUTHORIZATION_CODES: &str = "authorization_codes";

pub const ALL: &[&str] = &[
    COMPANIES,
    ACCOUNT_ITEMS,
    WALLETABLES,
    WALLET_TXNS,
    DEALS,
    JOURNALS,
    RECEIPTS,
    ACCESS_TOKENS,
    REFRESH_TOKENS,
    LOGIN_SESSIONS,
    AUTHORIZATION_CODES,
];
