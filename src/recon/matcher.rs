//! Account matching for inbound payments.
//!
//! An inbound notification carries a free-text reference and a payer
//! phone number. Strategies run in a fixed order and the first one that
//! resolves to exactly one active account wins. Ambiguous strategies
//! (email or phone shared by several accounts) are skipped rather than
//! guessed at.

use std::str::FromStr;

use tracing::debug;

use crate::store::{AccountId, SharedStorage};

/// Normalize an MSISDN to `2547XXXXXXXX` form.
///
/// Accepts `+254...`, `254...`, `07...` and `7...` variants. Returns
/// `None` when the input does not look like a Kenyan mobile number.
pub fn normalize_msisdn(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    let national = if let Some(rest) = digits.strip_prefix("254") {
        rest.to_string()
    } else if let Some(rest) = digits.strip_prefix('0') {
        rest.to_string()
    } else {
        digits
    };

    // 7XXXXXXXX or 1XXXXXXXX after the country code
    if national.len() == 9 && (national.starts_with('7') || national.starts_with('1')) {
        Some(format!("254{national}"))
    } else {
        None
    }
}

/// Extract an account id from a reference token like `USER-42` or `ACC-42`.
fn token_account_id(reference: &str) -> Option<AccountId> {
    let token = reference.trim();
    let rest = token
        .strip_prefix("USER-")
        .or_else(|| token.strip_prefix("ACC-"))?;
    AccountId::from_str(rest).ok()
}

/// Resolve a payment to an account.
///
/// Strategy order:
/// 1. `USER-<id>` / `ACC-<id>` token in the reference
/// 2. reference is a bare account id
/// 3. reference is an email on exactly one account
/// 4. payer phone matches exactly one account
pub fn match_account(
    storage: &SharedStorage,
    reference: &str,
    payer_phone: &str,
) -> Option<AccountId> {
    let reference = reference.trim();

    if let Some(id) = token_account_id(reference) {
        if storage.get_account(id).is_some() {
            debug!(account_id = %id, "matched payment by reference token");
            return Some(id);
        }
    }

    if let Ok(id) = AccountId::from_str(reference) {
        if storage.get_account(id).is_some() {
            debug!(account_id = %id, "matched payment by account id");
            return Some(id);
        }
    }

    if reference.contains('@') {
        let matches = storage.accounts_by_email(reference);
        if matches.len() == 1 {
            let id = matches[0].id;
            debug!(account_id = %id, "matched payment by email");
            return Some(id);
        }
    }

    if let Some(normalized) = normalize_msisdn(payer_phone) {
        let matches = storage.accounts_by_phone(&normalized);
        if matches.len() == 1 {
            let id = matches[0].id;
            debug!(account_id = %id, "matched payment by payer phone");
            return Some(id);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Account, MemoryStorage, Storage};
    use std::sync::Arc;

    fn storage_with(accounts: Vec<Account>) -> SharedStorage {
        let storage = MemoryStorage::new();
        for account in accounts {
            storage.insert_account(account);
        }
        Arc::new(storage)
    }

    fn account(email: &str, phone: &str) -> Account {
        Account::new(Some(email.to_string()), Some(phone.to_string()))
    }

    #[test]
    fn test_normalize_msisdn_variants() {
        assert_eq!(
            normalize_msisdn("+254712345678").as_deref(),
            Some("254712345678")
        );
        assert_eq!(
            normalize_msisdn("254712345678").as_deref(),
            Some("254712345678")
        );
        assert_eq!(
            normalize_msisdn("0712345678").as_deref(),
            Some("254712345678")
        );
        assert_eq!(
            normalize_msisdn("712345678").as_deref(),
            Some("254712345678")
        );
        assert_eq!(
            normalize_msisdn("+254 712 345 678").as_deref(),
            Some("254712345678")
        );
    }

    #[test]
    fn test_normalize_msisdn_rejects_garbage() {
        assert_eq!(normalize_msisdn(""), None);
        assert_eq!(normalize_msisdn("12345"), None);
        assert_eq!(normalize_msisdn("notaphone"), None);
        assert_eq!(normalize_msisdn("254812345678"), None);
    }

    #[test]
    fn test_match_by_user_token() {
        let acc = account("a@example.com", "254712345678");
        let id = acc.id;
        let storage = storage_with(vec![acc]);

        assert_eq!(
            match_account(&storage, &format!("USER-{}", id.as_u64()), "0700000000"),
            Some(id)
        );
        assert_eq!(
            match_account(&storage, &format!("ACC-{}", id.as_u64()), "0700000000"),
            Some(id)
        );
    }

    #[test]
    fn test_match_by_bare_id() {
        let acc = account("a@example.com", "254712345678");
        let id = acc.id;
        let storage = storage_with(vec![acc]);

        assert_eq!(
            match_account(&storage, &id.to_string(), "0700000000"),
            Some(id)
        );
        assert_eq!(
            match_account(&storage, &id.as_u64().to_string(), "0700000000"),
            Some(id)
        );
    }

    #[test]
    fn test_token_for_missing_account_does_not_match() {
        let storage = storage_with(vec![]);
        assert_eq!(match_account(&storage, "USER-999999", "0700000000"), None);
    }

    #[test]
    fn test_match_by_email() {
        let acc = account("billing@acme.co.ke", "254712345678");
        let id = acc.id;
        let storage = storage_with(vec![acc]);

        assert_eq!(
            match_account(&storage, "billing@acme.co.ke", "0700000000"),
            Some(id)
        );
    }

    #[test]
    fn test_ambiguous_email_skipped() {
        let a = account("shared@example.com", "254712345678");
        let b = account("shared@example.com", "254712345679");
        let storage = storage_with(vec![a, b]);

        assert_eq!(
            match_account(&storage, "shared@example.com", "0700000000"),
            None
        );
    }

    #[test]
    fn test_match_by_phone() {
        let acc = account("a@example.com", "254712345678");
        let id = acc.id;
        let storage = storage_with(vec![acc]);

        assert_eq!(
            match_account(&storage, "no such ref", "+254712345678"),
            Some(id)
        );
        assert_eq!(match_account(&storage, "", "0712345678"), Some(id));
    }

    #[test]
    fn test_ambiguous_phone_skipped() {
        let a = account("a@example.com", "254712345678");
        let b = account("b@example.com", "254712345678");
        let storage = storage_with(vec![a, b]);

        assert_eq!(match_account(&storage, "no such ref", "0712345678"), None);
    }

    #[test]
    fn test_token_wins_over_phone() {
        let by_phone = account("a@example.com", "254712345678");
        let by_token = account("b@example.com", "254700000000");
        let token_id = by_token.id;
        let storage = storage_with(vec![by_phone, by_token]);

        assert_eq!(
            match_account(
                &storage,
                &format!("USER-{}", token_id.as_u64()),
                "0712345678"
            ),
            Some(token_id)
        );
    }

    #[test]
    fn test_nothing_matches() {
        let storage = storage_with(vec![account("a@example.com", "254712345678")]);
        assert_eq!(match_account(&storage, "random stuff", "0700000001"), None);
    }
}
