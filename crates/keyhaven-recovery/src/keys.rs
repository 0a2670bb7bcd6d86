//! Ledger key layout
//!
//! Vault ids are hex-encoded inside keys so that a prefix scan for one vault never
//! matches another vault whose id happens to extend it.

use keyhaven_core::{Address, KeyId, ProposalId, SessionId};

fn vault_segment(vault: &KeyId) -> String {
    hex::encode(vault.as_str())
}

pub(crate) fn vault(vault: &KeyId) -> String {
    format!("vault:{}", vault_segment(vault))
}

pub(crate) fn shamir_config(vault: &KeyId) -> String {
    format!("shamir:config:{}", vault_segment(vault))
}

pub(crate) fn share_prefix(vault: &KeyId) -> String {
    format!("shamir:share:{}:", vault_segment(vault))
}

/// Zero-padded so records scan in index order
pub(crate) fn share(vault: &KeyId, index: u8) -> String {
    format!("{}{index:03}", share_prefix(vault))
}

pub(crate) fn session(id: &SessionId) -> String {
    format!("shamir:session:{}", id.uuid())
}

pub(crate) fn social_config(vault: &KeyId) -> String {
    format!("social:config:{}", vault_segment(vault))
}

pub(crate) fn guardian_prefix(vault: &KeyId) -> String {
    format!("social:guardian:{}:", vault_segment(vault))
}

pub(crate) fn guardian(vault: &KeyId, address: &Address) -> String {
    format!("{}{address}", guardian_prefix(vault))
}

pub(crate) fn proposal(id: &ProposalId) -> String {
    format!("social:proposal:{}", id.uuid())
}

pub(crate) fn vote_prefix(id: &ProposalId) -> String {
    format!("social:vote:{}:", id.uuid())
}

pub(crate) fn vote(id: &ProposalId, guardian: &Address) -> String {
    format!("{}{guardian}", vote_prefix(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_keys_sort_by_index() {
        let v = KeyId::new("vault");
        assert!(share(&v, 2) < share(&v, 10));
        assert!(share(&v, 10).starts_with(&share_prefix(&v)));
    }

    #[test]
    fn vault_prefixes_do_not_overlap() {
        let a = KeyId::new("a");
        let ab = KeyId::new("a:b");
        assert!(!share(&ab, 1).starts_with(&share_prefix(&a)));
    }
}
