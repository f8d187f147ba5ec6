//! In-process firewall with the same token and duplicate semantics as the
//! real service.

use async_trait::async_trait;
use ipnet::IpNet;
use std::collections::{BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard};

use super::{
    is_accepted_entry, ChangeToken, IpSetId, IpSetSummary, RuleId, RuleSummary, WafClient,
    WafError, MAX_UPDATES_PER_CALL,
};

#[derive(Debug)]
struct StoredSet {
    id: IpSetId,
    name: String,
    entries: BTreeSet<IpNet>,
}

#[derive(Debug)]
struct StoredRule {
    id: RuleId,
    name: String,
    predicates: Vec<IpSetId>,
}

#[derive(Debug, Default)]
struct State {
    sets: Vec<StoredSet>,
    rules: Vec<StoredRule>,
    outstanding_tokens: HashSet<String>,
    next_id: u64,
    tokens_issued: u64,
    mutations: u64,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:04}", prefix, self.next_id)
    }

    fn consume(&mut self, token: ChangeToken) -> Result<(), WafError> {
        if self.outstanding_tokens.remove(token.as_str()) {
            self.mutations += 1;
            Ok(())
        } else {
            Err(WafError::StaleToken)
        }
    }
}

/// Firewall kept in memory.
#[derive(Debug)]
pub struct MemoryWaf {
    state: Mutex<State>,
    reject_duplicates: bool,
}

impl MemoryWaf {
    /// Empty firewall that rejects duplicate inserts, like the real service.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            reject_duplicates: true,
        }
    }

    /// Empty firewall that silently ignores duplicate inserts.
    pub fn accepting_duplicates() -> Self {
        Self {
            state: Mutex::new(State::default()),
            reject_duplicates: false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock cannot leave State half-updated
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a rule with no predicates.
    pub fn with_rule(self, name: &str) -> Self {
        {
            let mut state = self.lock();
            let id = RuleId(state.next_id("rule"));
            state.rules.push(StoredRule {
                id,
                name: name.to_string(),
                predicates: Vec::new(),
            });
        }
        self
    }

    /// Entries of the set named `name`, if it exists.
    pub fn entries(&self, name: &str) -> Option<BTreeSet<IpNet>> {
        self.lock()
            .sets
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.entries.clone())
    }

    /// Names of the sets referenced by the rule named `name`.
    pub fn rule_sets(&self, name: &str) -> Option<Vec<String>> {
        let state = self.lock();
        let rule = state.rules.iter().find(|r| r.name == name)?;
        Some(
            rule.predicates
                .iter()
                .filter_map(|id| state.sets.iter().find(|s| &s.id == id))
                .map(|s| s.name.clone())
                .collect(),
        )
    }

    /// Number of sets with this name.
    pub fn set_count(&self, name: &str) -> usize {
        self.lock().sets.iter().filter(|s| s.name == name).count()
    }

    pub fn tokens_issued(&self) -> u64 {
        self.lock().tokens_issued
    }

    /// Mutating calls that were accepted.
    pub fn mutations(&self) -> u64 {
        self.lock().mutations
    }
}

impl Default for MemoryWaf {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WafClient for MemoryWaf {
    async fn list_ip_sets(&self) -> Result<Vec<IpSetSummary>, WafError> {
        Ok(self
            .lock()
            .sets
            .iter()
            .map(|s| IpSetSummary {
                id: s.id.clone(),
                name: s.name.clone(),
            })
            .collect())
    }

    async fn create_ip_set(&self, name: &str, token: ChangeToken) -> Result<IpSetId, WafError> {
        let mut state = self.lock();
        state.consume(token)?;
        let id = IpSetId(state.next_id("ipset"));
        state.sets.push(StoredSet {
            id: id.clone(),
            name: name.to_string(),
            entries: BTreeSet::new(),
        });
        Ok(id)
    }

    async fn list_rules(&self) -> Result<Vec<RuleSummary>, WafError> {
        Ok(self
            .lock()
            .rules
            .iter()
            .map(|r| RuleSummary {
                id: r.id.clone(),
                name: r.name.clone(),
            })
            .collect())
    }

    async fn rule_ip_sets(&self, rule_id: &RuleId) -> Result<Vec<IpSetId>, WafError> {
        self.lock()
            .rules
            .iter()
            .find(|r| &r.id == rule_id)
            .map(|r| r.predicates.clone())
            .ok_or_else(|| WafError::NotFound(rule_id.to_string()))
    }

    async fn attach_ip_set(
        &self,
        rule_id: &RuleId,
        set_id: &IpSetId,
        token: ChangeToken,
    ) -> Result<(), WafError> {
        let mut state = self.lock();
        state.consume(token)?;
        if !state.sets.iter().any(|s| &s.id == set_id) {
            return Err(WafError::NotFound(set_id.to_string()));
        }
        let rule = state
            .rules
            .iter_mut()
            .find(|r| &r.id == rule_id)
            .ok_or_else(|| WafError::NotFound(rule_id.to_string()))?;
        if !rule.predicates.contains(set_id) {
            rule.predicates.push(set_id.clone());
        }
        Ok(())
    }

    async fn insert_ip_set_entries(
        &self,
        set_id: &IpSetId,
        entries: &[IpNet],
        token: ChangeToken,
    ) -> Result<(), WafError> {
        let reject_duplicates = self.reject_duplicates;
        let mut state = self.lock();
        state.consume(token)?;
        if entries.len() > MAX_UPDATES_PER_CALL {
            return Err(WafError::Service {
                code: "WAFLimitsExceededException".to_string(),
                message: format!("{} updates in one call", entries.len()),
            });
        }
        if let Some(bad) = entries.iter().find(|e| !is_accepted_entry(e)) {
            return Err(WafError::Service {
                code: "WAFInvalidParameterException".to_string(),
                message: format!("prefix length not supported: {}", bad),
            });
        }
        let set = state
            .sets
            .iter_mut()
            .find(|s| &s.id == set_id)
            .ok_or_else(|| WafError::NotFound(set_id.to_string()))?;

        // The batch is applied all-or-nothing
        if reject_duplicates && entries.iter().any(|e| set.entries.contains(e)) {
            return Err(WafError::DuplicateEntry);
        }
        set.entries.extend(entries.iter().copied());
        Ok(())
    }

    async fn get_change_token(&self) -> Result<ChangeToken, WafError> {
        let mut state = self.lock();
        state.tokens_issued += 1;
        let value = format!("token-{:06}", state.tokens_issued);
        state.outstanding_tokens.insert(value.clone());
        Ok(ChangeToken::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_token_is_single_use() {
        let waf = MemoryWaf::new();
        let token = waf.get_change_token().await.unwrap();
        let replay = ChangeToken::new(token.as_str());
        waf.create_ip_set("a", token).await.unwrap();
        let err = waf.create_ip_set("b", replay).await.unwrap_err();
        assert!(matches!(err, WafError::StaleToken));
    }

    #[tokio::test]
    async fn test_unknown_token_rejected() {
        let waf = MemoryWaf::new();
        let err = waf
            .create_ip_set("a", ChangeToken::new("forged"))
            .await
            .unwrap_err();
        assert!(matches!(err, WafError::StaleToken));
        assert_eq!(waf.mutations(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_batch_rejected_whole() {
        let waf = MemoryWaf::new();
        let id = waf
            .create_ip_set("ban", waf.get_change_token().await.unwrap())
            .await
            .unwrap();
        let token = waf.get_change_token().await.unwrap();
        waf.insert_ip_set_entries(&id, &[net("1.1.1.1/32")], token)
            .await
            .unwrap();

        let token = waf.get_change_token().await.unwrap();
        let err = waf
            .insert_ip_set_entries(&id, &[net("1.1.1.1/32"), net("2.2.2.2/32")], token)
            .await
            .unwrap_err();
        assert!(matches!(err, WafError::DuplicateEntry));
        assert_eq!(waf.entries("ban").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_accepting_duplicates() {
        let waf = MemoryWaf::accepting_duplicates();
        let id = waf
            .create_ip_set("ban", waf.get_change_token().await.unwrap())
            .await
            .unwrap();
        for _ in 0..2 {
            let token = waf.get_change_token().await.unwrap();
            waf.insert_ip_set_entries(&id, &[net("1.1.1.1/32")], token)
                .await
                .unwrap();
        }
        assert_eq!(waf.entries("ban").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_attach_to_missing_rule() {
        let waf = MemoryWaf::new();
        let id = waf
            .create_ip_set("ban", waf.get_change_token().await.unwrap())
            .await
            .unwrap();
        let token = waf.get_change_token().await.unwrap();
        let err = waf
            .attach_ip_set(&RuleId("nope".to_string()), &id, token)
            .await
            .unwrap_err();
        assert!(matches!(err, WafError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unsupported_prefix_rejected() {
        let waf = MemoryWaf::new();
        let id = waf
            .create_ip_set("allow", waf.get_change_token().await.unwrap())
            .await
            .unwrap();
        let token = waf.get_change_token().await.unwrap();
        let err = waf
            .insert_ip_set_entries(&id, &[net("172.16.0.0/12")], token)
            .await
            .unwrap_err();
        assert!(matches!(err, WafError::Service { ref code, .. } if code == "WAFInvalidParameterException"));
        assert!(waf.entries("allow").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rule_ip_sets() {
        let waf = MemoryWaf::new().with_rule("ban-rule");
        let rule = waf.list_rules().await.unwrap().remove(0);
        assert!(waf.rule_ip_sets(&rule.id).await.unwrap().is_empty());

        let id = waf
            .create_ip_set("ban", waf.get_change_token().await.unwrap())
            .await
            .unwrap();
        let token = waf.get_change_token().await.unwrap();
        waf.attach_ip_set(&rule.id, &id, token).await.unwrap();
        assert_eq!(waf.rule_ip_sets(&rule.id).await.unwrap(), vec![id]);

        let err = waf
            .rule_ip_sets(&RuleId("nope".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, WafError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_attach_records_predicate_once() {
        let waf = MemoryWaf::new().with_rule("ban-rule");
        let rule = waf.list_rules().await.unwrap().remove(0);
        let id = waf
            .create_ip_set("ban", waf.get_change_token().await.unwrap())
            .await
            .unwrap();
        for _ in 0..2 {
            let token = waf.get_change_token().await.unwrap();
            waf.attach_ip_set(&rule.id, &id, token).await.unwrap();
        }
        assert_eq!(waf.rule_sets("ban-rule").unwrap(), vec!["ban".to_string()]);
    }
}
