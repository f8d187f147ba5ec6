//! Converge a named firewall IP set onto a desired member set.
//!
//! Per set: look it up by name, create and attach it to its rule when
//! absent, then insert the desired members. Updates are insert-only, so a
//! member present in the firewall but absent from the desired set stays.
//!
//! A set that already exists is not re-attached. Its rule is read back and
//! a warning is logged when the rule no longer references it.

use ipnet::IpNet;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::error::ReconcileError;
use crate::waf::{ChangeToken, IpSetId, WafClient, WafError, MAX_UPDATES_PER_CALL};

/// What one reconcile call did to one set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub set_name: String,
    pub set_id: IpSetId,
    /// The set did not exist and was created and attached
    pub created: bool,
    /// Whether the rule references the set; `None` when that could not be read
    pub enforced: Option<bool>,
    pub requested: usize,
    pub inserted: usize,
    pub already_present: usize,
}

/// Drives one firewall client through the lookup/create/attach/update steps.
pub struct Reconciler<'a> {
    waf: &'a dyn WafClient,
}

impl<'a> Reconciler<'a> {
    pub fn new(waf: &'a dyn WafClient) -> Self {
        Self { waf }
    }

    /// Make sure `set_name` exists, is enforced by `rule_name` and holds
    /// every member of `desired`.
    pub async fn reconcile(
        &self,
        set_name: &str,
        rule_name: &str,
        desired: &BTreeSet<IpNet>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let (set_id, created, enforced) = match self.find_set(set_name).await? {
            Some(id) => {
                debug!("IP set '{}' found as {}", set_name, id);
                let enforced = self.check_enforced(set_name, &id, rule_name).await;
                (id, false, enforced)
            }
            None => (
                self.create_and_attach(set_name, rule_name).await?,
                true,
                Some(true),
            ),
        };

        let mut outcome = ReconcileOutcome {
            set_name: set_name.to_string(),
            set_id,
            created,
            enforced,
            requested: desired.len(),
            inserted: 0,
            already_present: 0,
        };

        let members: Vec<IpNet> = desired.iter().copied().collect();
        for chunk in members.chunks(MAX_UPDATES_PER_CALL) {
            let token = self.fresh_token(set_name).await?;
            match self
                .waf
                .insert_ip_set_entries(&outcome.set_id, chunk, token)
                .await
            {
                Ok(()) => outcome.inserted += chunk.len(),
                Err(WafError::DuplicateEntry) => {
                    debug!(
                        "IP set '{}': batch of {} has known members, inserting one by one",
                        set_name,
                        chunk.len()
                    );
                    let (inserted, present) = self
                        .insert_individually(set_name, &outcome.set_id, chunk)
                        .await?;
                    outcome.inserted += inserted;
                    outcome.already_present += present;
                }
                Err(source) => return Err(call_error(set_name, "UpdateIPSet", source)),
            }
        }

        info!(
            "IP set '{}': {} requested, {} inserted, {} already present",
            set_name, outcome.requested, outcome.inserted, outcome.already_present
        );
        Ok(outcome)
    }

    async fn find_set(&self, set_name: &str) -> Result<Option<IpSetId>, ReconcileError> {
        let sets = self
            .waf
            .list_ip_sets()
            .await
            .map_err(|e| call_error(set_name, "ListIPSets", e))?;
        Ok(sets.into_iter().find(|s| s.name == set_name).map(|s| s.id))
    }

    /// Read back whether `rule_name` references the existing set. Failures
    /// only warn; the set is still updated.
    async fn check_enforced(
        &self,
        set_name: &str,
        set_id: &IpSetId,
        rule_name: &str,
    ) -> Option<bool> {
        let rules = match self.waf.list_rules().await {
            Ok(rules) => rules,
            Err(e) => {
                warn!(
                    "IP set '{}': could not list rules to check enforcement: {}",
                    set_name, e
                );
                return None;
            }
        };
        let Some(rule) = rules.into_iter().find(|r| r.name == rule_name) else {
            warn!(
                "IP set '{}' exists but rule '{}' does not, the set is not enforced",
                set_name, rule_name
            );
            return Some(false);
        };
        match self.waf.rule_ip_sets(&rule.id).await {
            Ok(sets) if sets.contains(set_id) => Some(true),
            Ok(_) => {
                warn!(
                    "IP set '{}' ({}) is not referenced by rule '{}', the set is not enforced",
                    set_name, set_id, rule_name
                );
                Some(false)
            }
            Err(e) => {
                warn!(
                    "IP set '{}': could not read rule '{}' to check enforcement: {}",
                    set_name, rule_name, e
                );
                None
            }
        }
    }

    async fn create_and_attach(
        &self,
        set_name: &str,
        rule_name: &str,
    ) -> Result<IpSetId, ReconcileError> {
        let token = self.fresh_token(set_name).await?;
        let set_id = self
            .waf
            .create_ip_set(set_name, token)
            .await
            .map_err(|e| call_error(set_name, "CreateIPSet", e))?;
        info!("Created IP set '{}' ({})", set_name, set_id);

        let unenforced = |source: WafError| ReconcileError::Unenforced {
            set: set_name.to_string(),
            set_id: set_id.to_string(),
            rule: rule_name.to_string(),
            source,
        };

        let rules = self.waf.list_rules().await.map_err(unenforced)?;
        let Some(rule) = rules.into_iter().find(|r| r.name == rule_name) else {
            warn!(
                "IP set '{}' was created but rule '{}' does not exist",
                set_name, rule_name
            );
            return Err(ReconcileError::RuleNotFound {
                set: set_name.to_string(),
                rule: rule_name.to_string(),
            });
        };

        let token = self.waf.get_change_token().await.map_err(unenforced)?;
        self.waf
            .attach_ip_set(&rule.id, &set_id, token)
            .await
            .map_err(unenforced)?;
        info!("Attached IP set '{}' to rule '{}'", set_name, rule_name);
        Ok(set_id)
    }

    /// Insert members one call each; a duplicate rejection means the member
    /// is already there.
    async fn insert_individually(
        &self,
        set_name: &str,
        set_id: &IpSetId,
        members: &[IpNet],
    ) -> Result<(usize, usize), ReconcileError> {
        let mut inserted = 0;
        let mut present = 0;
        for member in members {
            let token = self.fresh_token(set_name).await?;
            match self
                .waf
                .insert_ip_set_entries(set_id, std::slice::from_ref(member), token)
                .await
            {
                Ok(()) => inserted += 1,
                Err(WafError::DuplicateEntry) => present += 1,
                Err(source) => return Err(call_error(set_name, "UpdateIPSet", source)),
            }
        }
        Ok((inserted, present))
    }

    async fn fresh_token(&self, set_name: &str) -> Result<ChangeToken, ReconcileError> {
        self.waf
            .get_change_token()
            .await
            .map_err(|e| call_error(set_name, "GetChangeToken", e))
    }
}

fn call_error(set: &str, call: &'static str, source: WafError) -> ReconcileError {
    ReconcileError::Call {
        set: set.to_string(),
        call,
        source,
    }
}
