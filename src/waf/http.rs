//! JSON-over-HTTP client for the WAF Classic API.
//!
//! Requests go to a single endpoint with the operation named in the
//! `X-Amz-Target` header, prefixed for the configured [`WafApi`]. Request
//! signing is left to whatever sits at the endpoint (usually a SigV4 signing
//! proxy); this client only sends a bearer token.

use async_trait::async_trait;
use ipnet::IpNet;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{
    ChangeToken, IpSetId, IpSetSummary, RuleId, RuleSummary, WafApi, WafClient, WafError,
};
use crate::config::SecureString;

const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const PAGE_LIMIT: u32 = 100;

/// HTTP client for the firewall service
pub struct HttpWafClient {
    client: Client,
    endpoint: String,
    target_prefix: &'static str,
    token: SecureString,
}

impl HttpWafClient {
    pub fn new(
        endpoint: &str,
        api: WafApi,
        token: SecureString,
        timeout: Duration,
    ) -> Result<Self, WafError> {
        if !endpoint.starts_with("https://") && !endpoint.starts_with("http://") {
            return Err(WafError::Transport(format!(
                "endpoint must be an http(s) URL: {}",
                endpoint
            )));
        }
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("ddosban/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WafError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            target_prefix: api.target_prefix(),
            token,
        })
    }

    async fn call<Req, Resp>(&self, operation: &'static str, body: &Req) -> Result<Resp, WafError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        debug!("WAF {}", operation);
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", CONTENT_TYPE)
            .header("X-Amz-Target", format!("{}.{}", self.target_prefix, operation))
            .json(body);
        if !self.token.is_empty() {
            request = request.bearer_auth(self.token.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| WafError::Transport(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| WafError::Transport(e.to_string()))?;

        if status.is_success() {
            serde_json::from_str(&text)
                .map_err(|e| WafError::InvalidResponse(format!("{}: {}", operation, e)))
        } else {
            Err(classify_error(operation, status.as_u16(), &text))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type", default)]
    error_type: String,
    #[serde(alias = "Message", default)]
    message: String,
}

/// Map a failed response onto [`WafError`].
fn classify_error(operation: &str, status: u16, body: &str) -> WafError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or(ErrorBody {
        error_type: String::new(),
        message: body.chars().take(200).collect(),
    });
    // "com.amazonaws.waf#WAFStaleDataException" -> "WAFStaleDataException"
    let code = parsed
        .error_type
        .rsplit('#')
        .next()
        .unwrap_or_default()
        .to_string();

    match code.as_str() {
        "WAFStaleDataException" => WafError::StaleToken,
        "WAFNonexistentItemException" => WafError::NotFound(parsed.message),
        "WAFDuplicateItemException" => WafError::DuplicateEntry,
        "WAFInvalidOperationException" if operation == "UpdateIPSet" => WafError::DuplicateEntry,
        "" => WafError::Service {
            code: format!("HTTP {}", status),
            message: parsed.message,
        },
        _ => WafError::Service {
            code,
            message: parsed.message,
        },
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ListRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    next_marker: Option<String>,
    limit: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListIpSetsResponse {
    #[serde(rename = "IPSets", default)]
    ip_sets: Vec<IpSetSummaryWire>,
    next_marker: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IpSetSummaryWire {
    #[serde(rename = "IPSetId")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListRulesResponse {
    #[serde(default)]
    rules: Vec<RuleSummaryWire>,
    next_marker: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RuleSummaryWire {
    rule_id: String,
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetRuleRequest<'a> {
    rule_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetRuleResponse {
    rule: RuleWire,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RuleWire {
    #[serde(default)]
    predicates: Vec<PredicateWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PredicateWire {
    #[serde(rename = "Type")]
    kind: String,
    data_id: String,
}

impl GetRuleResponse {
    fn ip_sets(self) -> Vec<IpSetId> {
        self.rule
            .predicates
            .into_iter()
            .filter(|p| p.kind == "IPMatch")
            .map(|p| IpSetId(p.data_id))
            .collect()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateIpSetRequest<'a> {
    name: &'a str,
    change_token: String,
}

#[derive(Debug, Deserialize)]
struct CreateIpSetResponse {
    #[serde(rename = "IPSet")]
    ip_set: IpSetSummaryWire,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct UpdateRuleRequest<'a> {
    rule_id: &'a str,
    change_token: String,
    updates: Vec<RuleUpdate<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct RuleUpdate<'a> {
    action: &'static str,
    predicate: Predicate<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Predicate<'a> {
    negated: bool,
    #[serde(rename = "Type")]
    kind: &'static str,
    data_id: &'a str,
}

#[derive(Debug, Serialize)]
struct UpdateIpSetRequest<'a> {
    #[serde(rename = "IPSetId")]
    ip_set_id: &'a str,
    #[serde(rename = "ChangeToken")]
    change_token: String,
    #[serde(rename = "Updates")]
    updates: Vec<IpSetUpdate>,
}

#[derive(Debug, Serialize)]
struct IpSetUpdate {
    #[serde(rename = "Action")]
    action: &'static str,
    #[serde(rename = "IPSetDescriptor")]
    descriptor: IpSetDescriptor,
}

#[derive(Debug, Serialize)]
struct IpSetDescriptor {
    #[serde(rename = "Type")]
    kind: &'static str,
    #[serde(rename = "Value")]
    value: String,
}

impl IpSetDescriptor {
    fn from_net(net: &IpNet) -> Self {
        let kind = match net {
            IpNet::V4(_) => "IPV4",
            IpNet::V6(_) => "IPV6",
        };
        Self {
            kind,
            value: net.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Empty {}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ChangeTokenResponse {
    change_token: String,
}

#[derive(Debug, Deserialize)]
struct Ignored {}

fn update_ip_set_body<'a>(
    set_id: &'a IpSetId,
    entries: &[IpNet],
    token: ChangeToken,
) -> UpdateIpSetRequest<'a> {
    UpdateIpSetRequest {
        ip_set_id: &set_id.0,
        change_token: token.into_inner(),
        updates: entries
            .iter()
            .map(|net| IpSetUpdate {
                action: "INSERT",
                descriptor: IpSetDescriptor::from_net(net),
            })
            .collect(),
    }
}

#[async_trait]
impl WafClient for HttpWafClient {
    async fn list_ip_sets(&self) -> Result<Vec<IpSetSummary>, WafError> {
        let mut sets = Vec::new();
        let mut marker = None;
        loop {
            let page: ListIpSetsResponse = self
                .call(
                    "ListIPSets",
                    &ListRequest {
                        next_marker: marker.take(),
                        limit: PAGE_LIMIT,
                    },
                )
                .await?;
            let page_len = page.ip_sets.len();
            sets.extend(page.ip_sets.into_iter().map(|s| IpSetSummary {
                id: IpSetId(s.id),
                name: s.name,
            }));
            match page.next_marker {
                Some(next) if page_len > 0 && !next.is_empty() => marker = Some(next),
                _ => break,
            }
        }
        Ok(sets)
    }

    async fn create_ip_set(&self, name: &str, token: ChangeToken) -> Result<IpSetId, WafError> {
        let response: CreateIpSetResponse = self
            .call(
                "CreateIPSet",
                &CreateIpSetRequest {
                    name,
                    change_token: token.into_inner(),
                },
            )
            .await?;
        Ok(IpSetId(response.ip_set.id))
    }

    async fn list_rules(&self) -> Result<Vec<RuleSummary>, WafError> {
        let mut rules = Vec::new();
        let mut marker = None;
        loop {
            let page: ListRulesResponse = self
                .call(
                    "ListRules",
                    &ListRequest {
                        next_marker: marker.take(),
                        limit: PAGE_LIMIT,
                    },
                )
                .await?;
            let page_len = page.rules.len();
            rules.extend(page.rules.into_iter().map(|r| RuleSummary {
                id: RuleId(r.rule_id),
                name: r.name,
            }));
            match page.next_marker {
                Some(next) if page_len > 0 && !next.is_empty() => marker = Some(next),
                _ => break,
            }
        }
        Ok(rules)
    }

    async fn rule_ip_sets(&self, rule_id: &RuleId) -> Result<Vec<IpSetId>, WafError> {
        let response: GetRuleResponse = self
            .call("GetRule", &GetRuleRequest { rule_id: &rule_id.0 })
            .await?;
        Ok(response.ip_sets())
    }

    async fn attach_ip_set(
        &self,
        rule_id: &RuleId,
        set_id: &IpSetId,
        token: ChangeToken,
    ) -> Result<(), WafError> {
        let body = UpdateRuleRequest {
            rule_id: &rule_id.0,
            change_token: token.into_inner(),
            updates: vec![RuleUpdate {
                action: "INSERT",
                predicate: Predicate {
                    negated: false,
                    kind: "IPMatch",
                    data_id: &set_id.0,
                },
            }],
        };
        let _: Ignored = self.call("UpdateRule", &body).await?;
        Ok(())
    }

    async fn insert_ip_set_entries(
        &self,
        set_id: &IpSetId,
        entries: &[IpNet],
        token: ChangeToken,
    ) -> Result<(), WafError> {
        let body = update_ip_set_body(set_id, entries, token);
        let _: Ignored = self.call("UpdateIPSet", &body).await?;
        Ok(())
    }

    async fn get_change_token(&self) -> Result<ChangeToken, WafError> {
        let response: ChangeTokenResponse = self.call("GetChangeToken", &Empty {}).await?;
        Ok(ChangeToken::new(response.change_token))
    }
}
