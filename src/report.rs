//! Run summary in text or JSON form.

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::Serialize;
use std::collections::BTreeSet;
use std::net::IpAddr;

use crate::reconciler::ReconcileOutcome;
use crate::utils::{format_count, format_elapsed};
use crate::window::PartitionKey;

/// Report output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Json,
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            _ => Err(format!("Unknown format: {}. Use text or json", s)),
        }
    }
}

/// Counters collected while scanning one partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub archives_read: u64,
    pub archives_failed: u64,
    pub lines_read: u64,
    pub malformed: u64,
    pub excluded: u64,
    pub counted: u64,
}

/// A client at or above the ban threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BannedClient {
    pub ip: IpAddr,
    pub requests: u64,
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub reference: DateTime<Utc>,
    pub window_floor: DateTime<Utc>,
    pub partition_key: PartitionKey,
    pub threshold: u64,
    pub dry_run: bool,
    #[serde(flatten)]
    pub scan: ScanStats,
    pub distinct_ips: usize,
    /// Highest request count first
    pub banned: Vec<BannedClient>,
    pub allowed: Vec<IpNet>,
    pub unresolved_hosts: Vec<String>,
    pub reconciled: Vec<ReconcileOutcome>,
    pub elapsed_ms: u64,
}

impl RunReport {
    /// Banned addresses without their counts.
    pub fn ban_set(&self) -> BTreeSet<IpAddr> {
        self.banned.iter().map(|b| b.ip).collect()
    }

    pub fn render(&self, format: ReportFormat, verbose: bool) -> serde_json::Result<String> {
        match format {
            ReportFormat::Text => Ok(self.format_text(verbose)),
            ReportFormat::Json => serde_json::to_string_pretty(self),
        }
    }

    fn format_text(&self, verbose: bool) -> String {
        let mut out = String::new();

        out.push_str(&format!(
            "Window {} ({})\n",
            self.window_floor.format("%Y-%m-%d %H:%M UTC"),
            self.partition_key
        ));
        out.push_str(&format!(
            "Archives: {} read, {} failed\n",
            self.scan.archives_read, self.scan.archives_failed
        ));
        out.push_str(&format!(
            "Lines: {} read, {} counted, {} excluded, {} malformed\n",
            format_count(self.scan.lines_read),
            format_count(self.scan.counted),
            format_count(self.scan.excluded),
            format_count(self.scan.malformed)
        ));
        out.push_str(&format!(
            "Clients: {} distinct, threshold {}\n",
            format_count(self.distinct_ips as u64),
            self.threshold
        ));

        if self.banned.is_empty() {
            out.push_str("\n[OK] No client reached the threshold\n");
        } else {
            out.push_str(&format!("\nBanned ({}):\n", self.banned.len()));
            for client in &self.banned {
                out.push_str(&format!(
                    "  {:<40} {:>8}\n",
                    client.ip,
                    format_count(client.requests)
                ));
            }
        }

        if verbose {
            out.push_str(&format!("\nAllowed ({}):\n", self.allowed.len()));
            for net in &self.allowed {
                out.push_str(&format!("  {}\n", net));
            }
        }
        for host in &self.unresolved_hosts {
            out.push_str(&format!("[WARN] Trusted host {} did not resolve\n", host));
        }

        if self.dry_run {
            out.push_str("\n[INFO] Dry-run mode: firewall not updated\n");
        }
        for outcome in &self.reconciled {
            out.push_str(&format!(
                "[OK] IP set '{}'{}: {} inserted, {} already present\n",
                outcome.set_name,
                if outcome.created { " (created)" } else { "" },
                outcome.inserted,
                outcome.already_present
            ));
            if outcome.enforced == Some(false) {
                out.push_str(&format!(
                    "[WARN] IP set '{}' is not referenced by its rule\n",
                    outcome.set_name
                ));
            }
        }
        out.push_str(&format!(
            "Completed in {}\n",
            format_elapsed(std::time::Duration::from_millis(self.elapsed_ms))
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waf::IpSetId;
    use chrono::TimeZone;

    fn report() -> RunReport {
        let floor = Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 0).unwrap();
        RunReport {
            reference: floor,
            window_floor: floor,
            partition_key: PartitionKey::from("AWSLogs/1/elb/r/2024/03/07/x"),
            threshold: 50,
            dry_run: false,
            scan: ScanStats {
                archives_read: 1,
                lines_read: 70,
                counted: 70,
                ..Default::default()
            },
            distinct_ips: 2,
            banned: vec![BannedClient {
                ip: "1.2.3.4".parse().unwrap(),
                requests: 60,
            }],
            allowed: vec!["10.0.0.0/8".parse().unwrap()],
            unresolved_hosts: vec!["gone.example.com".to_string()],
            reconciled: vec![ReconcileOutcome {
                set_name: "ban".to_string(),
                set_id: IpSetId("set-1".to_string()),
                created: true,
                enforced: Some(true),
                requested: 1,
                inserted: 1,
                already_present: 0,
            }],
            elapsed_ms: 120,
        }
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("json".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert_eq!("TXT".parse::<ReportFormat>().unwrap(), ReportFormat::Text);
        assert!("markdown".parse::<ReportFormat>().is_err());
    }

    #[test]
    fn test_text_lists_banned_clients() {
        let text = report().render(ReportFormat::Text, false).unwrap();
        assert!(text.contains("Banned (1)"));
        assert!(text.contains("1.2.3.4"));
        assert!(text.contains("[OK] IP set 'ban' (created): 1 inserted"));
        assert!(text.contains("[WARN] Trusted host gone.example.com"));
        assert!(!text.contains("Allowed"));
    }

    #[test]
    fn test_text_warns_about_unenforced_set() {
        let mut report = report();
        report.reconciled[0].created = false;
        report.reconciled[0].enforced = Some(false);
        let text = report.render(ReportFormat::Text, false).unwrap();
        assert!(text.contains("[OK] IP set 'ban': 1 inserted"));
        assert!(text.contains("[WARN] IP set 'ban' is not referenced by its rule"));

        report.reconciled[0].enforced = None;
        let text = report.render(ReportFormat::Text, false).unwrap();
        assert!(!text.contains("not referenced"));
    }

    #[test]
    fn test_text_verbose_lists_allowed() {
        let text = report().render(ReportFormat::Text, true).unwrap();
        assert!(text.contains("Allowed (1)"));
        assert!(text.contains("10.0.0.0/8"));
    }

    #[test]
    fn test_json_flattens_scan_stats() {
        let json: serde_json::Value =
            serde_json::from_str(&report().render(ReportFormat::Json, false).unwrap()).unwrap();
        assert_eq!(json["lines_read"], 70);
        assert_eq!(json["banned"][0]["ip"], "1.2.3.4");
        assert_eq!(json["banned"][0]["requests"], 60);
        assert_eq!(json["reconciled"][0]["set_id"], "set-1");
    }

    #[test]
    fn test_ban_set() {
        let set = report().ban_set();
        assert!(set.contains(&"1.2.3.4".parse::<IpAddr>().unwrap()));
        assert_eq!(set.len(), 1);
    }
}
