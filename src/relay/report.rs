use serde::Serialize;

use super::error::RelayError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryResult {
    pub target_server_id: String,
    pub channel_id: String,
    pub success: bool,
    pub delivered_message_id: Option<String>,
    pub error: Option<String>,
}

impl DeliveryResult {
    pub fn delivered(target_server_id: &str, channel_id: &str, message_id: String) -> Self {
        Self {
            target_server_id: target_server_id.to_string(),
            channel_id: channel_id.to_string(),
            success: true,
            delivered_message_id: Some(message_id),
            error: None,
        }
    }

    pub fn failed(target_server_id: &str, channel_id: &str, error: &RelayError) -> Self {
        Self {
            target_server_id: target_server_id.to_string(),
            channel_id: channel_id.to_string(),
            success: false,
            delivered_message_id: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedTarget {
    pub server_id: String,
    pub error: String,
}

/// Outcome of one fan-out. Counts are derived from the results, so
/// `total == successful + failed` holds for every report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayReport {
    total: usize,
    successful: usize,
    failed: usize,
    failures: Vec<FailedTarget>,
    results: Vec<DeliveryResult>,
}

impl RelayReport {
    pub fn from_results(results: Vec<DeliveryResult>) -> Self {
        let failures: Vec<FailedTarget> = results
            .iter()
            .filter(|r| !r.success)
            .map(|r| FailedTarget {
                server_id: r.target_server_id.clone(),
                error: r.error.clone().unwrap_or_else(|| "unknown error".to_string()),
            })
            .collect();

        Self {
            total: results.len(),
            successful: results.len() - failures.len(),
            failed: failures.len(),
            failures,
            results,
        }
    }

    pub fn empty() -> Self {
        Self::from_results(Vec::new())
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn successful(&self) -> usize {
        self.successful
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn failures(&self) -> &[FailedTarget] {
        &self.failures
    }

    pub fn results(&self) -> &[DeliveryResult] {
        &self.results
    }

    pub fn failed_server_ids(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.server_id.as_str()).collect()
    }
}

/// Result of one orchestrator invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RelayOutcome {
    /// The routing table has never been loaded; nothing is relayed.
    NotReady,
    NotConfigured { channel_id: String },
    NoTargets { category: String },
    Completed(RelayReport),
}

impl RelayOutcome {
    /// The report for this outcome. Short-circuited outcomes yield an empty
    /// report.
    pub fn report(&self) -> RelayReport {
        match self {
            RelayOutcome::Completed(report) => report.clone(),
            _ => RelayReport::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(server: &str, ok: bool) -> DeliveryResult {
        if ok {
            DeliveryResult::delivered(server, "c", "m".to_string())
        } else {
            DeliveryResult::failed(
                server,
                "c",
                &RelayError::ChannelUnavailable {
                    channel_id: "c".to_string(),
                },
            )
        }
    }

    #[test]
    fn counts_always_add_up() {
        for size in 0..6 {
            let results: Vec<DeliveryResult> =
                (0..size).map(|i| result(&i.to_string(), i % 2 == 0)).collect();
            let report = RelayReport::from_results(results);

            assert_eq!(report.total(), size);
            assert_eq!(report.total(), report.successful() + report.failed());
            assert_eq!(report.failures().len(), report.failed());
        }
    }

    #[test]
    fn failures_carry_server_and_error() {
        let report = RelayReport::from_results(vec![result("1", true), result("2", false)]);

        assert_eq!(report.failed_server_ids(), vec!["2"]);
        assert_eq!(report.failures()[0].error, "channel unavailable: c");
    }

    #[test]
    fn short_circuit_outcomes_have_empty_reports() {
        let outcome = RelayOutcome::NoTargets {
            category: "alerts".to_string(),
        };
        assert_eq!(outcome.report().total(), 0);
        assert_eq!(RelayOutcome::NotReady.report(), RelayReport::empty());
    }
}
