//! Logging infrastructure and end-of-session reporting
//!
//! Structured logging via `tracing` with configurable output, correlation
//! IDs for tying a session's log lines together, the shared dissemination
//! counters, and the JSON session report emitted at teardown.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::{format::FmtSpan, time::UtcTime},
    layer::SubscriberExt,
    Layer, Registry,
};
use uuid::Uuid;

use crate::error::RumorError;
use crate::peer::PeerId;

/// Correlation ID for tracking one gossip session across log lines
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a new random correlation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get a short string representation for logging
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Log configuration for different environments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level filter
    pub level: String,
    /// Enable structured JSON output
    pub json: bool,
    /// Enable ANSI colors in output
    pub colors: bool,
    /// Include file and line numbers
    pub include_location: bool,
    /// Include thread names
    pub include_thread: bool,
    /// Include span information
    pub include_spans: bool,
    /// Custom log targets and their levels
    pub targets: HashMap<String, String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            colors: true,
            include_location: true,
            include_thread: true,
            include_spans: true,
            targets: HashMap::new(),
        }
    }
}

/// Initialize logging with the given configuration
pub fn init_logging(config: &LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut env_filter = EnvFilter::new(&config.level);

    for (target, level) in &config.targets {
        env_filter = env_filter.add_directive(format!("{}={}", target, level).parse()?);
    }

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_level(true)
        .with_thread_names(config.include_thread)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_span_events(if config.include_spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        });

    let subscriber = Registry::default().with(env_filter).with(if config.json {
        fmt_layer.json().boxed()
    } else if config.colors {
        fmt_layer.boxed()
    } else {
        fmt_layer.with_ansi(false).boxed()
    });

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Production logging configuration
pub fn production_config() -> LogConfig {
    LogConfig {
        level: "info".to_string(),
        json: true,
        colors: false,
        include_location: false,
        include_thread: true,
        include_spans: false,
        targets: [("rumornet".to_string(), "info".to_string())]
            .into_iter()
            .collect(),
    }
}

/// Development logging configuration
pub fn development_config() -> LogConfig {
    LogConfig {
        level: "debug".to_string(),
        json: false,
        colors: true,
        include_location: true,
        include_thread: true,
        include_spans: true,
        targets: [
            ("rumornet".to_string(), "debug".to_string()),
            ("tokio".to_string(), "info".to_string()),
        ]
        .into_iter()
        .collect(),
    }
}

/// Shared dissemination counters, guarded by their own lock at runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageStats {
    /// Messages originated by this node
    pub produced: u64,
    /// Messages accepted from peers (after dedup)
    pub received: u64,
    /// Messages written to peers
    pub transmitted: u64,
    /// Sum of delays between successive productions, in seconds
    pub produced_delay_total_secs: f64,
}

impl MessageStats {
    /// Average delay between productions, in seconds.
    pub fn produced_delay_avg_secs(&self) -> f64 {
        if self.produced == 0 {
            0.0
        } else {
            self.produced_delay_total_secs / self.produced as f64
        }
    }
}

/// Per-peer slice of the session report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSessionSummary {
    /// The peer this summary describes
    pub peer: PeerId,
    /// Completed gossip sessions with this peer
    pub sessions: u64,
    /// Total time spent connected to this peer, in seconds
    pub connected_secs: f64,
}

/// End-of-run summary handed to the external reporting collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    /// This node's ID
    pub node: PeerId,
    /// Wall-clock duration of the run, in seconds
    pub duration_secs: f64,
    /// Final dissemination counters
    pub stats: MessageStats,
    /// Average delay between productions, in seconds
    pub produced_delay_avg_secs: f64,
    /// Peers this node completed at least one session with
    pub peers: Vec<PeerSessionSummary>,
}

impl SessionReport {
    /// Serialize the report as pretty JSON.
    pub fn to_json(&self) -> Result<String, RumorError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Human-readable block for the teardown log.
    pub fn text_summary(&self) -> String {
        let connected = self.peers.iter().filter(|p| p.sessions > 0).count();
        format!(
            "end of session\n\
             | Node                 : {}\n\
             | Duration             : {:.1} secs\n\
             | Peers Connected      : {}\n\
             | Messages Produced    : {} (avg. delay = {:.3} secs)\n\
             | Messages Received    : {}\n\
             | Messages Transmitted : {}",
            self.node,
            self.duration_secs,
            connected,
            self.stats.produced,
            self.produced_delay_avg_secs,
            self.stats.received,
            self.stats.transmitted,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_id_generation() {
        let id1 = CorrelationId::new();
        let id2 = CorrelationId::new();
        assert_ne!(id1, id2);
        assert_eq!(id1.short().len(), 8);
    }

    #[test]
    fn test_log_config_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert!(!config.json);
        assert!(config.colors);
        assert!(config.include_location);
    }

    #[test]
    fn test_stats_delay_average() {
        let mut stats = MessageStats::default();
        assert_eq!(stats.produced_delay_avg_secs(), 0.0);

        stats.produced = 4;
        stats.produced_delay_total_secs = 10.0;
        assert_eq!(stats.produced_delay_avg_secs(), 2.5);
    }

    #[test]
    fn test_report_serialization() {
        let report = SessionReport {
            node: PeerId(8600),
            duration_secs: 120.5,
            stats: MessageStats {
                produced: 3,
                received: 7,
                transmitted: 12,
                produced_delay_total_secs: 6.0,
            },
            produced_delay_avg_secs: 2.0,
            peers: vec![PeerSessionSummary {
                peer: PeerId(9026),
                sessions: 2,
                connected_secs: 0.4,
            }],
        };

        let json = report.to_json().unwrap();
        let parsed: SessionReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.node, PeerId(8600));
        assert_eq!(parsed.stats.received, 7);
        assert_eq!(parsed.peers.len(), 1);

        let text = report.text_summary();
        assert!(text.contains("Messages Received    : 7"));
        assert!(text.contains("Peers Connected      : 1"));
    }
}
