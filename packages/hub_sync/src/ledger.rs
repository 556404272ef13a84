//! Token usage metering.
//!
//! Records arrive either in bulk when a session is selected or one at a time as
//! `token_usage` broadcasts. Per-message entries are last-write-wins; the
//! per-session totals are running sums.

use std::collections::HashMap;

use tracing::debug;

use crate::models::{SessionTokenUsage, TokenUsageRecord, TokenUsageStats};

#[derive(Debug, Clone, Default)]
pub struct TokenUsageLedger {
    by_message: HashMap<i64, TokenUsageRecord>,
    by_session: HashMap<i64, TokenUsageStats>,
    latest: Option<TokenUsageRecord>,
}

impl TokenUsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a broadcast payload. Malformed payloads yield `None`.
    pub fn parse(content: &str, session_id: i64) -> Option<TokenUsageRecord> {
        match serde_json::from_str::<TokenUsageRecord>(content) {
            Ok(mut record) => {
                if record.session_id == 0 {
                    record.session_id = session_id;
                }
                Some(record)
            }
            Err(e) => {
                debug!(session_id, error = %e, "discarding malformed token usage payload");
                None
            }
        }
    }

    /// Record one broadcast usage record.
    pub fn record(&mut self, record: TokenUsageRecord, current_session: i64) {
        self.by_session
            .entry(record.session_id)
            .or_default()
            .add(&record);
        if record.session_id == current_session {
            self.latest = Some(record.clone());
        }
        self.by_message.insert(record.message_id, record);
    }

    /// Seed the ledger from a session fetch. The server aggregate replaces the
    /// local running total for that session.
    pub fn load_session(&mut self, session_id: i64, usage: SessionTokenUsage) {
        self.latest = usage.records.last().cloned();
        for record in usage.records {
            self.by_message.insert(record.message_id, record);
        }
        self.by_session.insert(session_id, usage.stats);
    }

    /// Forget the "most recent" record, as when the view switches sessions.
    pub fn clear_latest(&mut self) {
        self.latest = None;
    }

    pub fn for_message(&self, message_id: i64) -> Option<&TokenUsageRecord> {
        self.by_message.get(&message_id)
    }

    pub fn session_total(&self, session_id: i64) -> TokenUsageStats {
        self.by_session.get(&session_id).copied().unwrap_or_default()
    }

    pub fn latest(&self) -> Option<&TokenUsageRecord> {
        self.latest.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(session_id: i64, message_id: i64, input: i64) -> TokenUsageRecord {
        TokenUsageRecord {
            session_id,
            message_id,
            input_tokens: input,
            output_tokens: 1,
            ..Default::default()
        }
    }

    #[test]
    fn message_index_is_last_write_wins() {
        let mut ledger = TokenUsageLedger::new();
        ledger.record(record(1, 10, 5), 1);
        ledger.record(record(1, 10, 8), 1);
        assert_eq!(ledger.for_message(10).unwrap().input_tokens, 8);
    }

    #[test]
    fn session_total_accumulates() {
        let mut ledger = TokenUsageLedger::new();
        ledger.record(record(1, 10, 5), 0);
        ledger.record(record(1, 11, 7), 0);
        ledger.record(record(2, 12, 100), 0);
        let total = ledger.session_total(1);
        assert_eq!(total.total_input_tokens, 12);
        assert_eq!(total.count, 2);
        assert_eq!(ledger.session_total(3), TokenUsageStats::default());
    }

    #[test]
    fn latest_only_tracks_current_session() {
        let mut ledger = TokenUsageLedger::new();
        ledger.record(record(2, 1, 5), 1);
        assert!(ledger.latest().is_none());
        ledger.record(record(1, 2, 5), 1);
        assert_eq!(ledger.latest().unwrap().message_id, 2);
    }

    #[test]
    fn parse_fills_session_from_envelope() {
        let parsed = TokenUsageLedger::parse(r#"{"message_id":4,"input_tokens":3}"#, 9).unwrap();
        assert_eq!(parsed.session_id, 9);
        assert_eq!(parsed.message_id, 4);
    }

    #[test]
    fn parse_discards_malformed_payloads() {
        assert!(TokenUsageLedger::parse("{oops", 1).is_none());
        assert!(TokenUsageLedger::parse(r#"{"input_tokens":"many"}"#, 1).is_none());
    }

    #[test]
    fn load_session_replaces_total_with_server_stats() {
        let mut ledger = TokenUsageLedger::new();
        ledger.record(record(4, 1, 1000), 4);
        ledger.load_session(
            4,
            SessionTokenUsage {
                stats: TokenUsageStats {
                    total_input_tokens: 30,
                    count: 2,
                    ..Default::default()
                },
                records: vec![record(4, 1, 10), record(4, 2, 20)],
            },
        );
        assert_eq!(ledger.session_total(4).total_input_tokens, 30);
        assert_eq!(ledger.for_message(1).unwrap().input_tokens, 10);
        assert_eq!(ledger.latest().unwrap().message_id, 2);
    }
}
