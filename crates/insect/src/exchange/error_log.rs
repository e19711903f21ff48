// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Log de-duplication for the exchange loop.
//!
//! A flood of identical failures (e.g. ICMP unreachable on every send) is
//! logged once; the number of suppressed repeats is reported when the
//! message changes or the loop exits.

pub(crate) struct ErrorDeduper {
    label: &'static str,
    level: log::Level,
    last: Option<String>,
    suppressed: u64,
}

impl ErrorDeduper {
    pub(crate) fn new(label: &'static str, level: log::Level) -> Self {
        Self {
            label,
            level,
            last: None,
            suppressed: 0,
        }
    }

    /// Log `message` unless it repeats the previous one. Returns `true` if logged.
    pub(crate) fn report(&mut self, message: String) -> bool {
        if self.last.as_deref() == Some(message.as_str()) {
            self.suppressed += 1;
            return false;
        }
        self.flush();
        log::log!(self.level, "[exchange] {}: {}", self.label, message);
        self.last = Some(message);
        true
    }

    /// Report how many repeats were swallowed, if any.
    pub(crate) fn flush(&mut self) {
        if self.suppressed > 0 {
            if let Some(last) = &self.last {
                log::log!(
                    self.level,
                    "[exchange] {}: previous message repeated {} times: {}",
                    self.label,
                    self.suppressed,
                    last
                );
            }
            self.suppressed = 0;
        }
    }

    #[cfg(test)]
    pub(crate) fn suppressed(&self) -> u64 {
        self.suppressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consecutive_duplicates_are_suppressed() {
        let mut dedup = ErrorDeduper::new("send", log::Level::Warn);
        assert!(dedup.report("unreachable".to_string()));
        assert!(!dedup.report("unreachable".to_string()));
        assert!(!dedup.report("unreachable".to_string()));
        assert_eq!(dedup.suppressed(), 2);

        assert!(dedup.report("refused".to_string()));
        assert_eq!(dedup.suppressed(), 0);
    }

    #[test]
    fn test_alternating_messages_all_logged() {
        let mut dedup = ErrorDeduper::new("receive", log::Level::Debug);
        assert!(dedup.report("a".to_string()));
        assert!(dedup.report("b".to_string()));
        assert!(dedup.report("a".to_string()));
    }

    #[test]
    fn test_flush_resets_counter() {
        let mut dedup = ErrorDeduper::new("malformed", log::Level::Debug);
        dedup.report("x".to_string());
        dedup.report("x".to_string());
        dedup.flush();
        assert_eq!(dedup.suppressed(), 0);
        // Still the last message: the next repeat is suppressed again
        assert!(!dedup.report("x".to_string()));
    }
}
