//! Report handlers
//!
//! A handler receives each completed interrupt report as a borrowed slice of
//! the transfer buffer. The buffer is re-armed as soon as the handler returns,
//! so the borrow cannot outlive the call; copy the bytes to keep them.

use crate::descriptors::Candidate;
use tracing::info;

/// Receiver of raw interrupt reports
pub trait ReportHandler: Send {
    fn on_report(&mut self, candidate: &Candidate, report: &[u8]);
}

impl<F> ReportHandler for F
where
    F: FnMut(&[u8]) + Send,
{
    fn on_report(&mut self, _candidate: &Candidate, report: &[u8]) {
        self(report)
    }
}

/// Logs every report as space-separated hex bytes
#[derive(Debug, Default)]
pub struct HexLogger {
    reports: u64,
}

impl HexLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of reports logged so far
    pub fn reports(&self) -> u64 {
        self.reports
    }
}

impl ReportHandler for HexLogger {
    fn on_report(&mut self, candidate: &Candidate, report: &[u8]) {
        self.reports += 1;
        info!("Mouse event [{}]: {}", candidate, hex_bytes(report));
    }
}

/// Format bytes as lowercase, zero-padded, space-separated hex
pub fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOUSE: Candidate = Candidate {
        vendor_id: 0x046d,
        product_id: 0xc077,
        endpoint_address: 0x81,
    };

    #[test]
    fn test_hex_bytes() {
        assert_eq!(hex_bytes(&[0x00, 0x01, 0xff, 0x00]), "00 01 ff 00");
        assert_eq!(hex_bytes(&[]), "");
    }

    #[test]
    fn test_closure_handler() {
        let mut seen = Vec::new();
        {
            let mut handler = |report: &[u8]| seen.push(report.to_vec());
            handler.on_report(&MOUSE, &[1, 2, 3]);
        }
        assert_eq!(seen, vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_hex_logger_counts() {
        let mut logger = HexLogger::new();
        logger.on_report(&MOUSE, &[0x00, 0x05]);
        logger.on_report(&MOUSE, &[0x01, 0x00]);
        assert_eq!(logger.reports(), 2);
    }
}
