//! Periodic throughput log in the exact column format used by the original
//! per-thread byte counters: a `"time"` header followed by
//! `", thrd N sent, thrd N recv"` per thread, and fixed-width rows below it.

use std::fmt::Write as _;
use std::time::Instant;

use super::ring::ThroughputRing;

/// Builds the header line: `"time"` plus one `thrd N sent, thrd N recv` pair
/// per thread.
pub fn header(num_threads: usize) -> String {
    let mut out = String::from("time");
    for i in 0..num_threads {
        let _ = write!(out, ", thrd {i} sent, thrd {i} recv");
    }
    out
}

/// Renders one row: wall-clock seconds since `epoch` to three decimal
/// places, followed by `%11u, %11u` sent/recv pairs per thread.
pub fn row(epoch: Instant, at: Instant, rings: &[ThroughputRing], bucket_offset: std::time::Duration) -> String {
    let wall = at.saturating_duration_since(epoch).as_secs_f64();
    let mut out = format!("{wall:.3}");
    for ring in rings {
        let (sent, recv) = ring
            .buckets()
            .find(|(offset, _, _)| *offset == bucket_offset)
            .map(|(_, sent, recv)| (sent, recv))
            .unwrap_or((0, 0));
        let _ = write!(out, ", {sent:11}, {recv:11}");
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    #[test]
    fn header_matches_expected_format() {
        assert_eq!(header(2), "time, thrd 0 sent, thrd 0 recv, thrd 1 sent, thrd 1 recv");
    }

    #[test]
    fn row_has_fixed_width_columns() {
        let epoch = Instant::now();
        let mut ring = ThroughputRing::new(epoch);
        ring.add_sent(epoch, 42);
        ring.add_recv(epoch, 7);
        let line = row(epoch, epoch, std::slice::from_ref(&ring), Duration::from_millis(0));
        assert!(line.starts_with("0.000, "));
        assert!(line.contains("         42,            7"));
    }
}
