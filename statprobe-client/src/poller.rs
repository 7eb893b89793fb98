use std::{io::Write, time::Duration};

use log::{debug, warn};
use statprobe_proto::Thresholds;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{config::PollerConfig, fetch::StatsSource};

pub const UNREACHABLE_MESSAGE: &str = "Unable to fetch server statistic";

/// Counts back-to-back failed cycles.
#[derive(Debug)]
struct FailureCounter {
    threshold: u32,
    count: u32,
}

impl FailureCounter {
    fn new(threshold: u32) -> Self {
        debug_assert!(threshold > 0);

        Self {
            threshold,
            count: 0,
        }
    }

    /// Returns `true` exactly when the count reaches the threshold, and starts
    /// over from zero in that case.
    fn record_failure(&mut self) -> bool {
        self.count += 1;
        if self.count == self.threshold {
            self.count = 0;
            true
        } else {
            false
        }
    }

    fn record_success(&mut self) {
        self.count = 0;
    }

    fn count(&self) -> u32 {
        self.count
    }
}

/// Writes one alert per line. A closed or broken sink is logged and the
/// remaining lines of the cycle are dropped.
fn emit<W: Write>(out: &mut W, lines: &[String]) {
    for line in lines {
        if let Err(e) = writeln!(out, "{line}").and_then(|()| out.flush()) {
            warn!("failed to write alert {line:?}: {e}");
            return;
        }
    }
}

pub struct Poller<S> {
    source: S,
    thresholds: Thresholds,
    interval: Duration,
    failures: FailureCounter,
}

impl<S: StatsSource> Poller<S> {
    pub fn new(source: S, config: &PollerConfig) -> Self {
        Self {
            source,
            thresholds: config.thresholds,
            interval: config.interval,
            failures: FailureCounter::new(config.max_consecutive_failures),
        }
    }

    /// Runs a single fetch-parse-evaluate cycle and returns the lines to print.
    pub async fn poll_once(&mut self) -> Vec<String> {
        match self.source.fetch().await {
            Ok(snapshot) => {
                self.failures.record_success();
                debug!("fetched {snapshot:?}");
                self.thresholds
                    .evaluate(&snapshot)
                    .iter()
                    .map(ToString::to_string)
                    .collect()
            }
            Err(e) => {
                warn!(
                    "fetch failed ({} in a row): {e}",
                    self.failures.count() + 1
                );
                if self.failures.record_failure() {
                    vec![UNREACHABLE_MESSAGE.to_owned()]
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// Polls until `shutdown` is cancelled, printing every alert on stdout.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        loop {
            let lines = tokio::select! {
                biased;

                _ = shutdown.cancelled() => return,
                lines = self.poll_once() => lines,
            };
            emit(&mut std::io::stdout().lock(), &lines);

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => return,
                _ = sleep(self.interval) => { /* continue */ }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::VecDeque;

    use tokio::time::Instant;

    use super::*;
    use crate::fetch::FetchError;
    use statprobe_proto::{MetricsSnapshot, ParseError};

    /// Replays canned outcomes, one per cycle.
    struct ScriptedSource {
        outcomes: VecDeque<Result<MetricsSnapshot, FetchError>>,
    }

    impl StatsSource for ScriptedSource {
        async fn fetch(&mut self) -> Result<MetricsSnapshot, FetchError> {
            self.outcomes
                .pop_front()
                .expect("script ran out of outcomes")
        }
    }

    fn ok(payload: &str) -> Result<MetricsSnapshot, FetchError> {
        Ok(statprobe_proto::parse(payload).unwrap())
    }

    fn quiet() -> Result<MetricsSnapshot, FetchError> {
        ok("10,1000,100,1000,100,1000,100")
    }

    fn failed() -> Result<MetricsSnapshot, FetchError> {
        Err(FetchError::Timeout(Duration::from_secs(5)))
    }

    fn poller(
        outcomes: Vec<Result<MetricsSnapshot, FetchError>>,
    ) -> Poller<ScriptedSource> {
        Poller::new(
            ScriptedSource {
                outcomes: outcomes.into(),
            },
            &PollerConfig {
                interval: Duration::from_millis(1),
                ..PollerConfig::default()
            },
        )
    }

    async fn cycles(poller: &mut Poller<ScriptedSource>, n: usize) -> Vec<Vec<String>> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(poller.poll_once().await);
        }
        out
    }

    #[test]
    fn test_failure_counter_fires_on_threshold_only() {
        let mut counter = FailureCounter::new(3);

        assert!(!counter.record_failure());
        assert!(!counter.record_failure());
        assert!(counter.record_failure());
        assert_eq!(counter.count(), 0);
        assert!(!counter.record_failure());
        assert_eq!(counter.count(), 1);

        counter.record_success();
        assert_eq!(counter.count(), 0);
    }

    #[tokio::test]
    async fn test_three_failures_alert_once() {
        let mut poller = poller(vec![failed(), failed(), failed(), failed(), failed(), failed()]);

        let out = cycles(&mut poller, 6).await;

        let expected: Vec<Vec<String>> = vec![
            vec![],
            vec![],
            vec![UNREACHABLE_MESSAGE.to_owned()],
            vec![],
            vec![],
            vec![UNREACHABLE_MESSAGE.to_owned()],
        ];
        assert_eq!(out, expected);
    }

    #[tokio::test]
    async fn test_success_resets_failures() {
        let mut poller = poller(vec![failed(), quiet(), failed(), failed(), quiet()]);

        let out = cycles(&mut poller, 5).await;

        assert!(out.iter().all(Vec::is_empty));
        assert_eq!(poller.failures.count(), 0);
    }

    #[tokio::test]
    async fn test_all_failure_kinds_count_together() {
        let mut poller = poller(vec![
            Err(FetchError::Status(http::StatusCode::BAD_GATEWAY)),
            Err(FetchError::Parse(ParseError::FieldCountMismatch {
                expected: 7,
                actual: 2,
            })),
            Err(FetchError::Transport(anyhow::anyhow!("connection refused"))),
        ]);

        let out = cycles(&mut poller, 3).await;

        assert_eq!(out[2], vec![UNREACHABLE_MESSAGE.to_owned()]);
    }

    #[tokio::test]
    async fn test_success_emits_alerts_in_order() {
        let mut poller = poller(vec![ok("50,1000,900,1000,950,1000,950")]);

        let out = poller.poll_once().await;

        assert_eq!(
            out,
            vec![
                "Load Average is too high: 50",
                "Memory usage too high: 90%",
                "Free disk space is too low: 0 Mb left",
                "Network bandwidth usage high: 0 Mbit/s available",
            ]
        );
    }

    /// Always succeeds and records when it was asked.
    #[derive(Default)]
    struct ClockedSource {
        fetched_at: Vec<Instant>,
    }

    impl StatsSource for ClockedSource {
        async fn fetch(&mut self) -> Result<MetricsSnapshot, FetchError> {
            self.fetched_at.push(Instant::now());
            quiet()
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_emit_writes_one_line_per_alert() {
        let mut out = Vec::new();

        emit(&mut out, &["first".to_owned(), "second".to_owned()]);

        assert_eq!(out, b"first\nsecond\n");
    }

    #[test]
    fn test_emit_survives_broken_sink() {
        emit(&mut BrokenPipe, &[UNREACHABLE_MESSAGE.to_owned()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_fetches_once_per_interval() {
        let interval = Duration::from_secs(3);
        let mut poller = Poller::new(
            ClockedSource::default(),
            &PollerConfig {
                interval,
                ..PollerConfig::default()
            },
        );
        let shutdown = CancellationToken::new();
        let start = Instant::now();

        tokio::join!(poller.run(shutdown.clone()), async {
            // cancel halfway through the fourth sleep
            sleep(interval * 3 + interval / 2).await;
            shutdown.cancel();
        });

        let fetched_at = &poller.source.fetched_at;
        assert_eq!(fetched_at.len(), 4);
        assert!(fetched_at[0] - start < Duration::from_millis(10));
        for pair in fetched_at.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= interval && gap < interval + Duration::from_millis(10));
        }
        assert!(Instant::now() - start < interval * 4);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let mut poller = poller(vec![quiet(), quiet(), quiet()]);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        poller.run(shutdown).await;

        assert_eq!(poller.source.outcomes.len(), 3);
    }
}
