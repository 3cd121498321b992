//! Progress/telemetry: a pass-through reporting callback with no algorithmic
//! role (spec §2 item 9, §5 "Cancellation/timeout").

/// Cooperative progress callback. `report` returning `true` requests that
/// training stop at the next scan boundary; the default never requests a
/// stop.
pub trait ProgressCallback {
    fn advance(&mut self, n: u64);

    fn report(&mut self, _scan: usize, _block: usize, _log_likelihood: f64, _prior: f64) -> bool {
        false
    }
}

/// A callback that does nothing; the default for callers uninterested in
/// progress reporting.
#[derive(Debug, Default)]
pub struct NoopProgress;

impl ProgressCallback for NoopProgress {
    fn advance(&mut self, _n: u64) {}
}

/// `indicatif`-backed progress bar, advanced once per training pair
/// processed within a scan.
pub struct IndicatifProgress {
    bar: indicatif::ProgressBar,
}

impl IndicatifProgress {
    pub fn new(total: u64) -> Self {
        let bar = indicatif::ProgressBar::new(total);
        bar.set_style(
            indicatif::ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
            )
            .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
            .progress_chars("#>-"),
        );
        Self { bar }
    }
}

impl ProgressCallback for IndicatifProgress {
    fn advance(&mut self, n: u64) {
        self.bar.inc(n);
    }

    fn report(&mut self, scan: usize, block: usize, log_likelihood: f64, prior: f64) -> bool {
        self.bar.set_message(format!(
            "scan {scan} block {block} ll={log_likelihood:.4} prior={prior:.4}"
        ));
        false
    }
}
