//! Scan passes and the self-scheduling loop that repeats them.
//!
//! A pass reads the settings, scans the tree, binds converters for new matches
//! and re-renders every cached match. [`ScanLoop`] runs passes on a growing
//! timer and also on demand, one at a time on the calling thread.

use serde::Serialize;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::MatchCache;
use crate::config::{BackoffSettings, ConfigStore, Settings};
use crate::convert::{format_plain, RandomSource, StrategyRegistry, ThreadRandom, UnitTable};
use crate::detect::CurrencyDetector;
use crate::dom::Tree;
use crate::extract::extract_text;
use crate::scan::Scanner;

/// How often a waiting loop checks its shutdown flag
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Wait before the first self-scheduled pass
pub const DEFAULT_INITIAL: Duration = Duration::from_millis(250);

/// Longest wait between self-scheduled passes
pub const DEFAULT_MAX: Duration = Duration::from_millis(6000);

/// Requests for an immediate one-shot pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// The stored settings changed
    ConfigChanged,
    /// A control surface asked for a re-run
    Rerun,
}

/// Multiplicative backoff with a cap.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    current: Duration,
    factor: f64,
    max: Duration,
}

impl Backoff {
    /// A factor below 1 (or not finite) is treated as 1. A zero `initial` or
    /// `max` takes the default, so the loop never spins.
    pub fn new(initial: Duration, factor: f64, max: Duration) -> Self {
        let max = nonzero_or(max, DEFAULT_MAX);
        Self {
            current: nonzero_or(initial, DEFAULT_INITIAL).min(max),
            factor: sane_factor(factor),
            max,
        }
    }

    pub fn from_settings(settings: &BackoffSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.initial_ms),
            settings.factor,
            Duration::from_millis(settings.max_ms),
        )
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Grow the timer and return the next interval.
    pub fn advance(&mut self) -> Duration {
        self.current = self.current.mul_f64(self.factor).min(self.max);
        self.current
    }

    /// Take a new factor and cap, keeping the current interval (clamped to the
    /// new cap). `initial_ms` only matters when the loop starts.
    pub fn retune(&mut self, settings: &BackoffSettings) {
        let tuned = Self::from_settings(settings);
        self.factor = tuned.factor;
        self.max = tuned.max;
        self.current = self.current.min(self.max);
    }
}

fn sane_factor(factor: f64) -> f64 {
    if factor.is_finite() {
        factor.max(1.0)
    } else {
        1.0
    }
}

fn nonzero_or(value: Duration, default: Duration) -> Duration {
    if value.is_zero() {
        tracing::warn!(default_ms = default.as_millis() as u64, "zero backoff interval, using default");
        default
    } else {
        value
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_settings(&BackoffSettings::default())
    }
}

/// What one pass did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassReport {
    /// Matches reported by the scanner, cached or not
    pub found: usize,
    /// Matches seen for the first time
    pub inserted: usize,
    /// Cached nodes whose text was rewritten
    pub rendered: usize,
    /// Whether converted text was shown
    pub do_replace: bool,
    /// `None` for self-scheduled passes
    pub trigger: Option<Trigger>,
}

/// State that lives as long as one document: cache, rates, strategies.
pub struct ScanContext<N> {
    cache: MatchCache<N>,
    units: UnitTable,
    registry: StrategyRegistry,
    rng: Box<dyn RandomSource + Send>,
}

impl<N: Copy + Eq + Hash> Default for ScanContext<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: Copy + Eq + Hash> ScanContext<N> {
    pub fn new() -> Self {
        Self::with_random(ThreadRandom)
    }

    pub fn with_random(rng: impl RandomSource + Send + 'static) -> Self {
        Self {
            cache: MatchCache::new(),
            units: UnitTable::default(),
            registry: StrategyRegistry::default(),
            rng: Box::new(rng),
        }
    }

    pub fn with_registry(mut self, registry: StrategyRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn cache(&self) -> &MatchCache<N> {
        &self.cache
    }

    /// Rates loaded by the last pass.
    pub fn units(&self) -> &UnitTable {
        &self.units
    }

    /// Run one pass over `tree`.
    ///
    /// Settings that cannot be read fall back to defaults; a pass never fails.
    pub fn run_pass<T>(&mut self, tree: &mut T, store: &dyn ConfigStore) -> PassReport
    where
        T: Tree<Node = N>,
    {
        let settings = store.load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "could not read settings, using defaults");
            Settings::default()
        });
        self.units = settings.unit_table();

        let symbol = if settings.currency_symbol.is_empty() {
            tracing::warn!("empty currency symbol, using $");
            "$"
        } else {
            settings.currency_symbol.as_str()
        };
        let found = match CurrencyDetector::new(symbol) {
            Ok(detector) => {
                let scanner = Scanner::new(detector, settings.threshold);
                let cache = &self.cache;
                scanner.scan_settled(tree, tree.root(), |node| cache.get(node).map(|e| e.amount))
            }
            Err(e) => {
                tracing::warn!(error = %e, symbol, "unusable currency symbol, skipping detection");
                Vec::new()
            }
        };

        let mut inserted = 0;
        for m in &found {
            let (registry, units, rng) = (&self.registry, &self.units, &mut self.rng);
            let is_new = self.cache.record_if_absent(m.node, m.amount, || {
                registry.select(m.amount, units, &mut **rng)
            });
            if is_new {
                inserted += 1;
                if let Some(entry) = self.cache.get(m.node) {
                    tracing::info!(
                        amount = entry.amount,
                        converter = entry.converter.label(),
                        "new currency match"
                    );
                }
            }
        }

        let mut rendered = 0;
        for entry in self.cache.all() {
            let text = if settings.do_replace {
                entry.converter.render(entry.amount, &self.units)
            } else {
                format_plain(entry.amount, symbol)
            };
            if extract_text(tree, entry.node) == text {
                continue;
            }
            tree.clear_children(entry.node);
            tree.set_text(entry.node, &text);
            rendered += 1;
        }

        let report = PassReport {
            found: found.len(),
            inserted,
            rendered,
            do_replace: settings.do_replace,
            trigger: None,
        };
        tracing::debug!(
            found = report.found,
            inserted = report.inserted,
            rendered = report.rendered,
            cached = self.cache.len(),
            "scan pass complete"
        );
        report
    }
}

/// Repeats passes on a backoff timer, with one-shot passes on demand.
///
/// Everything runs on the calling thread, so at most one pass is in flight.
pub struct ScanLoop {
    backoff: Backoff,
    sender: Sender<Trigger>,
    triggers: Receiver<Trigger>,
    shutdown: Arc<AtomicBool>,
    max_passes: Option<usize>,
    follow_settings: bool,
}

impl ScanLoop {
    pub fn new(backoff: Backoff) -> Self {
        let (sender, triggers) = mpsc::channel();
        Self {
            backoff,
            sender,
            triggers,
            shutdown: Arc::new(AtomicBool::new(false)),
            max_passes: None,
            follow_settings: false,
        }
    }

    /// Re-read the `[backoff]` factor and cap whenever the settings change.
    pub fn follow_settings(mut self) -> Self {
        self.follow_settings = true;
        self
    }

    /// Stop after this many passes (scheduled and triggered).
    pub fn with_max_passes(mut self, passes: usize) -> Self {
        self.max_passes = Some(passes);
        self
    }

    /// Handle for requesting one-shot passes, e.g. from a config watcher.
    pub fn trigger_sender(&self) -> Sender<Trigger> {
        self.sender.clone()
    }

    /// Set to true to stop the loop.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Run until shut down or `max_passes` is reached. Returns the number of
    /// passes run. `on_pass` sees the tree after every pass.
    pub fn run<T, F>(
        &mut self,
        ctx: &mut ScanContext<T::Node>,
        tree: &mut T,
        store: &dyn ConfigStore,
        mut on_pass: F,
    ) -> usize
    where
        T: Tree,
        F: FnMut(&T, &PassReport),
    {
        let mut passes = 0;

        // The first pass is self-scheduled: it advances the timer
        let report = ctx.run_pass(tree, store);
        passes += 1;
        on_pass(tree, &report);
        let mut deadline = Instant::now() + self.schedule_next();

        while !self.is_done(passes) {
            let wait = deadline.saturating_duration_since(Instant::now());
            match self.triggers.recv_timeout(wait.min(SHUTDOWN_POLL)) {
                Ok(trigger) => {
                    tracing::debug!(?trigger, "triggered pass");
                    if trigger == Trigger::ConfigChanged && self.follow_settings {
                        self.retune(store);
                    }
                    let mut report = ctx.run_pass(tree, store);
                    report.trigger = Some(trigger);
                    passes += 1;
                    on_pass(tree, &report);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if Instant::now() < deadline {
                        continue;
                    }
                    let report = ctx.run_pass(tree, store);
                    passes += 1;
                    on_pass(tree, &report);
                    deadline = Instant::now() + self.schedule_next();
                }
                Err(RecvTimeoutError::Disconnected) => {
                    std::thread::sleep(wait.min(SHUTDOWN_POLL));
                }
            }
        }

        passes
    }

    fn retune(&mut self, store: &dyn ConfigStore) {
        match store.load() {
            Ok(settings) => {
                self.backoff.retune(&settings.backoff);
                tracing::debug!(
                    factor = settings.backoff.factor,
                    max_ms = self.backoff.max().as_millis() as u64,
                    "backoff retuned"
                );
            }
            Err(e) => tracing::warn!(error = %e, "could not read settings, keeping backoff"),
        }
    }

    fn schedule_next(&mut self) -> Duration {
        let next = self.backoff.advance();
        tracing::debug!(wait_ms = next.as_millis() as u64, "next scheduled pass");
        next
    }

    fn is_done(&self, passes: usize) -> bool {
        self.shutdown.load(Ordering::SeqCst) || self.max_passes.is_some_and(|max| passes >= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryStore;
    use crate::dom::{Document, NodeId};

    #[test]
    fn test_backoff_sequence() {
        let mut backoff = Backoff::new(
            Duration::from_millis(250),
            2.0,
            Duration::from_millis(6000),
        );
        let waits: Vec<u128> = (0..8).map(|_| backoff.advance().as_millis()).collect();
        assert_eq!(waits, vec![500, 1000, 2000, 4000, 6000, 6000, 6000, 6000]);
    }

    #[test]
    fn test_backoff_default_factor() {
        let mut backoff = Backoff::default();
        assert_eq!(backoff.advance().as_millis(), 375);
    }

    #[test]
    fn test_backoff_rejects_shrinking() {
        let mut backoff = Backoff::new(Duration::from_millis(100), 0.5, Duration::from_secs(1));
        assert_eq!(backoff.advance().as_millis(), 100);
    }

    #[test]
    fn test_backoff_zero_values_use_defaults() {
        let mut backoff = Backoff::new(Duration::ZERO, 2.0, Duration::ZERO);
        assert_eq!(backoff.current(), DEFAULT_INITIAL);
        assert_eq!(backoff.max(), DEFAULT_MAX);
        assert_eq!(backoff.advance(), Duration::from_millis(500));

        let settings = BackoffSettings {
            initial_ms: 0,
            factor: 1.5,
            max_ms: 0,
        };
        assert_eq!(Backoff::from_settings(&settings).max(), DEFAULT_MAX);
    }

    #[test]
    fn test_backoff_retune() {
        let mut backoff = Backoff::new(Duration::from_secs(4), 2.0, Duration::from_secs(60));
        backoff.retune(&BackoffSettings {
            initial_ms: 250,
            factor: 3.0,
            max_ms: 10_000,
        });
        assert_eq!(backoff.current(), Duration::from_secs(4));
        assert_eq!(backoff.advance(), Duration::from_secs(10));
    }

    #[test]
    fn test_pass_renders_plain_by_default() {
        let mut doc = Document::parse_html("<p>$12.5</p>");
        let store = MemoryStore::default();
        let mut ctx = ScanContext::new();

        let report = ctx.run_pass(&mut doc, &store);
        assert_eq!(report.inserted, 1);
        assert!(!report.do_replace);
        assert!(doc.to_html().contains("<p>$12.50</p>"));
    }

    #[test]
    fn test_unreadable_settings_use_defaults() {
        struct Broken;

        impl ConfigStore for Broken {
            fn load(&self) -> crate::Result<Settings> {
                Err(crate::RepricerError::ConfigError("unreadable".into()))
            }
            fn save(&self, _settings: &Settings) -> crate::Result<()> {
                Ok(())
            }
            fn subscribe(&self, _tx: Sender<Trigger>) -> crate::Result<()> {
                Ok(())
            }
        }

        let mut doc = Document::new();
        let p = doc.append_element(NodeId::ROOT, "p");
        doc.append_text(p, "$3");
        let mut ctx = ScanContext::new();

        let report = ctx.run_pass(&mut doc, &Broken);
        assert_eq!(report.found, 1);
        assert!(doc.to_html().contains("$3.00"));
    }

    #[test]
    fn test_loop_stops_at_max_passes() {
        let mut doc = Document::parse_html("<p>$1</p>");
        let store = MemoryStore::default();
        let mut ctx = ScanContext::new();
        let mut scan_loop = ScanLoop::new(Backoff::new(
            Duration::from_millis(1),
            2.0,
            Duration::from_millis(4),
        ))
        .with_max_passes(4);

        let mut seen = 0;
        let passes = scan_loop.run(&mut ctx, &mut doc, &store, |_, _| seen += 1);
        assert_eq!(passes, 4);
        assert_eq!(seen, 4);
        assert_eq!(ctx.cache().len(), 1);
    }

    #[test]
    fn test_trigger_does_not_advance_backoff() {
        let mut doc = Document::parse_html("<p>$1</p>");
        let store = MemoryStore::default();
        let mut ctx = ScanContext::new();
        // Long first wait, so only triggers can produce the second pass
        let mut scan_loop = ScanLoop::new(Backoff::new(
            Duration::from_secs(30),
            2.0,
            Duration::from_secs(600),
        ))
        .with_max_passes(2);

        scan_loop.trigger_sender().send(Trigger::Rerun).unwrap();

        let mut triggers = Vec::new();
        scan_loop.run(&mut ctx, &mut doc, &store, |_, report| triggers.push(report.trigger));

        assert_eq!(triggers, vec![None, Some(Trigger::Rerun)]);
        // Only the first (self-scheduled) pass advanced the timer
        assert_eq!(scan_loop.backoff().current(), Duration::from_secs(60));
    }

    #[test]
    fn test_settings_change_retunes_backoff() {
        let mut doc = Document::parse_html("<p>$1</p>");
        let store = MemoryStore::default();
        let mut scan_loop = ScanLoop::new(Backoff::new(
            Duration::from_secs(30),
            2.0,
            Duration::from_secs(600),
        ))
        .follow_settings()
        .with_max_passes(2);

        store.subscribe(scan_loop.trigger_sender()).unwrap();
        let mut settings = Settings::default();
        settings.backoff.max_ms = 5000;
        store.save(&settings).unwrap();

        scan_loop.run(&mut ScanContext::new(), &mut doc, &store, |_, _| {});
        assert_eq!(scan_loop.backoff().max(), Duration::from_secs(5));
        assert_eq!(scan_loop.backoff().current(), Duration::from_secs(5));
    }

    #[test]
    fn test_settings_change_ignored_without_follow() {
        let mut doc = Document::parse_html("<p>$1</p>");
        let store = MemoryStore::default();
        let mut scan_loop = ScanLoop::new(Backoff::new(
            Duration::from_secs(30),
            2.0,
            Duration::from_secs(600),
        ))
        .with_max_passes(2);

        scan_loop.trigger_sender().send(Trigger::ConfigChanged).unwrap();
        scan_loop.run(&mut ScanContext::new(), &mut doc, &store, |_, _| {});
        assert_eq!(scan_loop.backoff().max(), Duration::from_secs(600));
    }

    #[test]
    fn test_shutdown_flag() {
        let mut doc = Document::new();
        let store = MemoryStore::default();
        let mut ctx = ScanContext::new();
        let mut scan_loop = ScanLoop::new(Backoff::default());

        scan_loop.shutdown_flag().store(true, Ordering::SeqCst);
        assert_eq!(scan_loop.run(&mut ctx, &mut doc, &store, |_, _| {}), 1);
    }
}
