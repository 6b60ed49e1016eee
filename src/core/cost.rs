// src/core/cost.rs — Cost ledger and per-run budgets

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::infra::errors::ShotsmithError;

/// Float slack for afford checks on summed prices.
const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostAction {
    Compile,
    Generate,
    Audit,
}

impl std::fmt::Display for CostAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CostAction::Compile => write!(f, "compile"),
            CostAction::Generate => write!(f, "generate"),
            CostAction::Audit => write!(f, "audit"),
        }
    }
}

/// One priced operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEntry {
    /// Run the spend belongs to (the shot id).
    pub scope: String,
    pub provider: String,
    pub model: String,
    pub action: CostAction,
    pub amount_usd: f64,
    pub timestamp: DateTime<Utc>,
}

impl CostEntry {
    pub fn new(
        scope: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
        action: CostAction,
        amount_usd: f64,
    ) -> Self {
        Self {
            scope: scope.into(),
            provider: provider.into(),
            model: model.into(),
            action,
            amount_usd,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Default)]
struct LedgerState {
    entries: Vec<CostEntry>,
    total_usd: f64,
    by_scope: HashMap<String, f64>,
    by_provider: HashMap<String, f64>,
    by_action: HashMap<CostAction, f64>,
    journal: Option<File>,
}

/// Append-only record of every priced call in the process.
///
/// Shared by concurrent runs; each append and its journal line happen inside
/// one short critical section.
#[derive(Default)]
pub struct CostLedger {
    state: Mutex<LedgerState>,
}

impl CostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger that also appends each entry as a JSON line to `path`.
    pub fn with_journal(path: &Path) -> Result<Self, ShotsmithError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            state: Mutex::new(LedgerState {
                journal: Some(file),
                ..Default::default()
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        // A panic mid-append leaves totals consistent with entries, so a
        // poisoned lock is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an entry; returns the new total for its scope.
    pub fn record(&self, entry: CostEntry) -> f64 {
        let amount = entry.amount_usd.max(0.0);
        let mut state = self.lock();

        state.total_usd += amount;
        *state.by_provider.entry(entry.provider.clone()).or_default() += amount;
        *state.by_action.entry(entry.action).or_default() += amount;
        let scope_total = {
            let slot = state.by_scope.entry(entry.scope.clone()).or_default();
            *slot += amount;
            *slot
        };

        if let Some(file) = state.journal.as_mut() {
            let line = serde_json::to_string(&entry).map_err(std::io::Error::from);
            if let Err(e) = line.and_then(|l| writeln!(file, "{}", l)) {
                tracing::warn!("Cost journal append failed: {}", e);
            }
        }

        tracing::debug!(
            scope = %entry.scope,
            provider = %entry.provider,
            action = %entry.action,
            amount_usd = amount,
            scope_total,
            "Cost recorded"
        );
        state.entries.push(entry);
        scope_total
    }

    pub fn total(&self) -> f64 {
        self.lock().total_usd
    }

    pub fn scope_total(&self, scope: &str) -> f64 {
        self.lock().by_scope.get(scope).copied().unwrap_or(0.0)
    }

    /// Whether `scope` can spend `amount` more without passing `ceiling`.
    pub fn can_afford(&self, scope: &str, amount: f64, ceiling: f64) -> bool {
        self.scope_total(scope) + amount <= ceiling + EPSILON
    }

    pub fn entries(&self) -> Vec<CostEntry> {
        self.lock().entries.clone()
    }

    pub fn scope_entries(&self, scope: &str) -> Vec<CostEntry> {
        self.lock()
            .entries
            .iter()
            .filter(|e| e.scope == scope)
            .cloned()
            .collect()
    }

    /// Provider breakdown, most expensive first.
    pub fn provider_breakdown(&self) -> Vec<(String, f64)> {
        let mut rows: Vec<_> = self
            .lock()
            .by_provider
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        rows.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        rows
    }

    pub fn summary(&self) -> String {
        let state = self.lock();
        format!(
            "${:.2} total ({} calls, {} runs)",
            state.total_usd,
            state.entries.len(),
            state.by_scope.len()
        )
    }

    /// Human-readable breakdown for the end of a CLI run.
    pub fn analytics_report(&self) -> String {
        let mut report = String::new();
        report.push_str("═══ Cost ═══\n");
        report.push_str(&format!("Total: ${:.4}\n", self.total()));

        let by_action = {
            let state = self.lock();
            let mut rows: Vec<_> = state.by_action.iter().map(|(k, v)| (*k, *v)).collect();
            rows.sort_by(|a, b| b.1.total_cmp(&a.1));
            rows
        };
        if !by_action.is_empty() {
            report.push_str("\nBy Action:\n");
            for (action, cost) in by_action {
                report.push_str(&format!("  {}: ${:.4}\n", action, cost));
            }
        }

        let by_provider = self.provider_breakdown();
        if !by_provider.is_empty() {
            report.push_str("\nBy Provider:\n");
            for (provider, cost) in by_provider {
                report.push_str(&format!("  {}: ${:.4}\n", provider, cost));
            }
        }
        report
    }
}

/// Details passed to the stop-early callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetStop {
    pub spent: f64,
    pub needed: f64,
    pub ceiling: f64,
}

type StopCallback = Box<dyn Fn(BudgetStop) + Send + Sync>;

/// Spend ceiling for one run, backed by the shared ledger.
pub struct Budget {
    ledger: Arc<CostLedger>,
    scope: String,
    ceiling: f64,
    on_exhausted: Option<StopCallback>,
}

impl Budget {
    pub fn new(ledger: Arc<CostLedger>, scope: impl Into<String>, ceiling: f64) -> Self {
        Self {
            ledger,
            scope: scope.into(),
            ceiling: ceiling.max(0.0),
            on_exhausted: None,
        }
    }

    /// Invoked every time an affordability check fails.
    pub fn with_stop_callback<F>(mut self, f: F) -> Self
    where
        F: Fn(BudgetStop) + Send + Sync + 'static,
    {
        self.on_exhausted = Some(Box::new(f));
        self
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn ceiling(&self) -> f64 {
        self.ceiling
    }

    pub fn spent(&self) -> f64 {
        self.ledger.scope_total(&self.scope)
    }

    pub fn remaining(&self) -> f64 {
        (self.ceiling - self.spent()).max(0.0)
    }

    pub fn ledger(&self) -> &Arc<CostLedger> {
        &self.ledger
    }

    pub fn can_afford(&self, amount: f64) -> bool {
        let ok = self.ledger.can_afford(&self.scope, amount, self.ceiling);
        if !ok {
            let stop = BudgetStop {
                spent: self.spent(),
                needed: amount,
                ceiling: self.ceiling,
            };
            tracing::info!(
                scope = %self.scope,
                spent = stop.spent,
                needed = amount,
                ceiling = self.ceiling,
                "Budget cannot cover next call"
            );
            if let Some(cb) = &self.on_exhausted {
                cb(stop);
            }
        }
        ok
    }

    /// Like [`Budget::can_afford`] but as an error.
    pub fn check(&self, amount: f64) -> Result<(), ShotsmithError> {
        if self.can_afford(amount) {
            Ok(())
        } else {
            Err(ShotsmithError::BudgetExhausted {
                spent: self.spent(),
                needed: amount,
                ceiling: self.ceiling,
            })
        }
    }

    /// Record a completed call; returns the run's spend so far.
    pub fn charge(&self, provider: &str, model: &str, action: CostAction, amount: f64) -> f64 {
        self.ledger
            .record(CostEntry::new(&self.scope, provider, model, action, amount))
    }
}
