//! Server-side fee calculation for a set of selected students.
//!
//! Requests are debounced and tagged with a sequence token; only the
//! response to the most recently issued request is applied. A failed
//! recalculation keeps the previous totals readable but marks them stale.

use crate::auth::AuthContext;
use crate::backend::types::{ClubId, FeeCalculation, FeeCalculationRequest, StudentId};
use crate::backend::PortalBackend;
use crate::config::AggregatorConfig;
use crate::payments::error::{PaymentError, PaymentResult};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct FeeSummary {
    pub student_ids: Vec<StudentId>,
    pub calculation: FeeCalculation,
    /// Sum of per-student final amounts; this is the figure shown and paid.
    pub display_total: Decimal,
    pub sequence: u64,
}

impl FeeSummary {
    fn new(student_ids: Vec<StudentId>, calculation: FeeCalculation, sequence: u64) -> Self {
        let display_total = if calculation.student_fees.is_empty() {
            calculation.total_amount
        } else {
            calculation
                .student_fees
                .iter()
                .map(|fees| fees.final_amount)
                .sum()
        };
        Self {
            student_ids,
            calculation,
            display_total,
            sequence,
        }
    }

    pub fn student_fee_ids(&self) -> Vec<i64> {
        self.calculation
            .student_fees
            .iter()
            .flat_map(|fees| fees.student_fee_ids.iter().copied())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Recalculation {
    Applied(FeeSummary),
    /// A newer request was issued while this one was pending.
    Superseded,
}

#[derive(Debug, Default)]
struct AggregateState {
    current: Option<FeeSummary>,
    stale: bool,
    last_error: Option<String>,
}

pub struct FeeAggregator {
    backend: Arc<dyn PortalBackend>,
    config: AggregatorConfig,
    sequence: AtomicU64,
    state: RwLock<AggregateState>,
}

impl FeeAggregator {
    pub fn new(backend: Arc<dyn PortalBackend>, config: AggregatorConfig) -> Self {
        Self {
            backend,
            config,
            sequence: AtomicU64::new(0),
            state: RwLock::new(AggregateState::default()),
        }
    }

    pub async fn calculate_fees(
        &self,
        auth: &AuthContext,
        student_ids: &[StudentId],
        club_ids: &BTreeMap<StudentId, Vec<ClubId>>,
    ) -> PaymentResult<Recalculation> {
        let token = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        let mut ids: Vec<StudentId> = Vec::with_capacity(student_ids.len());
        for id in student_ids {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }

        if ids.is_empty() {
            let summary = FeeSummary::new(Vec::new(), FeeCalculation::empty(), token);
            return Ok(self.apply(token, summary).await);
        }

        tokio::time::sleep(self.config.debounce).await;
        if self.sequence.load(Ordering::SeqCst) != token {
            debug!(token, "fee calculation superseded during debounce");
            return Ok(Recalculation::Superseded);
        }

        let request = FeeCalculationRequest {
            student_club_ids: club_ids
                .iter()
                .filter(|(id, _)| ids.contains(id))
                .map(|(id, clubs)| (*id, clubs.clone()))
                .collect(),
            student_ids: ids.clone(),
        };

        match self.backend.calculate_fees(auth, &request).await {
            Ok(calculation) => {
                for fees in &calculation.student_fees {
                    if !fees.is_consistent() {
                        warn!(
                            student_id = fees.student_id,
                            "fee breakdown figures do not add up"
                        );
                    }
                }
                let summary = FeeSummary::new(ids, calculation, token);
                if summary.display_total != summary.calculation.total_amount {
                    warn!(
                        display_total = %summary.display_total,
                        backend_total = %summary.calculation.total_amount,
                        "backend total differs from sum of student final amounts"
                    );
                }
                Ok(self.apply(token, summary).await)
            }
            Err(e) => {
                let mut state = self.state.write().await;
                if self.sequence.load(Ordering::SeqCst) != token {
                    return Ok(Recalculation::Superseded);
                }
                warn!(error = %e, token, "fee calculation failed, keeping previous totals");
                state.stale = state.current.is_some();
                state.last_error = Some(e.user_message());
                Err(PaymentError::from(e))
            }
        }
    }

    async fn apply(&self, token: u64, summary: FeeSummary) -> Recalculation {
        let mut state = self.state.write().await;
        if self.sequence.load(Ordering::SeqCst) != token {
            debug!(token, "discarding stale fee calculation response");
            return Recalculation::Superseded;
        }
        info!(
            students = summary.student_ids.len(),
            total = %summary.display_total,
            "fee totals updated"
        );
        state.current = Some(summary.clone());
        state.stale = false;
        state.last_error = None;
        Recalculation::Applied(summary)
    }

    pub async fn summary(&self) -> Option<FeeSummary> {
        self.state.read().await.current.clone()
    }

    /// True when the displayed totals predate a failed recalculation.
    pub async fn is_stale(&self) -> bool {
        self.state.read().await.stale
    }

    pub async fn last_error(&self) -> Option<String> {
        self.state.read().await.last_error.clone()
    }

    pub async fn reset(&self) {
        self.sequence.fetch_add(1, Ordering::SeqCst);
        *self.state.write().await = AggregateState::default();
    }
}
