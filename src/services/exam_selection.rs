//! In-session selection of exams a parent intends to pay for.

use crate::backend::types::{Exam, ExamId, StudentId};
use crate::services::exam_policy::{add_on_price, terms_for, ExamTerms};
use rust_decimal::Decimal;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct SelectedExamInfo {
    pub exam: Exam,
    pub payment_amount: Decimal,
    pub include_add_on: bool,
}

impl SelectedExamInfo {
    pub fn terms(&self) -> ExamTerms {
        terms_for(&self.exam)
    }

    pub fn add_on_cost(&self) -> Decimal {
        if self.include_add_on {
            add_on_price(&self.exam)
        } else {
            Decimal::ZERO
        }
    }

    pub fn subtotal(&self) -> Decimal {
        self.payment_amount + self.add_on_cost()
    }
}

/// Selected exams for one student, iterated in the order they were added.
#[derive(Debug, Clone, Default)]
pub struct ExamSelection {
    student_id: Option<StudentId>,
    entries: Vec<SelectedExamInfo>,
}

impl ExamSelection {
    pub fn new(student_id: StudentId) -> Self {
        Self {
            student_id: Some(student_id),
            entries: Vec::new(),
        }
    }

    pub fn student_id(&self) -> Option<StudentId> {
        self.student_id
    }

    /// Point the selection at another student. Returns true when this
    /// cleared existing entries.
    pub fn switch_student(&mut self, student_id: StudentId) -> bool {
        if self.student_id == Some(student_id) {
            return false;
        }
        let had_entries = !self.entries.is_empty();
        self.student_id = Some(student_id);
        self.entries.clear();
        had_entries
    }

    /// Drop every entry, e.g. after the exam list was reloaded.
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    fn position(&self, exam_id: ExamId) -> Option<usize> {
        self.entries.iter().position(|e| e.exam.exam_id == exam_id)
    }

    fn entry_mut(&mut self, exam_id: ExamId) -> Option<&mut SelectedExamInfo> {
        self.entries.iter_mut().find(|e| e.exam.exam_id == exam_id)
    }

    /// Select or deselect an exam. Returns whether the exam is selected
    /// afterwards. Exams with nothing left to pay are never selected.
    pub fn toggle_exam(&mut self, exam: &Exam) -> bool {
        if let Some(idx) = self.position(exam.exam_id) {
            self.entries.remove(idx);
            debug!(exam_id = exam.exam_id, "exam deselected");
            return false;
        }

        if exam.is_fully_paid || exam.amount_due <= Decimal::ZERO {
            debug!(exam_id = exam.exam_id, "exam already paid, not selectable");
            return false;
        }

        let payment_amount = if terms_for(exam).allows_partial() {
            Decimal::ZERO
        } else {
            exam.amount_due
        };
        self.entries.push(SelectedExamInfo {
            exam: exam.clone(),
            payment_amount,
            include_add_on: false,
        });
        debug!(exam_id = exam.exam_id, amount = %payment_amount, "exam selected");
        true
    }

    /// Set the amount to pay now. The caller clamps to `[0, amount_due]`
    /// (see [`ExamSelection::clamp_amount`]). Full-payment-only exams keep
    /// their full amount.
    pub fn update_payment_amount(&mut self, exam_id: ExamId, amount: Decimal) {
        if let Some(entry) = self.entry_mut(exam_id) {
            if entry.terms().allows_partial() {
                entry.payment_amount = amount;
            }
        }
    }

    pub fn toggle_add_on(&mut self, exam_id: ExamId) {
        if let Some(entry) = self.entry_mut(exam_id) {
            entry.include_add_on = !entry.include_add_on;
        }
    }

    pub fn remove_exam(&mut self, exam_id: ExamId) {
        self.entries.retain(|e| e.exam.exam_id != exam_id);
    }

    pub fn pay_full_balance(&mut self, exam_id: ExamId) {
        if let Some(entry) = self.entry_mut(exam_id) {
            entry.payment_amount = entry.exam.amount_due;
        }
    }

    pub fn calculate_total(&self) -> Decimal {
        self.entries.iter().map(SelectedExamInfo::subtotal).sum()
    }

    pub fn has_valid_payment_amounts(&self) -> bool {
        !self
            .entries
            .iter()
            .any(|e| e.terms().allows_partial() && e.payment_amount <= Decimal::ZERO)
    }

    /// Clamp a user-entered amount to what may be paid for this exam.
    pub fn clamp_amount(&self, exam_id: ExamId, amount: Decimal) -> Option<Decimal> {
        self.get(exam_id)
            .map(|e| amount.max(Decimal::ZERO).min(e.exam.amount_due))
    }

    pub fn get(&self, exam_id: ExamId) -> Option<&SelectedExamInfo> {
        self.entries.iter().find(|e| e.exam.exam_id == exam_id)
    }

    pub fn is_selected(&self, exam_id: ExamId) -> bool {
        self.position(exam_id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SelectedExamInfo> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
