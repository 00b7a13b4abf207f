//! Payment policy resolution for exams.
//!
//! The backend is the authority: an explicit `payment_policy` (or the older
//! `allows_installments` flag) always wins. Exams served without either are
//! classified from their display name, which is how older exam lists were
//! interpreted.

use crate::backend::types::{Exam, PaymentPolicy};
use regex::Regex;
use rust_decimal::Decimal;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExamTerms {
    pub policy: PaymentPolicy,
    pub offers_add_on: bool,
}

impl ExamTerms {
    pub fn allows_partial(&self) -> bool {
        self.policy == PaymentPolicy::PartialAllowed
    }
}

/// Where the resolved terms came from, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermsSource {
    Explicit,
    NameClassification,
}

struct NameRule {
    pattern: Regex,
    terms: ExamTerms,
}

fn name_rules() -> &'static [NameRule] {
    static RULES: OnceLock<Vec<NameRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        let rule = |pattern: &str, policy, offers_add_on| NameRule {
            pattern: Regex::new(pattern).expect("static exam name pattern"),
            terms: ExamTerms {
                policy,
                offers_add_on,
            },
        };
        vec![
            rule(r"(?i)igcse", PaymentPolicy::PartialAllowed, true),
            rule(r"(?i)checkpoint", PaymentPolicy::PartialAllowed, true),
            rule(r"(?i)\bsat\b", PaymentPolicy::FullPaymentOnly, false),
            rule(r"(?i)ielts", PaymentPolicy::FullPaymentOnly, false),
        ]
    })
}

/// Classify an exam from its display name alone.
pub fn classify_by_name(exam_name: &str) -> ExamTerms {
    name_rules()
        .iter()
        .find(|rule| rule.pattern.is_match(exam_name))
        .map(|rule| rule.terms)
        .unwrap_or(ExamTerms {
            policy: PaymentPolicy::FullPaymentOnly,
            offers_add_on: false,
        })
}

pub fn resolve_terms(exam: &Exam) -> (ExamTerms, TermsSource) {
    let explicit_policy = exam.payment_policy.or(exam.allows_installments.map(|allowed| {
        if allowed {
            PaymentPolicy::PartialAllowed
        } else {
            PaymentPolicy::FullPaymentOnly
        }
    }));

    match explicit_policy {
        Some(policy) => (
            ExamTerms {
                policy,
                offers_add_on: exam
                    .offers_add_on
                    .unwrap_or_else(|| exam.extra_fee.is_some_and(|fee| fee > Decimal::ZERO)),
            },
            TermsSource::Explicit,
        ),
        None => {
            let mut terms = classify_by_name(&exam.exam_name);
            if let Some(offers) = exam.offers_add_on {
                terms.offers_add_on = offers;
            }
            (terms, TermsSource::NameClassification)
        }
    }
}

pub fn terms_for(exam: &Exam) -> ExamTerms {
    resolve_terms(exam).0
}

/// Price of the add-on for this exam, zero when none is offered.
pub fn add_on_price(exam: &Exam) -> Decimal {
    if terms_for(exam).offers_add_on {
        exam.extra_fee.unwrap_or(Decimal::ZERO)
    } else {
        Decimal::ZERO
    }
}
