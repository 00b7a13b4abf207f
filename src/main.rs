use anyhow::{anyhow, bail, Context};
use edupay_portal::auth::AuthContext;
use edupay_portal::backend::types::{ClubId, PaymentKind, StudentId};
use edupay_portal::backend::{HttpBackend, PortalBackend};
use edupay_portal::cache::{build_store, PendingReceipts};
use edupay_portal::config::{AppConfig, ConfigError};
use edupay_portal::logging::init_tracing;
use edupay_portal::payments::{
    Checkout, CheckoutRedirect, PaymentError, PaymentResult, PaymentSubmitter, PaymentVerifier,
    ReceiptSource, VerificationState,
};
use edupay_portal::services::{ExamSelection, FeeAggregator, Recalculation};
use futures::future::join_all;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

const USAGE: &str = "usage: edupay <command> [args]

commands:
  students                              list the parent's students
  exams [student_id]                    list exams (all students when omitted)
  fees <student_id>... [--club S:C]...  calculate school fees
  pay-fees <student_id>... [--club S:C]...
                                        start a school fee checkout
  pay-exams <student_id> <exam_id[=amount][+addon]>...
                                        start an exam fee checkout
  verify <redirect_url> [--exam]        verify a payment after checkout
  ack <reference>                       clear the stored receipt snapshot";

/// Prints the checkout URL for the user to open.
struct PrintRedirect;

#[async_trait::async_trait]
impl CheckoutRedirect for PrintRedirect {
    async fn redirect(&self, checkout: &Checkout) -> PaymentResult<()> {
        println!("Open this URL to complete payment:\n  {}", checkout.authorization_url);
        if let Some(reference) = &checkout.reference {
            println!("Payment reference: {}", reference);
        }
        Ok(())
    }
}

fn auth_from_env() -> Result<AuthContext, ConfigError> {
    let parent_id = env::var("PORTAL_PARENT_ID")
        .map_err(|_| ConfigError::MissingVariable("PORTAL_PARENT_ID".to_string()))?;
    let mut auth = AuthContext::new(parent_id);
    if let Ok(email) = env::var("PORTAL_PARENT_EMAIL") {
        auth = auth.with_email(email);
    }
    if let Ok(token) = env::var("PORTAL_API_TOKEN") {
        auth = auth.with_access_token(token);
    }
    Ok(auth)
}

/// Cancel polling on Ctrl+C.
async fn cancel_on_ctrl_c(cancel_tx: watch::Sender<bool>) {
    if signal::ctrl_c().await.is_ok() {
        info!("Interrupt received, cancelling verification");
        let _ = cancel_tx.send(true);
    }
}

type ClubSelection = BTreeMap<StudentId, Vec<ClubId>>;

fn parse_students(args: &[String]) -> anyhow::Result<(Vec<StudentId>, ClubSelection)> {
    let mut ids = Vec::new();
    let mut clubs = ClubSelection::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--club" {
            let pair = iter.next().ok_or_else(|| anyhow!("--club needs STUDENT:CLUB"))?;
            let (student, club) = pair
                .split_once(':')
                .ok_or_else(|| anyhow!("invalid club selection {}", pair))?;
            clubs
                .entry(student.parse().context("invalid student id")?)
                .or_default()
                .push(club.parse().context("invalid club id")?);
        } else {
            ids.push(arg.parse().with_context(|| format!("invalid student id {}", arg))?);
        }
    }
    if ids.is_empty() {
        bail!("at least one student id is required");
    }
    Ok((ids, clubs))
}

struct ExamArg {
    exam_id: i64,
    amount: Option<Decimal>,
    add_on: bool,
}

fn parse_exam_arg(arg: &str) -> anyhow::Result<ExamArg> {
    let (rest, add_on) = match arg.strip_suffix("+addon") {
        Some(rest) => (rest, true),
        None => (arg, false),
    };
    let (id, amount) = match rest.split_once('=') {
        Some((id, amount)) => (
            id,
            Some(Decimal::from_str(amount).with_context(|| format!("invalid amount {}", amount))?),
        ),
        None => (rest, None),
    };
    Ok(ExamArg {
        exam_id: id.parse().with_context(|| format!("invalid exam id {}", id))?,
        amount,
        add_on,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    config.validate()?;
    init_tracing(&config.logging);

    let args: Vec<String> = env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        println!("{}", USAGE);
        return Ok(());
    };

    let auth = auth_from_env()?;
    let backend: Arc<dyn PortalBackend> = Arc::new(HttpBackend::new(config.api.backend_config())?);
    let receipts = PendingReceipts::new(build_store(&config.store).await?, config.store.ttl);

    match command.as_str() {
        "students" => {
            let directory = backend.list_students(&auth).await?;
            for student in &directory.students {
                println!(
                    "{:>6}  {:<32} {:<10} fees {}",
                    student.id,
                    student.full_name(),
                    student.class_name.as_deref().unwrap_or("-"),
                    if student.school_fees_paid { "paid" } else { "due" }
                );
            }
        }
        "exams" => {
            let student_ids: Vec<StudentId> = match rest.first() {
                Some(id) => vec![id.parse().context("invalid student id")?],
                None => backend
                    .list_students(&auth)
                    .await?
                    .students
                    .iter()
                    .map(|s| s.id)
                    .collect(),
            };
            let lists = join_all(
                student_ids
                    .iter()
                    .map(|&id| backend.list_student_exams(&auth, id)),
            )
            .await;
            for (student_id, exams) in student_ids.iter().zip(lists) {
                println!("student {}:", student_id);
                for exam in exams? {
                    let terms = edupay_portal::services::exam_policy::terms_for(&exam);
                    println!(
                        "  {:>6}  {:<32} due {:>12}  {}{}",
                        exam.exam_id,
                        exam.exam_name,
                        exam.amount_due,
                        if terms.allows_partial() { "installments" } else { "full payment" },
                        if exam.is_fully_paid { " (paid)" } else { "" }
                    );
                }
            }
        }
        "fees" | "pay-fees" => {
            let (student_ids, clubs) = parse_students(rest)?;
            let aggregator = FeeAggregator::new(backend.clone(), config.aggregator.clone());
            let summary = match aggregator.calculate_fees(&auth, &student_ids, &clubs).await? {
                Recalculation::Applied(summary) => summary,
                Recalculation::Superseded => bail!("fee calculation was superseded"),
            };
            for fees in &summary.calculation.student_fees {
                println!(
                    "student {} {}:",
                    fees.student_id,
                    fees.student_name.as_deref().unwrap_or("")
                );
                for item in fees.fees.iter() {
                    println!("  {:<24} {:>12}", item.code, item.amount);
                }
                for club in &fees.clubs {
                    println!("  club {:<19} {:>12}", club.name, club.price);
                }
                println!("  {:<24} {:>12}", "final", fees.final_amount);
            }
            println!("Total: {}", summary.display_total);

            if command == "pay-fees" {
                let submitter = PaymentSubmitter::new(
                    backend.clone(),
                    receipts,
                    Arc::new(PrintRedirect),
                    config.payments.clone(),
                );
                submitter
                    .submit_school_fees(&auth, &summary)
                    .await
                    .map_err(report)?;
            }
        }
        "pay-exams" => {
            let (student, exam_args) = rest
                .split_first()
                .ok_or_else(|| anyhow!("pay-exams needs a student id"))?;
            let student_id: StudentId = student.parse().context("invalid student id")?;
            let exams = backend.list_student_exams(&auth, student_id).await?;

            let mut selection = ExamSelection::new(student_id);
            for arg in exam_args {
                let wanted = parse_exam_arg(arg)?;
                let exam = exams
                    .iter()
                    .find(|e| e.exam_id == wanted.exam_id)
                    .ok_or_else(|| anyhow!("exam {} not found for student", wanted.exam_id))?;
                if !selection.toggle_exam(exam) {
                    bail!("exam {} has nothing left to pay", exam.exam_id);
                }
                match wanted.amount {
                    Some(amount) => {
                        if let Some(clamped) = selection.clamp_amount(exam.exam_id, amount) {
                            selection.update_payment_amount(exam.exam_id, clamped);
                        }
                    }
                    None => selection.pay_full_balance(exam.exam_id),
                }
                if wanted.add_on {
                    selection.toggle_add_on(exam.exam_id);
                }
            }
            println!("Total: {}", selection.calculate_total());

            let submitter = PaymentSubmitter::new(
                backend.clone(),
                receipts,
                Arc::new(PrintRedirect),
                config.payments.clone(),
            );
            submitter
                .submit_exam_fees(&auth, &selection)
                .await
                .map_err(report)?;
        }
        "verify" => {
            let redirect_url = rest.first().ok_or_else(|| anyhow!("verify needs a redirect URL"))?;
            let kind = if rest.iter().any(|a| a == "--exam") {
                PaymentKind::Exam
            } else {
                PaymentKind::SchoolFees
            };

            let verifier = PaymentVerifier::new(backend.clone(), receipts, config.verification.clone());
            let (cancel_tx, cancel_rx) = watch::channel(false);
            tokio::spawn(cancel_on_ctrl_c(cancel_tx));

            let mut states = verifier.subscribe();
            let progress = tokio::spawn(async move {
                while states.changed().await.is_ok() {
                    if let VerificationState::TakingLonger { .. } = *states.borrow() {
                        println!("Payment confirmation is taking longer than expected...");
                    }
                }
            });

            let outcome = verifier
                .verify_redirect(&auth, kind, redirect_url, cancel_rx)
                .await
                .map_err(report);
            drop(verifier);
            let _ = progress.await;
            let outcome = outcome?;

            println!("Payment {} confirmed.", outcome.reference);
            match outcome.receipt {
                ReceiptSource::Backend(receipt) => {
                    for line in receipt.fees.iter().chain(&receipt.clubs).chain(&receipt.exams) {
                        println!("  {:<32} {:>12}", line.name, line.amount);
                    }
                    println!("Total paid: {}", receipt.total_amount);
                }
                ReceiptSource::Snapshot(snapshot) => {
                    for exam in &snapshot.exams {
                        println!("  {:<32} {:>12}", exam.exam_name, exam.amount_paid);
                        if exam.include_add_on {
                            println!("  {:<32} {:>12}", "  study materials", exam.add_on_cost);
                        }
                    }
                    for student in &snapshot.students {
                        if let Some(fees) = &student.breakdown {
                            println!(
                                "  {:<32} {:>12}",
                                student.name.as_deref().unwrap_or("student"),
                                fees.final_amount
                            );
                        }
                    }
                    println!("Total paid: {} (from saved payment details)", snapshot.total_amount);
                }
            }
        }
        "ack" => {
            let reference = rest.first().ok_or_else(|| anyhow!("ack needs a payment reference"))?;
            let verifier = PaymentVerifier::new(backend.clone(), receipts, config.verification.clone());
            verifier.acknowledge(reference).await.map_err(report)?;
            println!("Cleared saved receipt for {}", reference);
        }
        other => {
            eprintln!("unknown command: {}\n\n{}", other, USAGE);
            std::process::exit(2);
        }
    }

    Ok(())
}

/// Log the diagnostic and surface the user-facing message with its
/// recovery action.
fn report(err: PaymentError) -> anyhow::Error {
    error!(error = %err, "payment flow failed");
    anyhow!("{} ({:?})", err.user_message(), err.recovery_action())
}
