use crate::backend::error::ApiError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

pub type StudentId = i64;
pub type ExamId = i64;
pub type ClubId = i64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Student {
    pub id: StudentId,
    pub first_name: String,
    #[serde(default)]
    pub middle_name: Option<String>,
    pub last_name: String,
    #[serde(default, alias = "reg_number")]
    pub registration_number: Option<String>,
    #[serde(default)]
    pub year_group: Option<String>,
    #[serde(default, rename = "class")]
    pub class_name: Option<String>,
    #[serde(default)]
    pub school_fees_paid: bool,
}

impl Student {
    pub fn full_name(&self) -> String {
        match self.middle_name.as_deref().map(str::trim) {
            Some(middle) if !middle.is_empty() => {
                format!("{} {} {}", self.first_name, middle, self.last_name)
            }
            _ => format!("{} {}", self.first_name, self.last_name),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Parent {
    pub id: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentDirectory {
    #[serde(default)]
    pub parent: Option<Parent>,
    #[serde(default)]
    pub students: Vec<Student>,
}

/// How an exam may be paid for, as declared by the backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentPolicy {
    FullPaymentOnly,
    PartialAllowed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Exam {
    pub exam_id: ExamId,
    #[serde(alias = "name")]
    pub exam_name: String,
    #[serde(alias = "price")]
    pub amount: Decimal,
    /// Price of the optional add-on (study materials), when one is offered.
    #[serde(default)]
    pub extra_fee: Option<Decimal>,
    #[serde(default)]
    pub amount_paid: Decimal,
    pub amount_due: Decimal,
    #[serde(default)]
    pub is_fully_paid: bool,
    #[serde(default)]
    pub payment_policy: Option<PaymentPolicy>,
    #[serde(default)]
    pub allows_installments: Option<bool>,
    #[serde(default)]
    pub offers_add_on: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamList {
    #[serde(default)]
    pub exam_list: Vec<Exam>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClubFee {
    pub id: ClubId,
    pub name: String,
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeeItem {
    pub code: String,
    pub amount: Decimal,
}

/// Named base fees in the order the backend listed them. New fee codes
/// may appear at any time, so the set is open.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeeItems(pub Vec<FeeItem>);

impl FeeItems {
    pub fn get(&self, code: &str) -> Option<Decimal> {
        self.0.iter().find(|item| item.code == code).map(|item| item.amount)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeeItem> {
        self.0.iter()
    }

    pub fn total(&self) -> Decimal {
        self.0.iter().map(|item| item.amount).sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for FeeItems {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for item in &self.0 {
            map.serialize_entry(&item.code, &item.amount)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FeeItems {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct FeeItemsVisitor;

        impl<'de> serde::de::Visitor<'de> for FeeItemsVisitor {
            type Value = FeeItems;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a map of fee code to amount")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let mut items = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((code, amount)) = access.next_entry::<String, Decimal>()? {
                    items.push(FeeItem { code, amount });
                }
                Ok(FeeItems(items))
            }
        }

        deserializer.deserialize_map(FeeItemsVisitor)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StudentFeeBreakdown {
    pub student_id: StudentId,
    #[serde(default)]
    pub student_name: Option<String>,
    #[serde(default)]
    pub fees: FeeItems,
    #[serde(default)]
    pub clubs: Vec<ClubFee>,
    pub subtotal: Decimal,
    #[serde(default)]
    pub discount_amount: Decimal,
    #[serde(default)]
    pub discount_percentage: Decimal,
    #[serde(default)]
    pub percentage_discount_amount: Decimal,
    pub final_amount: Decimal,
    #[serde(default)]
    pub student_fee_ids: Vec<i64>,
}

impl StudentFeeBreakdown {
    pub fn club_total(&self) -> Decimal {
        self.clubs.iter().map(|club| club.price).sum()
    }

    /// Whether the server-computed figures agree with each other. The
    /// client never replaces them; this only feeds diagnostics.
    pub fn is_consistent(&self) -> bool {
        let expected_pct = (self.subtotal * self.discount_percentage / Decimal::ONE_HUNDRED)
            .round_dp(2);
        let expected_final =
            self.subtotal - self.discount_amount - self.percentage_discount_amount;
        self.fees.total() + self.club_total() == self.subtotal
            && expected_pct == self.percentage_discount_amount.round_dp(2)
            && expected_final == self.final_amount
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeeCalculation {
    pub total_amount: Decimal,
    #[serde(default)]
    pub student_fees: Vec<StudentFeeBreakdown>,
}

impl FeeCalculation {
    pub fn empty() -> Self {
        Self {
            total_amount: Decimal::ZERO,
            student_fees: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeeCalculationRequest {
    pub student_ids: Vec<StudentId>,
    #[serde(default)]
    pub student_club_ids: BTreeMap<StudentId, Vec<ClubId>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    Ussd,
    MobileMoney,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Ussd => "ussd",
            PaymentMethod::MobileMoney => "mobile_money",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = ApiError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "card" => Ok(PaymentMethod::Card),
            "bank_transfer" | "bank" => Ok(PaymentMethod::BankTransfer),
            "ussd" => Ok(PaymentMethod::Ussd),
            "mobile_money" => Ok(PaymentMethod::MobileMoney),
            _ => Err(ApiError::ValidationError {
                message: format!("unsupported payment method: {}", value),
                field: Some("payment_method".to_string()),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SchoolFeePaymentRequest {
    pub student_ids: Vec<StudentId>,
    #[serde(serialize_with = "rust_decimal::serde::float::serialize")]
    pub amount: Decimal,
    pub parent_id: String,
    pub payment_method: PaymentMethod,
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub student_fee_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExamPaymentLine {
    pub exam_id: ExamId,
    #[serde(serialize_with = "rust_decimal::serde::float::serialize")]
    pub amount_paid: Decimal,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "rust_decimal::serde::float_option::serialize"
    )]
    pub add_on_amount: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExamPaymentRequest {
    pub student_id: StudentId,
    pub exam_payments: Vec<ExamPaymentLine>,
    #[serde(serialize_with = "rust_decimal::serde::float::serialize")]
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CheckoutData {
    #[serde(default)]
    pub authorization_url: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub access_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResponse {
    #[serde(default)]
    pub status: Option<serde_json::Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<CheckoutData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationStatus {
    Completed,
    Pending,
    /// Any other status string is terminal.
    Failed(String),
}

impl From<&str> for VerificationStatus {
    fn from(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "completed" => VerificationStatus::Completed,
            "pending" => VerificationStatus::Pending,
            other => VerificationStatus::Failed(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReceiptStudent {
    #[serde(default)]
    pub id: Option<StudentId>,
    #[serde(alias = "student_name")]
    pub name: String,
    #[serde(default, alias = "reg_number")]
    pub registration_number: Option<String>,
    #[serde(default, rename = "class")]
    pub class_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReceiptLine {
    #[serde(alias = "fee_name", alias = "exam_name", alias = "club_name")]
    pub name: String,
    #[serde(alias = "price", alias = "amount_paid")]
    pub amount: Decimal,
    #[serde(default)]
    pub student_id: Option<StudentId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Receipt {
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub students: Vec<ReceiptStudent>,
    #[serde(default)]
    pub fees: Vec<ReceiptLine>,
    #[serde(default)]
    pub clubs: Vec<ReceiptLine>,
    #[serde(default)]
    pub exams: Vec<ReceiptLine>,
    #[serde(default)]
    pub total_amount: Decimal,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub paid_at: Option<String>,
}

/// Which family of payment endpoints a reference belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    SchoolFees,
    Exam,
}
