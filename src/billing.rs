//! Billing rules for quotations and orders.
//!
//! Everything here is pure: storage loads the current row, asks this module
//! what the next state is, and persists the answer inside the same
//! transaction. Amounts are `BigDecimal` rounded half-up to two decimals.

use bigdecimal::{BigDecimal, RoundingMode, Zero};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

/// Reasons a billing operation is refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingError {
    EmptyItems,
    InvalidQuantity(i32),
    InvalidPrice(String),
    InvalidDiscount { discount: String, subtotal: String },
    InvalidTaxRate(String),
    NonPositiveAmount(String),
    Overpayment { amount: String, balance_due: String },
    PaymentNotAllowed(String),
    InvalidTransition { from: String, to: String },
    NotEditable(String),
    CancelWithPayments,
    NotConvertible(String),
    UnknownStatus(String),
}

impl fmt::Display for BillingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BillingError::EmptyItems => write!(f, "at least one line item is required"),
            BillingError::InvalidQuantity(q) => {
                write!(f, "quantity must be greater than zero (got {})", q)
            }
            BillingError::InvalidPrice(p) => write!(f, "unit price cannot be negative (got {})", p),
            BillingError::InvalidDiscount { discount, subtotal } => write!(
                f,
                "discount {} must be between 0 and the subtotal {}",
                discount, subtotal
            ),
            BillingError::InvalidTaxRate(r) => {
                write!(f, "tax rate must be between 0 and 100 percent (got {})", r)
            }
            BillingError::NonPositiveAmount(a) => {
                write!(f, "payment amount must be greater than zero (got {})", a)
            }
            BillingError::Overpayment {
                amount,
                balance_due,
            } => write!(
                f,
                "payment of {} exceeds the balance due of {}",
                amount, balance_due
            ),
            BillingError::PaymentNotAllowed(status) => {
                write!(f, "payments are not accepted while status is '{}'", status)
            }
            BillingError::InvalidTransition { from, to } => {
                write!(f, "cannot move from '{}' to '{}'", from, to)
            }
            BillingError::NotEditable(status) => {
                write!(f, "cannot edit items while status is '{}'", status)
            }
            BillingError::CancelWithPayments => {
                write!(f, "an order that has received payments cannot be cancelled")
            }
            BillingError::NotConvertible(status) => write!(
                f,
                "only accepted or paid quotations can be converted (status is '{}')",
                status
            ),
            BillingError::UnknownStatus(s) => write!(f, "unknown status '{}'", s),
        }
    }
}

impl std::error::Error for BillingError {}

macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = BillingError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(BillingError::UnknownStatus(other.to_string())),
                }
            }
        }
    };
}

text_enum!(
    /// Lifecycle of a quotation.
    QuotationStatus {
        Draft => "draft",
        Sent => "sent",
        Accepted => "accepted",
        PartiallyPaid => "partially_paid",
        Paid => "paid",
        Converted => "converted",
        Rejected => "rejected",
        Expired => "expired",
    }
);

text_enum!(
    /// Fulfilment lifecycle of an order.
    OrderStatus {
        Pending => "pending",
        Confirmed => "confirmed",
        Processing => "processing",
        Shipped => "shipped",
        Delivered => "delivered",
        Cancelled => "cancelled",
    }
);

text_enum!(
    /// Derived from `amount_paid` against `total`; never set by hand.
    PaymentStatus {
        Unpaid => "unpaid",
        PartiallyPaid => "partially_paid",
        Paid => "paid",
    }
);

text_enum!(
    /// How a payment was collected.
    PaymentMethod {
        Cash => "cash",
        Upi => "upi",
        BankTransfer => "bank_transfer",
        Card => "card",
        PaymentLink => "payment_link",
        Other => "other",
    }
);

impl QuotationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QuotationStatus::Converted | QuotationStatus::Rejected | QuotationStatus::Expired
        )
    }

    /// Items, discount and tax can be changed.
    pub fn is_editable(&self) -> bool {
        matches!(self, QuotationStatus::Draft | QuotationStatus::Sent)
    }

    pub fn accepts_payments(&self) -> bool {
        matches!(
            self,
            QuotationStatus::Sent | QuotationStatus::Accepted | QuotationStatus::PartiallyPaid
        )
    }

    pub fn is_convertible(&self) -> bool {
        matches!(
            self,
            QuotationStatus::Accepted | QuotationStatus::PartiallyPaid | QuotationStatus::Paid
        )
    }

    /// Manual transitions. Payment-driven moves go through
    /// [`apply_quotation_payment`] instead.
    pub fn can_transition_to(&self, next: QuotationStatus) -> bool {
        use QuotationStatus::*;
        matches!(
            (self, next),
            (Draft, Sent)
                | (Draft, Rejected)
                | (Sent, Accepted)
                | (Sent, Rejected)
                | (Sent, Expired)
                | (Accepted, Rejected)
                | (Accepted, Expired)
                | (Accepted, Converted)
                | (PartiallyPaid, Converted)
                | (Paid, Converted)
        )
    }
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, Processing)
                | (Confirmed, Cancelled)
                | (Processing, Shipped)
                | (Processing, Cancelled)
                | (Shipped, Delivered)
        )
    }
}

/// Rounds half-up to two decimal places.
pub fn round_money(value: &BigDecimal) -> BigDecimal {
    value.with_scale_round(2, RoundingMode::HalfUp)
}

/// Outstanding amount, never negative.
pub fn balance_due(total: &BigDecimal, amount_paid: &BigDecimal) -> BigDecimal {
    let balance = round_money(&(total - amount_paid));
    if balance < BigDecimal::zero() {
        round_money(&BigDecimal::zero())
    } else {
        balance
    }
}

pub fn derive_payment_status(amount_paid: &BigDecimal, total: &BigDecimal) -> PaymentStatus {
    if amount_paid >= total {
        PaymentStatus::Paid
    } else if amount_paid.is_zero() {
        PaymentStatus::Unpaid
    } else {
        PaymentStatus::PartiallyPaid
    }
}

/// Quantity and unit price of one line.
#[derive(Debug, Clone)]
pub struct LineAmount {
    pub quantity: i32,
    pub unit_price: BigDecimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Totals {
    /// One entry per input line, in order.
    pub line_totals: Vec<BigDecimal>,
    pub subtotal: BigDecimal,
    pub discount: BigDecimal,
    pub tax_rate: BigDecimal,
    pub tax_amount: BigDecimal,
    pub total: BigDecimal,
}

pub fn line_total(quantity: i32, unit_price: &BigDecimal) -> Result<BigDecimal, BillingError> {
    if quantity <= 0 {
        return Err(BillingError::InvalidQuantity(quantity));
    }
    if *unit_price < BigDecimal::zero() {
        return Err(BillingError::InvalidPrice(unit_price.to_string()));
    }
    Ok(round_money(&(unit_price * BigDecimal::from(quantity))))
}

pub fn compute_totals(
    lines: &[LineAmount],
    discount: &BigDecimal,
    tax_rate: &BigDecimal,
) -> Result<Totals, BillingError> {
    if lines.is_empty() {
        return Err(BillingError::EmptyItems);
    }

    let line_totals = lines
        .iter()
        .map(|l| line_total(l.quantity, &l.unit_price))
        .collect::<Result<Vec<_>, _>>()?;

    let subtotal = round_money(
        &line_totals
            .iter()
            .fold(BigDecimal::zero(), |acc, t| acc + t),
    );

    let discount = round_money(discount);
    if discount < BigDecimal::zero() || discount > subtotal {
        return Err(BillingError::InvalidDiscount {
            discount: discount.to_string(),
            subtotal: subtotal.to_string(),
        });
    }

    // Stored with two decimals; tax is computed from the stored rate.
    let tax_rate = round_money(tax_rate);
    if tax_rate < BigDecimal::zero() || tax_rate > BigDecimal::from(100) {
        return Err(BillingError::InvalidTaxRate(tax_rate.to_string()));
    }

    let taxable = &subtotal - &discount;
    let tax_amount = round_money(&(&taxable * &tax_rate / BigDecimal::from(100)));
    let total = round_money(&(&taxable + &tax_amount));

    Ok(Totals {
        line_totals,
        subtotal,
        discount,
        tax_rate,
        tax_amount,
        total,
    })
}

fn check_amount(
    amount: &BigDecimal,
    total: &BigDecimal,
    amount_paid: &BigDecimal,
) -> Result<BigDecimal, BillingError> {
    let amount = round_money(amount);
    if amount <= BigDecimal::zero() {
        return Err(BillingError::NonPositiveAmount(amount.to_string()));
    }
    let due = balance_due(total, amount_paid);
    if amount > due {
        return Err(BillingError::Overpayment {
            amount: amount.to_string(),
            balance_due: due.to_string(),
        });
    }
    Ok(amount)
}

pub fn transition_quotation(
    current: QuotationStatus,
    next: QuotationStatus,
) -> Result<QuotationStatus, BillingError> {
    if current.can_transition_to(next) {
        Ok(next)
    } else {
        Err(BillingError::InvalidTransition {
            from: current.to_string(),
            to: next.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuotationPaymentOutcome {
    pub status: QuotationStatus,
    pub amount_paid: BigDecimal,
    pub balance_due: BigDecimal,
}

pub fn apply_quotation_payment(
    status: QuotationStatus,
    total: &BigDecimal,
    amount_paid: &BigDecimal,
    amount: &BigDecimal,
) -> Result<QuotationPaymentOutcome, BillingError> {
    if !status.accepts_payments() {
        return Err(BillingError::PaymentNotAllowed(status.to_string()));
    }
    let amount = check_amount(amount, total, amount_paid)?;
    let new_paid = round_money(&(amount_paid + &amount));

    let status = match derive_payment_status(&new_paid, total) {
        PaymentStatus::Paid => QuotationStatus::Paid,
        _ => QuotationStatus::PartiallyPaid,
    };

    Ok(QuotationPaymentOutcome {
        status,
        balance_due: balance_due(total, &new_paid),
        amount_paid: new_paid,
    })
}

pub fn transition_order(
    current: OrderStatus,
    next: OrderStatus,
    amount_paid: &BigDecimal,
) -> Result<OrderStatus, BillingError> {
    if !current.can_transition_to(next) {
        return Err(BillingError::InvalidTransition {
            from: current.to_string(),
            to: next.to_string(),
        });
    }
    if next == OrderStatus::Cancelled && *amount_paid > BigDecimal::zero() {
        return Err(BillingError::CancelWithPayments);
    }
    Ok(next)
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderPaymentOutcome {
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub amount_paid: BigDecimal,
    pub balance_due: BigDecimal,
}

pub fn apply_order_payment(
    status: OrderStatus,
    total: &BigDecimal,
    amount_paid: &BigDecimal,
    amount: &BigDecimal,
) -> Result<OrderPaymentOutcome, BillingError> {
    if status == OrderStatus::Cancelled
        || derive_payment_status(amount_paid, total) == PaymentStatus::Paid
    {
        return Err(BillingError::PaymentNotAllowed(status.to_string()));
    }
    let amount = check_amount(amount, total, amount_paid)?;
    let new_paid = round_money(&(amount_paid + &amount));

    let status = if status == OrderStatus::Pending {
        OrderStatus::Confirmed
    } else {
        status
    };

    Ok(OrderPaymentOutcome {
        status,
        payment_status: derive_payment_status(&new_paid, total),
        balance_due: balance_due(total, &new_paid),
        amount_paid: new_paid,
    })
}

/// Checks a quotation can become an order and returns the order's first status.
pub fn plan_conversion(
    status: QuotationStatus,
    amount_paid: &BigDecimal,
) -> Result<OrderStatus, BillingError> {
    if !status.is_convertible() {
        return Err(BillingError::NotConvertible(status.to_string()));
    }
    if *amount_paid > BigDecimal::zero() {
        Ok(OrderStatus::Confirmed)
    } else {
        Ok(OrderStatus::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn line(quantity: i32, price: &str) -> LineAmount {
        LineAmount {
            quantity,
            unit_price: d(price),
        }
    }

    #[test]
    fn totals_apply_discount_before_tax() {
        let totals = compute_totals(
            &[line(2, "499.50"), line(1, "100")],
            &d("99"),
            &d("18"),
        )
        .unwrap();

        assert_eq!(totals.line_totals, vec![d("999.00"), d("100.00")]);
        assert_eq!(totals.subtotal, d("1099.00"));
        assert_eq!(totals.tax_amount, d("180.00"));
        assert_eq!(totals.total, d("1180.00"));
    }

    #[test]
    fn tax_rounds_half_up() {
        // 10.05 * 5% = 0.5025 -> 0.50; 10.10 * 5% = 0.505 -> 0.51
        let a = compute_totals(&[line(1, "10.05")], &d("0"), &d("5")).unwrap();
        let b = compute_totals(&[line(1, "10.10")], &d("0"), &d("5")).unwrap();
        assert_eq!(a.tax_amount, d("0.50"));
        assert_eq!(b.tax_amount, d("0.51"));
    }

    #[test]
    fn tax_uses_the_stored_rate() {
        // 18.125% is stored as 18.13%; 1000 * 18.13% = 181.30, not 181.25
        let totals = compute_totals(&[line(1, "1000")], &d("0"), &d("18.125")).unwrap();
        assert_eq!(totals.tax_rate, d("18.13"));
        assert_eq!(totals.tax_amount, d("181.30"));
        assert_eq!(totals.total, d("1181.30"));
    }

    #[test]
    fn totals_reject_bad_input() {
        assert_eq!(
            compute_totals(&[], &d("0"), &d("0")),
            Err(BillingError::EmptyItems)
        );
        assert_eq!(
            compute_totals(&[line(0, "10")], &d("0"), &d("0")),
            Err(BillingError::InvalidQuantity(0))
        );
        assert!(matches!(
            compute_totals(&[line(1, "-1")], &d("0"), &d("0")),
            Err(BillingError::InvalidPrice(_))
        ));
        assert!(matches!(
            compute_totals(&[line(1, "10")], &d("10.01"), &d("0")),
            Err(BillingError::InvalidDiscount { .. })
        ));
        assert!(matches!(
            compute_totals(&[line(1, "10")], &d("0"), &d("100.5")),
            Err(BillingError::InvalidTaxRate(_))
        ));
    }

    #[test]
    fn payment_status_is_derived() {
        assert_eq!(derive_payment_status(&d("0"), &d("100")), PaymentStatus::Unpaid);
        assert_eq!(
            derive_payment_status(&d("40"), &d("100")),
            PaymentStatus::PartiallyPaid
        );
        assert_eq!(derive_payment_status(&d("100.00"), &d("100")), PaymentStatus::Paid);
        assert_eq!(derive_payment_status(&d("0"), &d("0")), PaymentStatus::Paid);
    }

    #[test]
    fn partial_then_full_quotation_payment() {
        let first =
            apply_quotation_payment(QuotationStatus::Sent, &d("1000"), &d("0"), &d("400"))
                .unwrap();
        assert_eq!(first.status, QuotationStatus::PartiallyPaid);
        assert_eq!(first.balance_due, d("600"));

        let second = apply_quotation_payment(
            first.status,
            &d("1000"),
            &first.amount_paid,
            &d("600"),
        )
        .unwrap();
        assert_eq!(second.status, QuotationStatus::Paid);
        assert_eq!(second.balance_due, d("0"));
    }

    #[test]
    fn quotation_refuses_payment_outside_open_states() {
        for status in [
            QuotationStatus::Draft,
            QuotationStatus::Paid,
            QuotationStatus::Rejected,
            QuotationStatus::Expired,
            QuotationStatus::Converted,
        ] {
            assert_eq!(
                apply_quotation_payment(status, &d("10"), &d("0"), &d("1")),
                Err(BillingError::PaymentNotAllowed(status.to_string()))
            );
        }
    }

    #[test]
    fn overpayment_is_refused() {
        let err = apply_order_payment(OrderStatus::Confirmed, &d("100"), &d("60"), &d("40.01"))
            .unwrap_err();
        assert_eq!(
            err,
            BillingError::Overpayment {
                amount: "40.01".to_string(),
                balance_due: "40.00".to_string()
            }
        );
    }

    #[test]
    fn zero_payment_is_refused() {
        assert!(matches!(
            apply_order_payment(OrderStatus::Pending, &d("100"), &d("0"), &d("0")),
            Err(BillingError::NonPositiveAmount(_))
        ));
    }

    #[test]
    fn first_payment_confirms_pending_order() {
        let outcome =
            apply_order_payment(OrderStatus::Pending, &d("100"), &d("0"), &d("30")).unwrap();
        assert_eq!(outcome.status, OrderStatus::Confirmed);
        assert_eq!(outcome.payment_status, PaymentStatus::PartiallyPaid);

        let shipped =
            apply_order_payment(OrderStatus::Shipped, &d("100"), &d("30"), &d("70")).unwrap();
        assert_eq!(shipped.status, OrderStatus::Shipped);
        assert_eq!(shipped.payment_status, PaymentStatus::Paid);
    }

    #[test]
    fn cancelled_or_paid_orders_refuse_payment() {
        assert!(apply_order_payment(OrderStatus::Cancelled, &d("100"), &d("0"), &d("1")).is_err());
        assert!(apply_order_payment(OrderStatus::Delivered, &d("100"), &d("100"), &d("1")).is_err());
    }

    #[test]
    fn order_transitions_follow_the_pipeline() {
        let zero = d("0");
        assert_eq!(
            transition_order(OrderStatus::Pending, OrderStatus::Confirmed, &zero),
            Ok(OrderStatus::Confirmed)
        );
        assert!(transition_order(OrderStatus::Pending, OrderStatus::Shipped, &zero).is_err());
        assert!(transition_order(OrderStatus::Delivered, OrderStatus::Cancelled, &zero).is_err());
        assert_eq!(
            transition_order(OrderStatus::Confirmed, OrderStatus::Cancelled, &d("1")),
            Err(BillingError::CancelWithPayments)
        );
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for from in QuotationStatus::ALL.iter().filter(|s| s.is_terminal()) {
            for to in QuotationStatus::ALL {
                assert!(!from.can_transition_to(*to), "{} -> {}", from, to);
            }
        }
        for from in OrderStatus::ALL.iter().filter(|s| s.is_terminal()) {
            for to in OrderStatus::ALL {
                assert!(!from.can_transition_to(*to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn conversion_requires_acceptance() {
        assert_eq!(
            plan_conversion(QuotationStatus::Accepted, &d("0")),
            Ok(OrderStatus::Pending)
        );
        assert_eq!(
            plan_conversion(QuotationStatus::PartiallyPaid, &d("10")),
            Ok(OrderStatus::Confirmed)
        );
        assert!(plan_conversion(QuotationStatus::Sent, &d("0")).is_err());
    }

    #[test]
    fn statuses_round_trip_through_text() {
        for s in QuotationStatus::ALL {
            assert_eq!(s.as_str().parse::<QuotationStatus>().unwrap(), *s);
        }
        assert!("shipping".parse::<OrderStatus>().is_err());
    }
}
