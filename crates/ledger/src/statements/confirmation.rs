//! Balance confirmation: open receivables or payables per contact as of a date.
//!
//! Built from invoice records rather than journal lines. The invoicing module owns
//! those records; this view only reads them.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tally_core::{ContactId, InvoiceId, TenantId};

use crate::currency::CurrencyCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceKind {
    /// Receivable.
    Sales,
    /// Payable.
    Purchase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Open,
    Paid,
    Void,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub id: InvoiceId,
    pub tenant_id: TenantId,
    pub invoice_number: String,
    pub contact_id: ContactId,
    pub contact_name: String,
    pub kind: InvoiceKind,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub currency: CurrencyCode,
    pub total: Decimal,
    pub amount_paid: Decimal,
    pub status: InvoiceStatus,
}

impl InvoiceRecord {
    pub fn outstanding(&self) -> Decimal {
        self.total - self.amount_paid
    }

    pub fn days_overdue(&self, as_of: NaiveDate) -> i64 {
        (as_of - self.due_date).num_days().max(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationLine {
    pub invoice_id: InvoiceId,
    pub invoice_number: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub currency: CurrencyCode,
    pub total: Decimal,
    pub amount_paid: Decimal,
    pub outstanding_amount: Decimal,
    pub days_overdue: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactConfirmation {
    pub contact_id: ContactId,
    pub contact_name: String,
    pub invoices: Vec<ConfirmationLine>,
    pub total_outstanding: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceConfirmation {
    pub kind: InvoiceKind,
    pub as_of: NaiveDate,
    pub contacts: Vec<ContactConfirmation>,
    /// Always the sum of the per-contact totals.
    pub total_outstanding: Decimal,
}

pub fn balance_confirmation(
    invoices: &[InvoiceRecord],
    contact: Option<ContactId>,
    kind: InvoiceKind,
    as_of: NaiveDate,
) -> BalanceConfirmation {
    let mut grouped: BTreeMap<(String, ContactId), Vec<&InvoiceRecord>> = BTreeMap::new();
    for invoice in invoices.iter().filter(|i| {
        i.kind == kind
            && i.status == InvoiceStatus::Open
            && i.issue_date <= as_of
            && i.outstanding() > Decimal::ZERO
            && contact.is_none_or(|c| c == i.contact_id)
    }) {
        grouped
            .entry((invoice.contact_name.clone(), invoice.contact_id))
            .or_default()
            .push(invoice);
    }

    let contacts: Vec<ContactConfirmation> = grouped
        .into_iter()
        .map(|((contact_name, contact_id), mut records)| {
            records.sort_by(|a, b| a.invoice_number.cmp(&b.invoice_number));
            let invoices: Vec<ConfirmationLine> = records
                .into_iter()
                .map(|i| ConfirmationLine {
                    invoice_id: i.id,
                    invoice_number: i.invoice_number.clone(),
                    issue_date: i.issue_date,
                    due_date: i.due_date,
                    currency: i.currency.clone(),
                    total: i.total,
                    amount_paid: i.amount_paid,
                    outstanding_amount: i.outstanding(),
                    days_overdue: i.days_overdue(as_of),
                })
                .collect();
            let total_outstanding = invoices.iter().map(|l| l.outstanding_amount).sum();
            ContactConfirmation {
                contact_id,
                contact_name,
                invoices,
                total_outstanding,
            }
        })
        .collect();

    let total_outstanding = contacts.iter().map(|c| c.total_outstanding).sum();

    BalanceConfirmation {
        kind,
        as_of,
        contacts,
        total_outstanding,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn invoice(
        contact: (ContactId, &str),
        number: &str,
        due: NaiveDate,
        total: Decimal,
        paid: Decimal,
    ) -> InvoiceRecord {
        InvoiceRecord {
            id: InvoiceId::new(),
            tenant_id: TenantId::new(),
            invoice_number: number.to_string(),
            contact_id: contact.0,
            contact_name: contact.1.to_string(),
            kind: InvoiceKind::Sales,
            issue_date: d(2024, 1, 1),
            due_date: due,
            currency: CurrencyCode::parse("EUR").unwrap(),
            total,
            amount_paid: paid,
            status: InvoiceStatus::Open,
        }
    }

    #[test]
    fn partially_paid_invoice_is_overdue() {
        let acme = (ContactId::new(), "Acme");
        let inv = invoice(acme, "INV-1", d(2024, 1, 31), dec!(1000.00), dec!(400.00));

        let report = balance_confirmation(&[inv], None, InvoiceKind::Sales, d(2024, 2, 15));
        assert_eq!(report.contacts.len(), 1);
        let line = &report.contacts[0].invoices[0];
        assert_eq!(line.outstanding_amount, dec!(600.00));
        assert_eq!(line.days_overdue, 15);
        assert_eq!(report.total_outstanding, dec!(600.00));
    }

    #[test]
    fn groups_by_contact_name_and_filters() {
        let acme = (ContactId::new(), "Acme");
        let zed = (ContactId::new(), "Zed Ltd");
        let mut paid = invoice(acme, "INV-9", d(2024, 3, 1), dec!(50.00), dec!(50.00));
        paid.status = InvoiceStatus::Paid;
        let mut purchase = invoice(acme, "BILL-1", d(2024, 3, 1), dec!(70.00), dec!(0));
        purchase.kind = InvoiceKind::Purchase;
        let mut future = invoice(zed, "INV-7", d(2024, 6, 1), dec!(30.00), dec!(0));
        future.issue_date = d(2024, 5, 1);

        let invoices = vec![
            invoice(zed, "INV-5", d(2024, 3, 1), dec!(300.00), dec!(0)),
            invoice(acme, "INV-3", d(2024, 3, 20), dec!(100.00), dec!(0)),
            invoice(acme, "INV-2", d(2024, 3, 1), dec!(200.00), dec!(0)),
            paid,
            purchase,
            future,
        ];

        let report = balance_confirmation(&invoices, None, InvoiceKind::Sales, d(2024, 3, 10));
        let names: Vec<&str> = report.contacts.iter().map(|c| c.contact_name.as_str()).collect();
        assert_eq!(names, vec!["Acme", "Zed Ltd"]);
        let acme_numbers: Vec<&str> = report.contacts[0]
            .invoices
            .iter()
            .map(|l| l.invoice_number.as_str())
            .collect();
        assert_eq!(acme_numbers, vec!["INV-2", "INV-3"]);
        assert_eq!(report.contacts[0].invoices[1].days_overdue, 0);
        assert_eq!(report.contacts[0].total_outstanding, dec!(300.00));
        assert_eq!(report.total_outstanding, dec!(600.00));

        let only_zed = balance_confirmation(&invoices, Some(zed.0), InvoiceKind::Sales, d(2024, 3, 10));
        assert_eq!(only_zed.contacts.len(), 1);
        assert_eq!(only_zed.total_outstanding, dec!(300.00));
    }
}
