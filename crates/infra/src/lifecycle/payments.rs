//! Payment lifecycle: invoices, provider callbacks and ledger reconciliation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use storefront_core::{
    DomainError, Pagination, SortOrder, StatusMachine, TimeRange, Transition, UserId,
};
use storefront_invoicing::{
    Invoice, InvoiceDraft, InvoiceFilter, InvoiceId, InvoiceListRequest, InvoiceState,
    PaymentMethod, ProviderId,
};
use storefront_sales::{OrderId, OrderStatus};

use super::{OrderService, RunReport};
use crate::error::{LifecycleError, LifecycleResult};
use crate::external::PaymentProvider;
use crate::store::InvoiceStore;

/// Ledger paging limits for the stuck-invoice scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerScan {
    pub page_size: u32,
    pub max_pages: u32,
}

impl Default for LedgerScan {
    fn default() -> Self {
        Self {
            page_size: 18,
            max_pages: 100,
        }
    }
}

/// Upper bound on invoices read back for one order.
const ORDER_INVOICES_LIMIT: u32 = 50;

pub struct PaymentService {
    invoices: Arc<dyn InvoiceStore>,
    orders: Arc<OrderService>,
    ledger: Arc<dyn PaymentProvider>,
    handling_timeout: Duration,
    scan: LedgerScan,
}

impl PaymentService {
    pub fn new(
        invoices: Arc<dyn InvoiceStore>,
        orders: Arc<OrderService>,
        ledger: Arc<dyn PaymentProvider>,
        handling_timeout: Duration,
        scan: LedgerScan,
    ) -> Self {
        Self {
            invoices,
            orders,
            ledger,
            handling_timeout,
            scan: LedgerScan {
                page_size: scan.page_size.max(1),
                max_pages: scan.max_pages.max(1),
            },
        }
    }

    /// Open an invoice for the caller's order awaiting payment.
    pub async fn create_invoice(
        &self,
        order_id: OrderId,
        user_id: UserId,
        method: PaymentMethod,
    ) -> LifecycleResult<InvoiceDraft> {
        let view = self.orders.get_order(order_id, user_id).await?;
        if view.order.status != OrderStatus::ExpectPayments {
            return Err(DomainError::validation("order is not awaiting payment").into());
        }
        if self
            .order_invoices(order_id)
            .await?
            .iter()
            .any(|invoice| !invoice.state.is_terminal())
        {
            return Err(DomainError::validation("order already has an open invoice").into());
        }

        let invoice = Invoice::open(view.order.id, view.order.price, method, Utc::now());
        let invoice_id = self.invoices.insert_invoice(invoice).await?;
        tracing::info!(invoice_id = %invoice_id, order_id = %order_id, method = method.as_str(), "invoice opened");

        Ok(InvoiceDraft {
            invoice_id,
            order_id,
            title: view.product.title,
            description: view.product.description,
            price: view.order.price,
            method,
            payload: invoice_id.to_string(),
        })
    }

    /// The invoice, if its order belongs to the caller.
    pub async fn get_invoice(
        &self,
        invoice_id: InvoiceId,
        user_id: UserId,
    ) -> LifecycleResult<Invoice> {
        let invoice = self.invoices.get_invoice(invoice_id).await?;
        self.orders.get_order(invoice.order_id, user_id).await?;
        Ok(invoice)
    }

    /// Provider pre-checkout. A dead order cancels the invoice instead.
    pub async fn handling(
        &self,
        invoice_id: InvoiceId,
        provider_id: ProviderId,
    ) -> LifecycleResult<()> {
        let invoice = self.invoices.get_invoice(invoice_id).await?;
        let Some(transition) = Transition::request_or_noop(invoice.state, InvoiceState::Handling)?
        else {
            return Ok(());
        };

        if let Err(e) = self.orders.payment_handling(invoice.order_id).await {
            if e.is_rejection() {
                tracing::warn!(invoice_id = %invoice_id, order_id = %invoice.order_id, error = %e, "order cannot take payment, cancelling invoice");
                self.cancel_invoice(&invoice).await?;
            }
            return Err(e);
        }

        self.apply(invoice_id, transition, Some(&provider_id)).await
    }

    /// Provider checkout succeeded.
    pub async fn processing(
        &self,
        invoice_id: InvoiceId,
        provider_id: ProviderId,
    ) -> LifecycleResult<()> {
        let invoice = self.invoices.get_invoice(invoice_id).await?;
        let Some(transition) =
            Transition::request_or_noop(invoice.state, InvoiceState::Processing)?
        else {
            return Ok(());
        };

        self.orders.payment_handling(invoice.order_id).await?;
        self.apply(invoice_id, transition, Some(&provider_id)).await
    }

    /// Conditional write; a stale result is fine when a concurrent caller
    /// already reached the same target.
    async fn apply(
        &self,
        invoice_id: InvoiceId,
        transition: Transition<InvoiceState>,
        provider_id: Option<&ProviderId>,
    ) -> LifecycleResult<()> {
        match self
            .invoices
            .change_state(invoice_id, transition, provider_id)
            .await
        {
            Ok(()) => {
                tracing::info!(invoice_id = %invoice_id, transition = %transition, "invoice state changed");
                Ok(())
            }
            Err(e) if e.is_stale() => {
                let current = self.invoices.get_invoice(invoice_id).await?;
                if current.state == transition.to() {
                    Ok(())
                } else {
                    Err(e)
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn order_invoices(&self, order_id: OrderId) -> LifecycleResult<Vec<Invoice>> {
        let request = InvoiceListRequest {
            filter: InvoiceFilter {
                order_id: Some(order_id),
                ..InvoiceFilter::default()
            },
            sort: SortOrder::Desc,
            page: Pagination::first(ORDER_INVOICES_LIMIT),
        };
        self.invoices.list_invoices(&request).await
    }

    async fn cancel_invoice(&self, invoice: &Invoice) -> LifecycleResult<()> {
        match Transition::request_or_noop(invoice.state, InvoiceState::Canceled)? {
            Some(transition) => self.apply(invoice.id, transition, None).await,
            None => Ok(()),
        }
    }

    /// Settle invoices the provider confirmed: cascade the order to
    /// `Processing`, then close the invoice.
    pub async fn reconcile_processing_invoices(&self, batch: u32) -> LifecycleResult<RunReport> {
        let request = InvoiceListRequest {
            filter: InvoiceFilter::with_state(InvoiceState::Processing),
            sort: SortOrder::Asc,
            page: Pagination::first(batch),
        };
        let mut report = RunReport::default();
        for invoice in self.invoices.list_invoices(&request).await? {
            match self.settle(&invoice).await {
                Ok(()) => report.processed += 1,
                Err(e) if e.is_rejection() => {
                    tracing::warn!(invoice_id = %invoice.id, order_id = %invoice.order_id, error = %e, "confirmed invoice not settled");
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    async fn settle(&self, invoice: &Invoice) -> LifecycleResult<()> {
        self.orders.processing(invoice.order_id).await?;
        let transition = Transition::request(InvoiceState::Processing, InvoiceState::Performed)?;
        self.apply(invoice.id, transition, None).await
    }

    /// Resolve invoices stuck in `Handling` against the provider ledger.
    ///
    /// A candidate with a settled ledger entry moves to `Processing`; one
    /// without is cancelled together with its order, unless another invoice
    /// of that order was paid or is still in flight. Matched candidates are
    /// settled first. A ledger failure aborts the run before anything is
    /// cancelled.
    pub async fn reconcile_stuck_invoices(
        &self,
        now: DateTime<Utc>,
        batch: u32,
    ) -> LifecycleResult<RunReport> {
        let request = InvoiceListRequest {
            filter: InvoiceFilter {
                states: vec![InvoiceState::Handling],
                updated: TimeRange::before(now - self.handling_timeout),
                order_id: None,
            },
            sort: SortOrder::Desc,
            page: Pagination::first(batch),
        };
        let candidates = self.invoices.list_invoices(&request).await?;
        let mut report = RunReport::default();
        if candidates.is_empty() {
            return Ok(report);
        }

        let matched = self.scan_ledger(&candidates).await?;
        let (paid, unpaid): (Vec<Invoice>, Vec<Invoice>) = candidates
            .into_iter()
            .partition(|invoice| matched.contains_key(&invoice.id));
        let abandoned: HashSet<InvoiceId> = unpaid.iter().map(|invoice| invoice.id).collect();

        for invoice in paid.iter().chain(&unpaid) {
            let outcome = match matched.get(&invoice.id) {
                Some(provider_id) => self.processing(invoice.id, provider_id.clone()).await,
                None => self.abandon(invoice, &abandoned).await,
            };
            match outcome {
                Ok(()) => report.processed += 1,
                Err(e) if e.is_rejection() => {
                    tracing::warn!(invoice_id = %invoice.id, error = %e, "stuck invoice left for next run");
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    async fn abandon(
        &self,
        invoice: &Invoice,
        abandoned: &HashSet<InvoiceId>,
    ) -> LifecycleResult<()> {
        let siblings = self.order_invoices(invoice.order_id).await?;
        let order_alive = siblings.iter().any(|sibling| {
            sibling.id != invoice.id
                && match sibling.state {
                    InvoiceState::Processing | InvoiceState::Performed => true,
                    InvoiceState::Handling => !abandoned.contains(&sibling.id),
                    _ => false,
                }
        });
        if order_alive {
            tracing::info!(invoice_id = %invoice.id, order_id = %invoice.order_id, "no payment found for stuck invoice, order kept for another invoice");
        } else {
            tracing::info!(invoice_id = %invoice.id, order_id = %invoice.order_id, "no payment found for stuck invoice");
            self.orders.canceled(invoice.order_id).await?;
        }
        let transition = Transition::request(InvoiceState::Handling, InvoiceState::Canceled)?;
        self.apply(invoice.id, transition, None).await
    }

    /// Page the ledger newest-first and collect settling entries for
    /// `candidates`.
    ///
    /// Stops once every candidate matched, at the end of the ledger, or on a
    /// page whose newest entry is no later than the oldest candidate.
    async fn scan_ledger(
        &self,
        candidates: &[Invoice],
    ) -> LifecycleResult<HashMap<InvoiceId, ProviderId>> {
        let mut pending: HashSet<InvoiceId> = candidates.iter().map(|i| i.id).collect();
        let Some(oldest) = candidates.iter().map(|i| i.created_at).min() else {
            return Ok(HashMap::new());
        };

        let mut matched = HashMap::new();
        let mut offset = 0;
        for _ in 0..self.scan.max_pages {
            let page = self
                .ledger
                .list_transactions(offset, self.scan.page_size)
                .await?;

            for tx in &page.transactions {
                let Some(invoice_id) = tx.invoice_id else {
                    continue;
                };
                if !pending.contains(&invoice_id) {
                    continue;
                }
                if let Some(provider_id) = tx.provider_id() {
                    pending.remove(&invoice_id);
                    matched.insert(invoice_id, provider_id);
                }
            }

            let newest = page.transactions.iter().map(|tx| tx.occurred_at).max();
            let end_of_ledger = page.fetched < self.scan.page_size as usize;
            let before_window = newest.is_none_or(|at| at <= oldest);
            if pending.is_empty() || end_of_ledger || before_window {
                tracing::debug!(pages = offset / self.scan.page_size + 1, matched = matched.len(), "ledger scan finished");
                return Ok(matched);
            }
            offset += self.scan.page_size;
        }

        Err(LifecycleError::ProviderUnavailable(format!(
            "ledger scan did not reach {oldest} within {} pages",
            self.scan.max_pages
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestShop;
    use storefront_invoicing::ProviderTransaction;
    use storefront_products::ProductKind;

    fn charge(invoice_id: Option<InvoiceId>, id: &str, at: DateTime<Utc>) -> ProviderTransaction {
        ProviderTransaction {
            provider_tx_id: id.to_string(),
            invoice_id,
            occurred_at: at,
        }
    }

    async fn stuck_invoice(shop: &TestShop) -> (OrderId, InvoiceId) {
        let product = shop.product(ProductKind::Digital, 1).await;
        let order_id = shop.orders.create_order(shop.user_id, product).await.unwrap();
        let draft = shop
            .payments
            .create_invoice(order_id, shop.user_id, PaymentMethod::Telegram)
            .await
            .unwrap();
        shop.payments
            .handling(draft.invoice_id, ProviderId::new("pre_1").unwrap())
            .await
            .unwrap();
        (order_id, draft.invoice_id)
    }

    fn later() -> DateTime<Utc> {
        Utc::now() + Duration::minutes(2)
    }

    #[tokio::test]
    async fn invoice_requires_an_order_awaiting_payment() {
        let shop = TestShop::new();
        let (order_id, invoice_id) = stuck_invoice(&shop).await;

        let err = shop
            .payments
            .create_invoice(order_id, shop.user_id, PaymentMethod::Telegram)
            .await
            .unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::Validation(_))));

        let invoice = shop.payments.get_invoice(invoice_id, shop.user_id).await.unwrap();
        assert_eq!(invoice.state, InvoiceState::Handling);
        assert_eq!(invoice.provider_id.unwrap().as_str(), "pre_1");

        let err = shop
            .payments
            .get_invoice(invoice_id, UserId::new())
            .await
            .unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::Forbidden)));
    }

    #[tokio::test]
    async fn draft_carries_invoice_id_as_payload() {
        let shop = TestShop::new();
        let product = shop.product(ProductKind::Digital, 1).await;
        let order_id = shop.orders.create_order(shop.user_id, product).await.unwrap();
        let draft = shop
            .payments
            .create_invoice(order_id, shop.user_id, PaymentMethod::Telegram)
            .await
            .unwrap();
        assert_eq!(draft.payload, draft.invoice_id.to_string());
        assert_eq!(draft.title, "Product");
        assert_eq!(draft.price.amount, rust_decimal_macros::dec!(100));
    }

    #[tokio::test]
    async fn order_takes_one_open_invoice_at_a_time() {
        let shop = TestShop::new();
        let product = shop.product(ProductKind::Digital, 1).await;
        let order_id = shop.orders.create_order(shop.user_id, product).await.unwrap();
        let first = shop
            .payments
            .create_invoice(order_id, shop.user_id, PaymentMethod::Telegram)
            .await
            .unwrap();

        let err = shop
            .payments
            .create_invoice(order_id, shop.user_id, PaymentMethod::Telegram)
            .await
            .unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::Validation(_))));

        let invoice = shop.invoices.get_invoice(first.invoice_id).await.unwrap();
        shop.payments.cancel_invoice(&invoice).await.unwrap();
        let second = shop
            .payments
            .create_invoice(order_id, shop.user_id, PaymentMethod::Telegram)
            .await
            .unwrap();
        assert_ne!(second.invoice_id, first.invoice_id);
    }

    #[tokio::test]
    async fn handling_a_dead_order_cancels_the_invoice() {
        let shop = TestShop::new();
        let product = shop.product(ProductKind::Digital, 1).await;
        let order_id = shop.orders.create_order(shop.user_id, product).await.unwrap();
        let draft = shop
            .payments
            .create_invoice(order_id, shop.user_id, PaymentMethod::Telegram)
            .await
            .unwrap();
        shop.orders.canceled(order_id).await.unwrap();

        let err = shop
            .payments
            .handling(draft.invoice_id, ProviderId::new("pre_1").unwrap())
            .await
            .unwrap_err();
        assert!(err.is_rejection());
        let invoice = shop.invoices.get_invoice(draft.invoice_id).await.unwrap();
        assert_eq!(invoice.state, InvoiceState::Canceled);
        assert!(invoice.provider_id.is_none());
    }

    #[tokio::test]
    async fn repeated_callbacks_are_no_ops() {
        let shop = TestShop::new();
        let (order_id, invoice_id) = stuck_invoice(&shop).await;
        let pid = ProviderId::new("ch_1").unwrap();

        shop.payments.handling(invoice_id, pid.clone()).await.unwrap();
        shop.payments.processing(invoice_id, pid.clone()).await.unwrap();
        shop.payments.processing(invoice_id, pid).await.unwrap();

        let invoice = shop.invoices.get_invoice(invoice_id).await.unwrap();
        assert_eq!(invoice.state, InvoiceState::Processing);
        assert_eq!(invoice.provider_id.unwrap().as_str(), "ch_1");
        let order = shop.order_status(order_id).await;
        assert_eq!(order, OrderStatus::Handling);
    }

    #[tokio::test]
    async fn confirmed_invoices_settle_and_cascade() {
        let shop = TestShop::new();
        let (order_id, invoice_id) = stuck_invoice(&shop).await;
        shop.payments
            .processing(invoice_id, ProviderId::new("ch_1").unwrap())
            .await
            .unwrap();

        let report = shop.payments.reconcile_processing_invoices(15).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(shop.order_status(order_id).await, OrderStatus::Processing);
        let invoice = shop.invoices.get_invoice(invoice_id).await.unwrap();
        assert_eq!(invoice.state, InvoiceState::Performed);
        assert_eq!(shop.notifier.sent_matching("Payment received"), 1);

        let report = shop.payments.reconcile_processing_invoices(15).await.unwrap();
        assert!(report.is_idle());
    }

    #[tokio::test]
    async fn stuck_invoice_with_ledger_entry_moves_to_processing() {
        let shop = TestShop::new();
        let (order_id, invoice_id) = stuck_invoice(&shop).await;
        shop.ledger
            .push(charge(Some(invoice_id), "ch_9", Utc::now()))
            .unwrap();

        let report = shop.payments.reconcile_stuck_invoices(later(), 15).await.unwrap();
        assert_eq!(report.processed, 1);
        let invoice = shop.invoices.get_invoice(invoice_id).await.unwrap();
        assert_eq!(invoice.state, InvoiceState::Processing);
        assert_eq!(invoice.provider_id.unwrap().as_str(), "ch_9");
        assert_eq!(shop.order_status(order_id).await, OrderStatus::Handling);
    }

    #[tokio::test]
    async fn stuck_invoice_without_payment_cancels_both() {
        let shop = TestShop::new();
        let (order_id, invoice_id) = stuck_invoice(&shop).await;
        // Refund-style entry without a provider id does not settle.
        shop.ledger
            .push(charge(Some(invoice_id), "", Utc::now()))
            .unwrap();

        let report = shop.payments.reconcile_stuck_invoices(later(), 15).await.unwrap();
        assert_eq!(report.processed, 1);
        let invoice = shop.invoices.get_invoice(invoice_id).await.unwrap();
        assert_eq!(invoice.state, InvoiceState::Canceled);
        assert_eq!(shop.order_status(order_id).await, OrderStatus::Cancelled);
        assert_eq!(shop.notifier.sent_matching("cancelled"), 1);
    }

    /// Second `Handling` invoice on the same order, written straight to the
    /// store the way a concurrent checkout could.
    async fn sibling_invoice(shop: &TestShop, order_id: OrderId) -> InvoiceId {
        let view = shop.orders.get_order(order_id, shop.user_id).await.unwrap();
        let invoice = Invoice::open(order_id, view.order.price, PaymentMethod::Telegram, Utc::now());
        let invoice_id = shop.invoices.insert_invoice(invoice).await.unwrap();
        shop.payments
            .handling(invoice_id, ProviderId::new("pre_2").unwrap())
            .await
            .unwrap();
        invoice_id
    }

    #[tokio::test]
    async fn unpaid_sibling_does_not_cancel_a_paid_order() {
        let shop = TestShop::new();
        let (order_id, paid_id) = stuck_invoice(&shop).await;
        let other_id = sibling_invoice(&shop, order_id).await;
        shop.ledger
            .push(charge(Some(paid_id), "ch_paid", Utc::now()))
            .unwrap();

        let first = shop.payments.reconcile_stuck_invoices(later(), 15).await.unwrap();
        assert_eq!(first.processed, 2);
        let second = shop.payments.reconcile_stuck_invoices(later(), 15).await.unwrap();
        assert!(second.is_idle());

        assert_eq!(shop.invoices_state(paid_id).await, InvoiceState::Processing);
        assert_eq!(shop.invoices_state(other_id).await, InvoiceState::Canceled);
        assert_eq!(shop.order_status(order_id).await, OrderStatus::Handling);
        let view = shop.orders.get_order(order_id, shop.user_id).await.unwrap();
        assert_eq!(shop.inventory.count_available(view.order.product_id).await.unwrap(), 0);
        assert_eq!(shop.notifier.sent_matching("cancelled"), 0);

        shop.payments.reconcile_processing_invoices(15).await.unwrap();
        assert_eq!(shop.order_status(order_id).await, OrderStatus::Processing);
    }

    #[tokio::test]
    async fn unpaid_siblings_cancel_the_order_together() {
        let shop = TestShop::new();
        let (order_id, first_id) = stuck_invoice(&shop).await;
        let second_id = sibling_invoice(&shop, order_id).await;

        let report = shop.payments.reconcile_stuck_invoices(later(), 15).await.unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(shop.invoices_state(first_id).await, InvoiceState::Canceled);
        assert_eq!(shop.invoices_state(second_id).await, InvoiceState::Canceled);
        assert_eq!(shop.order_status(order_id).await, OrderStatus::Cancelled);
        assert_eq!(shop.notifier.sent_matching("cancelled"), 1);
    }

    #[tokio::test]
    async fn recent_handling_invoices_are_not_candidates() {
        let shop = TestShop::new();
        stuck_invoice(&shop).await;
        let report = shop.payments.reconcile_stuck_invoices(Utc::now(), 15).await.unwrap();
        assert!(report.is_idle());
        assert_eq!(shop.ledger.requests(), 0);
    }

    #[tokio::test]
    async fn out_of_order_ledger_entry_does_not_end_scan() {
        let shop = TestShop::with_scan(LedgerScan {
            page_size: 2,
            max_pages: 10,
        });
        let (_, invoice_id) = stuck_invoice(&shop).await;
        let now = Utc::now();
        shop.ledger
            .push(charge(None, "ch_old", now - Duration::days(1)))
            .unwrap();
        shop.ledger
            .push(charge(None, "ch_other", now + Duration::seconds(1)))
            .unwrap();
        shop.ledger
            .push(charge(Some(invoice_id), "ch_late", now + Duration::seconds(1)))
            .unwrap();
        shop.ledger
            .push(charge(None, "ch_filler", now))
            .unwrap();

        shop.payments.reconcile_stuck_invoices(later(), 15).await.unwrap();
        let invoice = shop.invoices.get_invoice(invoice_id).await.unwrap();
        assert_eq!(invoice.state, InvoiceState::Processing);
        assert_eq!(shop.ledger.requests(), 2);
    }

    #[tokio::test]
    async fn unreadable_entries_do_not_end_the_scan() {
        let shop = TestShop::with_scan(LedgerScan {
            page_size: 2,
            max_pages: 10,
        });
        let (_, invoice_id) = stuck_invoice(&shop).await;
        let now = Utc::now();
        shop.ledger
            .push(charge(None, "ch_other", now + Duration::seconds(1)))
            .unwrap();
        shop.ledger.push_unreadable().unwrap();
        shop.ledger
            .push(charge(Some(invoice_id), "ch_paid", now + Duration::seconds(1)))
            .unwrap();

        shop.payments.reconcile_stuck_invoices(later(), 15).await.unwrap();
        assert_eq!(shop.ledger.requests(), 2);
        assert_eq!(shop.invoices_state(invoice_id).await, InvoiceState::Processing);
    }

    #[tokio::test]
    async fn scan_stops_at_page_predating_candidates() {
        let shop = TestShop::with_scan(LedgerScan {
            page_size: 1,
            max_pages: 10,
        });
        let (_, invoice_id) = stuck_invoice(&shop).await;
        let now = Utc::now();
        shop.ledger.push(charge(None, "ch_a", now - Duration::hours(1))).unwrap();
        shop.ledger.push(charge(None, "ch_b", now - Duration::hours(2))).unwrap();

        shop.payments.reconcile_stuck_invoices(later(), 15).await.unwrap();
        assert_eq!(shop.ledger.requests(), 1);
        let invoice = shop.invoices.get_invoice(invoice_id).await.unwrap();
        assert_eq!(invoice.state, InvoiceState::Canceled);
    }

    #[tokio::test]
    async fn exhausted_page_limit_cancels_nothing() {
        let shop = TestShop::with_scan(LedgerScan {
            page_size: 1,
            max_pages: 2,
        });
        let (order_id, invoice_id) = stuck_invoice(&shop).await;
        for n in 0..5 {
            shop.ledger
                .push(charge(None, &format!("ch_{n}"), Utc::now() + Duration::seconds(5)))
                .unwrap();
        }

        let err = shop
            .payments
            .reconcile_stuck_invoices(later(), 15)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::ProviderUnavailable(_)));
        assert_eq!(shop.ledger.requests(), 2);
        let invoice = shop.invoices.get_invoice(invoice_id).await.unwrap();
        assert_eq!(invoice.state, InvoiceState::Handling);
        assert_eq!(shop.order_status(order_id).await, OrderStatus::Handling);
    }

    #[tokio::test]
    async fn provider_failure_aborts_the_run() {
        let shop = TestShop::new();
        let (_, invoice_id) = stuck_invoice(&shop).await;
        shop.ledger.set_failing(true);

        let err = shop
            .payments
            .reconcile_stuck_invoices(later(), 15)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::ProviderUnavailable(_)));
        let invoice = shop.invoices.get_invoice(invoice_id).await.unwrap();
        assert_eq!(invoice.state, InvoiceState::Handling);
    }
}
