//! Invoicing domain module.
//!
//! One invoice per payment attempt against an order, its status machine, and
//! the provider-side records used to reconcile it.

pub mod invoice;
pub mod provider;

pub use invoice::{
    Invoice, InvoiceDraft, InvoiceFilter, InvoiceId, InvoiceListRequest, InvoiceState,
    PaymentMethod,
};
pub use provider::{LedgerPage, ProviderId, ProviderTransaction};
