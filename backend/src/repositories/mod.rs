pub mod documents;
pub mod invoices;
pub mod records;
pub mod users;
