pub mod accounts;
pub mod booking;
pub mod catalog;
pub mod payments;
pub mod reconciliation;

#[cfg(test)]
pub mod testing;
