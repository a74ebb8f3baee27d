pub mod audit;
pub mod cart;
pub mod checkout;
pub mod event;
pub mod order;
pub mod payment;
pub mod refund;
pub mod reservation;
pub mod ticket;
pub mod tier;
pub mod transfer;
pub mod venue;
