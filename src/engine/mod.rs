//! Core checkout and ticket lifecycle machinery, independent of the HTTP
//! surface. Handlers stay thin; everything stateful lives here.

pub mod audit;
pub mod checkout;
pub mod credentials;
pub mod gateway;
pub mod ids;
pub mod inventory;
pub mod issuer;
pub mod money;
pub mod orders;
pub mod pricing;
pub mod refunds;
pub mod reservations;
pub mod sweeper;
pub mod tickets;
pub mod transfers;
pub mod validator;
