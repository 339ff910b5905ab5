mod checkout;
mod helpers;
mod inventory;
mod mocks;
mod notify;
