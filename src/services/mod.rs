// Order workflow
pub mod order_number;
pub mod order_status;
pub mod orders;
pub mod payments;

// Stock bookkeeping shared by carts and orders
pub mod inventory;

// Catalogue, carts and accounts
pub mod carts;
pub mod products;
pub mod users;
