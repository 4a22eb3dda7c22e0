pub mod categories;
pub mod couriers;
pub mod customers;
pub mod items;
pub mod line_items;
pub mod shipments;
pub mod users;
