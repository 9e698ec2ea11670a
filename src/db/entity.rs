pub mod inventory;

pub use inventory::Entity as Inventory;
