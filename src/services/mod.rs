pub mod atom;
pub mod transfer_store;
pub mod worker;
