pub mod crm;
pub mod session;
