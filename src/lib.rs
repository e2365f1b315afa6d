pub mod base;
pub mod sim;
pub mod timeq;
pub mod traffic;
pub mod xbar;
