pub mod approval;
pub mod nonce;
pub mod request;
pub mod version;
