pub mod client;
pub mod proxy;
pub mod query;
pub mod request;
pub mod response;

#[cfg(test)]
pub mod testing;
