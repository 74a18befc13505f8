pub mod fetcher;
pub mod ftp;
pub mod oai;

pub use fetcher::HttpFetcher;
pub use ftp::{FtpLoader, FtpTarget};
pub use oai::OaiBatchReader;
